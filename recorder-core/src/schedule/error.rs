use thiserror::Error;

use crate::channel::ChannelError;
use crate::sqlite::StoreError;
use crate::time::TimestampError;

/// Reasons a schedule request is refused before anything is written.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid time format {0:?}: expected HH:mm dd/MM/yyyy")]
    InvalidTimeFormat(String),
    #[error("start time must be before end time")]
    TimeOrder,
    #[error("end time must be in the future")]
    PastEndTime,
    #[error("{0:?} is neither a known channel nor a valid url")]
    InvalidChannelOrUrl(String),
    #[error("a valid stream url is required when no channel is given")]
    MissingUrl,
    #[error("invalid file name {0:?}")]
    InvalidFileName(String),
    #[error("overlaps with schedule {schedule_id} ({file_name})")]
    Overlap { file_name: String, schedule_id: i64 },
}

impl From<TimestampError> for ValidationError {
    fn from(error: TimestampError) -> Self {
        ValidationError::InvalidTimeFormat(error.value)
    }
}

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("history error: {0}")]
    History(#[from] crate::history::HistoryError),
    #[error("schedule {id} not found")]
    NotFound { id: i64 },
    #[error("schedule {id} is not currently recording")]
    NotCurrentlyRecording { id: i64 },
}

impl From<rusqlite::Error> for ScheduleError {
    fn from(error: rusqlite::Error) -> Self {
        ScheduleError::Store(StoreError::Execute(error))
    }
}

pub type ScheduleResult<T> = std::result::Result<T, ScheduleError>;
