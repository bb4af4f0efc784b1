mod store;

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sqlite::StoreError;
use crate::time::schedule_format;

pub use store::SqliteHistoryStore;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("unknown completion status {0:?}")]
    UnknownStatus(String),
}

impl From<rusqlite::Error> for HistoryError {
    fn from(error: rusqlite::Error) -> Self {
        HistoryError::Store(StoreError::Execute(error))
    }
}

pub type HistoryResult<T> = std::result::Result<T, HistoryError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompletionStatus {
    Completed,
    StoppedByUser,
    DeletedByUser,
}

impl CompletionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionStatus::Completed => "COMPLETED",
            CompletionStatus::StoppedByUser => "STOPPED_BY_USER",
            CompletionStatus::DeletedByUser => "DELETED_BY_USER",
        }
    }
}

impl fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompletionStatus {
    type Err = HistoryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "COMPLETED" => Ok(CompletionStatus::Completed),
            "STOPPED_BY_USER" => Ok(CompletionStatus::StoppedByUser),
            "DELETED_BY_USER" => Ok(CompletionStatus::DeletedByUser),
            other => Err(HistoryError::UnknownStatus(other.to_string())),
        }
    }
}

/// Archived end of a schedule's lifecycle. Rows are appended, never edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: Option<i64>,
    pub channel: Option<String>,
    pub stream_url: String,
    pub file_name: String,
    #[serde(with = "schedule_format")]
    pub start: NaiveDateTime,
    #[serde(with = "schedule_format")]
    pub end: NaiveDateTime,
    pub archived_at: NaiveDateTime,
    pub was_triggered: bool,
    pub status: CompletionStatus,
}
