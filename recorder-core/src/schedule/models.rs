use chrono::NaiveDateTime;
use rusqlite::types::Type;
use rusqlite::Row;
use serde::{Deserialize, Serialize};

use crate::time::{parse_timestamp, schedule_format, Window};

/// A booked recording as persisted in `recording_schedules`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: i64,
    #[serde(with = "schedule_format")]
    pub start: NaiveDateTime,
    #[serde(with = "schedule_format")]
    pub end: NaiveDateTime,
    pub channel: Option<String>,
    pub stream_url: String,
    pub file_name: String,
    pub triggered: bool,
}

impl Schedule {
    pub fn window(&self) -> Window {
        Window::new(self.start, self.end)
    }

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            start: timestamp_column(row, "start_time")?,
            end: timestamp_column(row, "end_time")?,
            channel: row.get("channel_name")?,
            stream_url: row.get("stream_url")?,
            file_name: row.get("file_name")?,
            triggered: row.get::<_, i64>("triggered")? != 0,
        })
    }
}

fn timestamp_column(row: &Row<'_>, column: &str) -> rusqlite::Result<NaiveDateTime> {
    let raw: String = row.get(column)?;
    let index = row.as_ref().column_index(column)?;
    parse_timestamp(&raw)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err)))
}

/// Raw booking input, exactly as a caller typed it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub start: String,
    pub end: String,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub stream_url: Option<String>,
    pub file_name: String,
}

/// A request that passed every validation step and is ready to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedSchedule {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub channel: Option<String>,
    pub stream_url: String,
    pub file_name: String,
}

impl ValidatedSchedule {
    pub(crate) fn into_schedule(self, id: i64, triggered: bool) -> Schedule {
        Schedule {
            id,
            start: self.start,
            end: self.end,
            channel: self.channel,
            stream_url: self.stream_url,
            file_name: self.file_name,
            triggered,
        }
    }
}
