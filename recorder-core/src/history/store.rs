use chrono::NaiveDateTime;
use rusqlite::types::Type;
use rusqlite::{params, Row, ToSql};
use tracing::{info, warn};

use crate::schedule::Schedule;
use crate::sqlite::{is_conversion_failure, SqliteDatabase, StoreResult};
use crate::time::{format_timestamp, parse_timestamp};

use super::{CompletionStatus, HistoryRecord, HistoryResult};

const HISTORY_SCHEMA: &str = include_str!("../../../sql/history.sql");

/// Sortable text form for `recorded_at`.
const ARCHIVE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const SELECT_COLUMNS: &str = "SELECT id, channel_name, stream_url, file_name, start_time, \
     end_time, recorded_at, was_triggered, completion_status FROM past_recordings";

#[derive(Debug, Clone)]
pub struct SqliteHistoryStore {
    db: SqliteDatabase,
}

impl SqliteHistoryStore {
    pub fn new(db: SqliteDatabase) -> Self {
        Self { db }
    }

    pub fn initialize(&self) -> StoreResult<()> {
        self.db.apply_schema(HISTORY_SCHEMA)
    }

    pub fn append(&self, record: &HistoryRecord) -> HistoryResult<HistoryRecord> {
        let conn = self.db.open()?;
        conn.execute(
            "INSERT INTO past_recordings \
             (channel_name, stream_url, file_name, start_time, end_time, recorded_at, \
              was_triggered, completion_status) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.channel,
                record.stream_url,
                record.file_name,
                format_timestamp(record.start),
                format_timestamp(record.end),
                record.archived_at.format(ARCHIVE_FORMAT).to_string(),
                record.was_triggered as i64,
                record.status.as_str(),
            ],
        )?;
        let mut stored = record.clone();
        stored.id = Some(conn.last_insert_rowid());
        Ok(stored)
    }

    /// Archives the terminal state of `schedule` under `status`.
    pub fn record_outcome(
        &self,
        schedule: &Schedule,
        status: CompletionStatus,
        archived_at: NaiveDateTime,
    ) -> HistoryResult<HistoryRecord> {
        let record = self.append(&HistoryRecord {
            id: None,
            channel: schedule.channel.clone(),
            stream_url: schedule.stream_url.clone(),
            file_name: schedule.file_name.clone(),
            start: schedule.start,
            end: schedule.end,
            archived_at,
            was_triggered: schedule.triggered,
            status,
        })?;
        info!(
            target: "recorder.history",
            schedule_id = schedule.id,
            file_name = %record.file_name,
            status = %status,
            "recording archived"
        );
        Ok(record)
    }

    pub fn list_all(&self) -> HistoryResult<Vec<HistoryRecord>> {
        self.query(
            &format!("{SELECT_COLUMNS} ORDER BY recorded_at DESC, id DESC"),
            &[],
        )
    }

    pub fn list_by_channel(&self, channel: &str) -> HistoryResult<Vec<HistoryRecord>> {
        self.query(
            &format!("{SELECT_COLUMNS} WHERE channel_name = ?1 ORDER BY recorded_at DESC, id DESC"),
            &[&channel],
        )
    }

    /// Records archived within `[from, to]`, newest first.
    pub fn list_between(
        &self,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> HistoryResult<Vec<HistoryRecord>> {
        let from = from.format(ARCHIVE_FORMAT).to_string();
        let to = to.format(ARCHIVE_FORMAT).to_string();
        self.query(
            &format!(
                "{SELECT_COLUMNS} WHERE recorded_at BETWEEN ?1 AND ?2 \
                 ORDER BY recorded_at DESC, id DESC"
            ),
            &[&from, &to],
        )
    }

    fn query(&self, sql: &str, args: &[&dyn ToSql]) -> HistoryResult<Vec<HistoryRecord>> {
        let conn = self.db.open()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(args, record_from_row)?;
        let mut records = Vec::new();
        for row in rows {
            match row {
                Ok(record) => records.push(record),
                Err(err) if is_conversion_failure(&err) => {
                    warn!(
                        target: "recorder.history",
                        error = %err,
                        "skipping unreadable history row"
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(records)
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<HistoryRecord> {
    let start: String = row.get("start_time")?;
    let end: String = row.get("end_time")?;
    let archived_at: String = row.get("recorded_at")?;
    let status: String = row.get("completion_status")?;
    Ok(HistoryRecord {
        id: Some(row.get("id")?),
        channel: row.get("channel_name")?,
        stream_url: row.get("stream_url")?,
        file_name: row.get("file_name")?,
        start: parse_timestamp(&start).map_err(|err| conversion(4, err))?,
        end: parse_timestamp(&end).map_err(|err| conversion(5, err))?,
        archived_at: NaiveDateTime::parse_from_str(&archived_at, ARCHIVE_FORMAT)
            .map_err(|err| conversion(6, err))?,
        was_triggered: row.get::<_, i64>("was_triggered")? != 0,
        status: status.parse().map_err(|err| conversion(8, err))?,
    })
}

fn conversion<E>(index: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err))
}
