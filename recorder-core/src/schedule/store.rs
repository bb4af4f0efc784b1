use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::warn;

use crate::sqlite::{is_conversion_failure, SqliteDatabase, StoreResult};
use crate::time::format_timestamp;

use super::models::{Schedule, ValidatedSchedule};

const SCHEDULE_SCHEMA: &str = include_str!("../../../sql/schedules.sql");

const SELECT_COLUMNS: &str =
    "SELECT id, start_time, end_time, channel_name, stream_url, file_name, triggered \
     FROM recording_schedules";

#[derive(Debug, Clone)]
pub struct SqliteScheduleStore {
    db: SqliteDatabase,
}

impl SqliteScheduleStore {
    pub fn new(db: SqliteDatabase) -> Self {
        Self { db }
    }

    pub fn initialize(&self) -> StoreResult<()> {
        self.db.apply_schema(SCHEDULE_SCHEMA)
    }

    pub fn insert(&self, schedule: &ValidatedSchedule) -> StoreResult<Schedule> {
        let conn = self.db.open()?;
        conn.execute(
            "INSERT INTO recording_schedules \
             (start_time, end_time, channel_name, stream_url, file_name, triggered) \
             VALUES (?1, ?2, ?3, ?4, ?5, 0)",
            params![
                format_timestamp(schedule.start),
                format_timestamp(schedule.end),
                schedule.channel,
                schedule.stream_url,
                schedule.file_name,
            ],
        )?;
        Ok(schedule.clone().into_schedule(conn.last_insert_rowid(), false))
    }

    /// Inserts or replaces the row with the schedule's id.
    pub fn save(&self, schedule: &Schedule) -> StoreResult<()> {
        let conn = self.db.open()?;
        upsert(&conn, schedule)?;
        Ok(())
    }

    pub fn save_all(&self, schedules: &[Schedule]) -> StoreResult<()> {
        if schedules.is_empty() {
            return Ok(());
        }
        let mut conn = self.db.open()?;
        let tx = conn.transaction()?;
        for schedule in schedules {
            upsert(&tx, schedule)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Flips `triggered` on for ids that are still pending, in one
    /// transaction, and returns the ids it flipped. Rows deleted or already
    /// triggered since they were read are left untouched.
    pub fn mark_triggered(&self, ids: &[i64]) -> StoreResult<Vec<i64>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.db.open()?;
        let tx = conn.transaction()?;
        let mut marked = Vec::with_capacity(ids.len());
        {
            let mut stmt = tx.prepare(
                "UPDATE recording_schedules SET triggered = 1 WHERE id = ?1 AND triggered = 0",
            )?;
            for id in ids {
                if stmt.execute([id])? > 0 {
                    marked.push(*id);
                }
            }
        }
        tx.commit()?;
        Ok(marked)
    }

    pub fn find_all(&self) -> StoreResult<Vec<Schedule>> {
        let conn = self.db.open()?;
        let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY id"))?;
        let rows = stmt.query_map([], Schedule::from_row)?;
        collect_valid(rows)
    }

    pub fn find_by_triggered(&self, triggered: bool) -> StoreResult<Vec<Schedule>> {
        let conn = self.db.open()?;
        let mut stmt =
            conn.prepare(&format!("{SELECT_COLUMNS} WHERE triggered = ?1 ORDER BY id"))?;
        let rows = stmt.query_map([triggered as i64], Schedule::from_row)?;
        collect_valid(rows)
    }

    pub fn find_by_id(&self, id: i64) -> StoreResult<Option<Schedule>> {
        let conn = self.db.open()?;
        let schedule = conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                [id],
                Schedule::from_row,
            )
            .optional()?;
        Ok(schedule)
    }

    pub fn exists(&self, id: i64) -> StoreResult<bool> {
        let conn = self.db.open()?;
        let found: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM recording_schedules WHERE id = ?1)",
            [id],
            |row| row.get(0),
        )?;
        Ok(found)
    }

    pub fn delete(&self, id: i64) -> StoreResult<bool> {
        let conn = self.db.open()?;
        let affected = conn.execute("DELETE FROM recording_schedules WHERE id = ?1", [id])?;
        Ok(affected > 0)
    }

    pub fn delete_all(&self, ids: &[i64]) -> StoreResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.db.open()?;
        let tx = conn.transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM recording_schedules WHERE id = ?1")?;
            for id in ids {
                removed += stmt.execute([id])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }
}

fn upsert(conn: &Connection, schedule: &Schedule) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO recording_schedules \
         (id, start_time, end_time, channel_name, stream_url, file_name, triggered) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
         ON CONFLICT(id) DO UPDATE SET \
            start_time = excluded.start_time, \
            end_time = excluded.end_time, \
            channel_name = excluded.channel_name, \
            stream_url = excluded.stream_url, \
            file_name = excluded.file_name, \
            triggered = excluded.triggered",
        params![
            schedule.id,
            format_timestamp(schedule.start),
            format_timestamp(schedule.end),
            schedule.channel,
            schedule.stream_url,
            schedule.file_name,
            schedule.triggered as i64,
        ],
    )
}

fn collect_valid<F>(rows: rusqlite::MappedRows<'_, F>) -> StoreResult<Vec<Schedule>>
where
    F: FnMut(&Row<'_>) -> rusqlite::Result<Schedule>,
{
    let mut schedules = Vec::new();
    for row in rows {
        match row {
            Ok(schedule) => schedules.push(schedule),
            Err(err) if is_conversion_failure(&err) => {
                warn!(target: "recorder.store", error = %err, "skipping unreadable schedule row");
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(schedules)
}
