use std::sync::{Mutex, MutexGuard};

use chrono::NaiveDateTime;
use tracing::info;

use crate::history::{CompletionStatus, SqliteHistoryStore};

use super::error::{ScheduleError, ScheduleResult};
use super::models::{Schedule, ScheduleRequest};
use super::store::SqliteScheduleStore;
use super::validator::ScheduleValidator;

/// Create, update, delete and list entry point for schedules.
///
/// Validation and persistence happen under one writer lock so two requests
/// in this process cannot both pass the overlap check.
pub struct ScheduleManager {
    store: SqliteScheduleStore,
    history: SqliteHistoryStore,
    validator: ScheduleValidator,
    writer: Mutex<()>,
}

impl ScheduleManager {
    pub fn new(
        store: SqliteScheduleStore,
        history: SqliteHistoryStore,
        validator: ScheduleValidator,
    ) -> Self {
        Self {
            store,
            history,
            validator,
            writer: Mutex::new(()),
        }
    }

    pub fn create(
        &self,
        request: &ScheduleRequest,
        now: NaiveDateTime,
    ) -> ScheduleResult<Schedule> {
        let _guard = self.lock();
        let validated = self.validator.validate(request, None, now)?;
        let schedule = self.store.insert(&validated)?;
        info!(
            target: "recorder.schedules",
            schedule_id = schedule.id,
            file_name = %schedule.file_name,
            "schedule created"
        );
        Ok(schedule)
    }

    /// Replaces the window, source and file name of an existing schedule.
    /// The `triggered` flag is carried over from the stored row.
    pub fn update(
        &self,
        id: i64,
        request: &ScheduleRequest,
        now: NaiveDateTime,
    ) -> ScheduleResult<Schedule> {
        let _guard = self.lock();
        let existing = self
            .store
            .find_by_id(id)?
            .ok_or(ScheduleError::NotFound { id })?;
        let validated = self.validator.validate(request, Some(id), now)?;
        let schedule = validated.into_schedule(id, existing.triggered);
        self.store.save(&schedule)?;
        info!(
            target: "recorder.schedules",
            schedule_id = id,
            file_name = %schedule.file_name,
            "schedule updated"
        );
        Ok(schedule)
    }

    /// Archives the schedule as deleted by the user, then removes it.
    pub fn delete(&self, id: i64, now: NaiveDateTime) -> ScheduleResult<Schedule> {
        let _guard = self.lock();
        let schedule = self
            .store
            .find_by_id(id)?
            .ok_or(ScheduleError::NotFound { id })?;
        self.history
            .record_outcome(&schedule, CompletionStatus::DeletedByUser, now)?;
        self.store.delete(id)?;
        info!(
            target: "recorder.schedules",
            schedule_id = id,
            file_name = %schedule.file_name,
            "schedule deleted"
        );
        Ok(schedule)
    }

    pub fn list(&self) -> ScheduleResult<Vec<Schedule>> {
        let mut schedules = self.store.find_all()?;
        schedules.sort_by_key(|schedule| (schedule.start, schedule.id));
        Ok(schedules)
    }

    pub fn get(&self, id: i64) -> ScheduleResult<Schedule> {
        self.store
            .find_by_id(id)?
            .ok_or(ScheduleError::NotFound { id })
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
