use std::sync::Arc;

use chrono::NaiveDateTime;
use tracing::{error, info};

use crate::schedule::SqliteScheduleStore;

use super::dispatch::Dispatch;
use super::RecorderResult;

/// Resubmits recordings that were running when the process last stopped.
pub struct RecoveryInitializer {
    store: SqliteScheduleStore,
    dispatcher: Arc<dyn Dispatch>,
}

impl RecoveryInitializer {
    pub fn new(store: SqliteScheduleStore, dispatcher: Arc<dyn Dispatch>) -> Self {
        Self { store, dispatcher }
    }

    /// Dispatches every triggered schedule that has not ended yet and
    /// returns the ids that were resubmitted. Expired rows are left to the
    /// reaper.
    pub fn resume(&self, now: NaiveDateTime) -> RecorderResult<Vec<i64>> {
        let mut resumed = Vec::new();
        for schedule in self.store.find_by_triggered(true)? {
            if !schedule.window().ends_after(now) {
                continue;
            }
            let schedule_id = schedule.id;
            match self.dispatcher.dispatch(schedule) {
                Ok(()) => {
                    info!(target: "recorder.recovery", schedule_id, "recording resumed");
                    resumed.push(schedule_id);
                }
                Err(err) => {
                    error!(
                        target: "recorder.recovery",
                        schedule_id,
                        error = %err,
                        "failed to resume recording"
                    );
                }
            }
        }
        Ok(resumed)
    }
}
