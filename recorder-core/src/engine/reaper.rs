use std::time::Duration;

use chrono::NaiveDateTime;
use tracing::{error, info};

use crate::history::{CompletionStatus, SqliteHistoryStore};
use crate::schedule::SqliteScheduleStore;
use crate::time::to_chrono;

use super::RecorderResult;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub archived: Vec<i64>,
    pub failed: Vec<i64>,
}

/// Archives triggered schedules whose window and stop grace are over and
/// removes them.
#[derive(Debug, Clone)]
pub struct Reaper {
    store: SqliteScheduleStore,
    history: SqliteHistoryStore,
    stop_grace: Duration,
}

impl Reaper {
    pub fn new(
        store: SqliteScheduleStore,
        history: SqliteHistoryStore,
        stop_grace: Duration,
    ) -> Self {
        Self {
            store,
            history,
            stop_grace,
        }
    }

    pub fn run_once(&self, now: NaiveDateTime) -> RecorderResult<ReapReport> {
        let mut report = ReapReport::default();
        // Captures run until end + stop_grace.
        let cutoff = now - to_chrono(self.stop_grace);
        for schedule in self.store.find_by_triggered(true)? {
            if !schedule.window().has_ended(cutoff) {
                continue;
            }
            match self
                .history
                .record_outcome(&schedule, CompletionStatus::Completed, now)
            {
                Ok(_) => report.archived.push(schedule.id),
                Err(err) => {
                    error!(
                        target: "recorder.reaper",
                        schedule_id = schedule.id,
                        error = %err,
                        "failed to archive expired schedule"
                    );
                    report.failed.push(schedule.id);
                }
            }
        }
        let removed = self.store.delete_all(&report.archived)?;
        if removed > 0 {
            info!(target: "recorder.reaper", removed, "expired schedules reaped");
        }
        Ok(report)
    }
}
