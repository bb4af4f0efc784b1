use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{info, warn};

use crate::capture::ProcessSupervisor;
use crate::history::{CompletionStatus, HistoryRecord, SqliteHistoryStore};
use crate::schedule::{ScheduleError, SqliteScheduleStore};

use super::RecorderResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StopOutcome {
    pub record: HistoryRecord,
    pub handle_found: bool,
}

/// User-initiated end of a running recording.
pub struct ForcedStop {
    store: SqliteScheduleStore,
    history: SqliteHistoryStore,
    supervisor: Arc<ProcessSupervisor>,
}

impl ForcedStop {
    pub fn new(
        store: SqliteScheduleStore,
        history: SqliteHistoryStore,
        supervisor: Arc<ProcessSupervisor>,
    ) -> Self {
        Self {
            store,
            history,
            supervisor,
        }
    }

    pub async fn stop(&self, id: i64, now: NaiveDateTime) -> RecorderResult<StopOutcome> {
        let schedule = self
            .store
            .find_by_id(id)?
            .ok_or(ScheduleError::NotFound { id })?;
        if !schedule.triggered {
            return Err(ScheduleError::NotCurrentlyRecording { id }.into());
        }

        let handle_found = self.supervisor.stop(id).await;
        if !handle_found {
            warn!(
                target: "recorder.stop",
                schedule_id = id,
                "no running capture found for schedule"
            );
        }

        let record = self
            .history
            .record_outcome(&schedule, CompletionStatus::StoppedByUser, now)?;
        self.store.delete(id)?;
        info!(
            target: "recorder.stop",
            schedule_id = id,
            file_name = %schedule.file_name,
            handle_found,
            "recording stopped by user"
        );
        Ok(StopOutcome {
            record,
            handle_found,
        })
    }
}
