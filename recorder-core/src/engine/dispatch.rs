use std::sync::Arc;

use tracing::info;

use crate::capture::{CaptureError, CaptureResult, ProcessSupervisor, WorkerPool};
use crate::schedule::Schedule;

/// Hands a triggered schedule to something that will record it.
pub trait Dispatch: Send + Sync {
    fn dispatch(&self, schedule: Schedule) -> CaptureResult<()>;
}

/// Runs one supervisor task per schedule on the worker pool.
#[derive(Clone)]
pub struct RecordingDispatcher {
    pool: WorkerPool,
    supervisor: Arc<ProcessSupervisor>,
}

impl RecordingDispatcher {
    pub fn new(pool: WorkerPool, supervisor: Arc<ProcessSupervisor>) -> Self {
        Self { pool, supervisor }
    }
}

impl Dispatch for RecordingDispatcher {
    fn dispatch(&self, schedule: Schedule) -> CaptureResult<()> {
        if self.supervisor.is_supervising(schedule.id) {
            return Err(CaptureError::AlreadySupervised(schedule.id));
        }
        let supervisor = Arc::clone(&self.supervisor);
        self.pool.spawn(async move {
            let schedule_id = schedule.id;
            let outcome = supervisor.supervise(schedule).await;
            info!(
                target: "recorder.dispatch",
                schedule_id,
                outcome = ?outcome,
                "supervisor finished"
            );
        })?;
        Ok(())
    }
}
