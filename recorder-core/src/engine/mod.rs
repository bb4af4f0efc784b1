//! Scheduling engine: trigger loop, reaper, startup recovery and forced
//! stop, wired together by [`RecorderRuntime`].

mod dispatch;
mod reaper;
mod recovery;
mod stop;
mod trigger;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::capture::{
    CaptureError, Encoder, FfmpegEncoder, FfprobeProber, ProcessSupervisor, Prober,
    SupervisorSettings, WorkerPool,
};
use crate::channel::{ChannelDirectory, ChannelError, SqliteChannelStore};
use crate::config::RecorderConfig;
use crate::error::ConfigError;
use crate::history::{HistoryError, SqliteHistoryStore};
use crate::schedule::{ScheduleError, ScheduleManager, ScheduleValidator, SqliteScheduleStore};
use crate::sqlite::{SqliteDatabase, StoreError};
use crate::time::local_now;

pub use dispatch::{Dispatch, RecordingDispatcher};
pub use reaper::{ReapReport, Reaper};
pub use recovery::RecoveryInitializer;
pub use stop::{ForcedStop, StopOutcome};
pub use trigger::{select_candidates, Admission, TriggerLoop, TriggerReport, TriggerSettings};

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    History(#[from] HistoryError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error("failed to prepare {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type RecorderResult<T> = std::result::Result<T, RecorderError>;

/// Every long-lived component of the recorder, built once from config.
pub struct RecorderRuntime {
    config: RecorderConfig,
    schedules: SqliteScheduleStore,
    channels: SqliteChannelStore,
    history: SqliteHistoryStore,
    manager: ScheduleManager,
    supervisor: Arc<ProcessSupervisor>,
    pool: WorkerPool,
    trigger: Arc<TriggerLoop>,
    reaper: Arc<Reaper>,
    recovery: RecoveryInitializer,
    forced_stop: ForcedStop,
}

impl RecorderRuntime {
    pub fn new(config: &RecorderConfig) -> RecorderResult<Self> {
        let encoder_config = &config.encoder;
        let prober = Arc::new(FfprobeProber::new(
            &encoder_config.ffprobe,
            &encoder_config.log_level,
        ));
        let encoder = Arc::new(
            FfmpegEncoder::new(&encoder_config.ffmpeg, &encoder_config.log_level)
                .with_reconnect_delay_max(encoder_config.reconnect_delay_max_seconds),
        );
        Self::with_components(config, prober, encoder)
    }

    /// Builds the runtime around caller-supplied capture tooling.
    pub fn with_components(
        config: &RecorderConfig,
        prober: Arc<dyn Prober>,
        encoder: Arc<dyn Encoder>,
    ) -> RecorderResult<Self> {
        let data_dir = config.data_dir();
        std::fs::create_dir_all(&data_dir).map_err(|source| RecorderError::Io {
            path: data_dir.clone(),
            source,
        })?;

        let db = SqliteDatabase::new(config.database_path())?;
        let schedules = SqliteScheduleStore::new(db.clone());
        let channels = SqliteChannelStore::new(db.clone());
        let history = SqliteHistoryStore::new(db);
        schedules.initialize()?;
        channels.initialize()?;
        history.initialize()?;

        let directory: Arc<dyn ChannelDirectory> = Arc::new(channels.clone());
        let validator = ScheduleValidator::new(directory, schedules.clone());
        let manager = ScheduleManager::new(schedules.clone(), history.clone(), validator);

        let scheduler = &config.scheduler;
        let supervisor = Arc::new(ProcessSupervisor::new(
            schedules.clone(),
            prober,
            encoder,
            SupervisorSettings {
                output_dir: config.output_dir(),
                stop_grace: scheduler.stop_grace(),
                retry_guard: scheduler.retry_guard(),
                graceful_stop_wait: scheduler.graceful_stop_wait(),
                retry_delay: scheduler.retry_delay(),
            },
        ));
        let pool = WorkerPool::new(
            scheduler.worker_pool_size(),
            scheduler.max_concurrent_recordings,
        );
        let dispatcher: Arc<dyn Dispatch> = Arc::new(RecordingDispatcher::new(
            pool.clone(),
            Arc::clone(&supervisor),
        ));
        let trigger = Arc::new(TriggerLoop::new(
            schedules.clone(),
            Arc::clone(&supervisor),
            Arc::clone(&dispatcher),
            TriggerSettings {
                lookahead: scheduler.lookahead(),
                max_concurrent: scheduler.max_concurrent_recordings,
            },
        ));
        let reaper = Arc::new(Reaper::new(
            schedules.clone(),
            history.clone(),
            scheduler.stop_grace(),
        ));
        let recovery = RecoveryInitializer::new(schedules.clone(), dispatcher);
        let forced_stop =
            ForcedStop::new(schedules.clone(), history.clone(), Arc::clone(&supervisor));

        Ok(Self {
            config: config.clone(),
            schedules,
            channels,
            history,
            manager,
            supervisor,
            pool,
            trigger,
            reaper,
            recovery,
            forced_stop,
        })
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn manager(&self) -> &ScheduleManager {
        &self.manager
    }

    pub fn schedules(&self) -> &SqliteScheduleStore {
        &self.schedules
    }

    pub fn channels(&self) -> &SqliteChannelStore {
        &self.channels
    }

    pub fn history(&self) -> &SqliteHistoryStore {
        &self.history
    }

    pub fn supervisor(&self) -> &Arc<ProcessSupervisor> {
        &self.supervisor
    }

    pub fn trigger(&self) -> &TriggerLoop {
        &self.trigger
    }

    pub fn reaper(&self) -> &Reaper {
        &self.reaper
    }

    pub fn recovery(&self) -> &RecoveryInitializer {
        &self.recovery
    }

    pub async fn force_stop(&self, id: i64) -> RecorderResult<StopOutcome> {
        self.forced_stop.stop(id, local_now()).await
    }

    /// Resumes interrupted recordings, then runs the trigger loop and the
    /// reaper until `shutdown` flips to true. Active captures are stopped on
    /// the way out; their rows stay triggered for the next start.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> RecorderResult<()> {
        let resumed = self.recovery.resume(local_now())?;
        info!(target: "recorder.runtime", resumed = resumed.len(), "recovery finished");

        let trigger = Arc::clone(&self.trigger);
        let trigger_task = tokio::spawn(run_every(
            self.config.scheduler.trigger_interval(),
            shutdown.clone(),
            move || {
                let trigger = Arc::clone(&trigger);
                async move {
                    match trigger.tick(local_now()).await {
                        Ok(report) => debug!(
                            target: "recorder.trigger",
                            report = ?report,
                            "tick finished"
                        ),
                        Err(err) => error!(
                            target: "recorder.trigger",
                            error = %err,
                            "trigger tick failed"
                        ),
                    }
                }
            },
        ));

        let reaper = Arc::clone(&self.reaper);
        let reaper_task = tokio::spawn(run_every(
            self.config.scheduler.reaper_interval(),
            shutdown.clone(),
            move || {
                let reaper = Arc::clone(&reaper);
                async move {
                    match reaper.run_once(local_now()) {
                        Ok(report) => debug!(
                            target: "recorder.reaper",
                            report = ?report,
                            "reap finished"
                        ),
                        Err(err) => error!(
                            target: "recorder.reaper",
                            error = %err,
                            "reap pass failed"
                        ),
                    }
                }
            },
        ));

        let _ = shutdown.wait_for(|stop| *stop).await;
        info!(target: "recorder.runtime", "shutdown requested");
        for (name, task) in [("trigger", trigger_task), ("reaper", reaper_task)] {
            if let Err(err) = task.await {
                error!(target: "recorder.runtime", task = name, error = %err, "loop task panicked");
            }
        }
        self.pool.close();
        let stopped = self.supervisor.stop_all().await;
        info!(target: "recorder.runtime", stopped, "active captures stopped");
        Ok(())
    }
}

/// Calls `job` every `period` until `shutdown` flips. Ticks that fall due
/// while a job is still running are skipped.
async fn run_every<F, Fut>(period: Duration, mut shutdown: watch::Receiver<bool>, mut job: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ticker.tick() => job().await,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
