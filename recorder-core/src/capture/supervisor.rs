use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use dashmap::{DashMap, DashSet};
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

use crate::schedule::{Schedule, SqliteScheduleStore};
use crate::time::{local_now, seconds_until, to_chrono};

use super::encoder::{stop_channel, CaptureRequest, Encoder, StopRequest};
use super::probe::{ProbeOutcome, Prober};

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub output_dir: PathBuf,
    pub stop_grace: Duration,
    pub retry_guard: Duration,
    pub graceful_stop_wait: Duration,
    pub retry_delay: Duration,
}

/// Live capture attempt of one schedule. Removing it from the active map is
/// how a stop takes ownership of the process.
#[derive(Debug)]
pub struct CaptureHandle {
    pub schedule_id: i64,
    pub attempt: u32,
    pub output_path: PathBuf,
    pub started_at: NaiveDateTime,
    stop: watch::Sender<StopRequest>,
    finished: watch::Receiver<bool>,
}

impl CaptureHandle {
    fn request(&self, request: StopRequest) {
        let _ = self.stop.send(request);
    }

    /// Waits until the attempt's process has exited, up to `limit`.
    async fn wait_finished(&mut self, limit: Duration) -> bool {
        timeout(limit, self.finished.wait_for(|done| *done))
            .await
            .map(|_| true)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisionOutcome {
    Aborted { reason: String },
    WindowClosed { attempts: u32 },
    Removed { attempts: u32 },
    Stopped { attempts: u32 },
    AlreadyRunning,
}

/// `<output_dir>/<file_name>` for the first attempt, then
/// `<output_dir>/<stem>_<attempt>.<ext>`.
pub fn output_path_for_attempt(output_dir: &Path, file_name: &str, attempt: u32) -> PathBuf {
    if attempt <= 1 {
        return output_dir.join(file_name);
    }
    let name = Path::new(file_name);
    let stem = name
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string());
    let renamed = match name.extension() {
        Some(ext) => format!("{stem}_{attempt}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{attempt}"),
    };
    output_dir.join(renamed)
}

pub struct ProcessSupervisor {
    store: SqliteScheduleStore,
    prober: Arc<dyn Prober>,
    encoder: Arc<dyn Encoder>,
    settings: SupervisorSettings,
    active: DashMap<i64, CaptureHandle>,
    revoked: DashSet<i64>,
    supervising: DashSet<i64>,
}

struct SupervisionGuard<'a> {
    supervisor: &'a ProcessSupervisor,
    schedule_id: i64,
}

impl Drop for SupervisionGuard<'_> {
    fn drop(&mut self) {
        self.supervisor.supervising.remove(&self.schedule_id);
        self.supervisor.revoked.remove(&self.schedule_id);
    }
}

impl ProcessSupervisor {
    pub fn new(
        store: SqliteScheduleStore,
        prober: Arc<dyn Prober>,
        encoder: Arc<dyn Encoder>,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            store,
            prober,
            encoder,
            settings,
            active: DashMap::new(),
            revoked: DashSet::new(),
            supervising: DashSet::new(),
        }
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    pub fn is_supervising(&self, schedule_id: i64) -> bool {
        self.supervising.contains(&schedule_id)
    }

    pub fn is_active(&self, schedule_id: i64) -> bool {
        self.active.contains_key(&schedule_id)
    }

    pub fn active_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.active.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Drives capture attempts for `schedule` until its window closes, the
    /// record disappears or the schedule is stopped.
    pub async fn supervise(&self, schedule: Schedule) -> SupervisionOutcome {
        let id = schedule.id;
        if !self.supervising.insert(id) {
            warn!(target: "recorder.supervisor", schedule_id = id, "supervisor already running");
            return SupervisionOutcome::AlreadyRunning;
        }
        let _guard = SupervisionGuard {
            supervisor: self,
            schedule_id: id,
        };

        let codec = match self.prober.probe(&schedule.stream_url).await {
            ProbeOutcome::Video(codec) => codec,
            ProbeOutcome::Unsupported(name) => {
                error!(
                    target: "recorder.supervisor",
                    schedule_id = id,
                    codec = %name,
                    "unsupported codec; recording abandoned"
                );
                return SupervisionOutcome::Aborted {
                    reason: format!("unsupported codec {name}"),
                };
            }
            ProbeOutcome::Undetermined(reason) => {
                error!(
                    target: "recorder.supervisor",
                    schedule_id = id,
                    reason = %reason,
                    "could not determine stream codec; recording abandoned"
                );
                return SupervisionOutcome::Aborted { reason };
            }
        };

        let stop_time = schedule.end + to_chrono(self.settings.stop_grace);
        let retry_guard = to_chrono(self.settings.retry_guard);
        let mut attempt: u32 = 0;

        loop {
            let now = local_now();
            if !schedule.window().ends_after(now + retry_guard) {
                info!(
                    target: "recorder.supervisor",
                    schedule_id = id,
                    attempts = attempt,
                    "window closed"
                );
                return SupervisionOutcome::WindowClosed { attempts: attempt };
            }
            match self.store.exists(id) {
                Ok(true) => {}
                Ok(false) => {
                    info!(
                        target: "recorder.supervisor",
                        schedule_id = id,
                        attempts = attempt,
                        "schedule removed"
                    );
                    return SupervisionOutcome::Removed { attempts: attempt };
                }
                Err(err) => {
                    error!(
                        target: "recorder.supervisor",
                        schedule_id = id,
                        error = %err,
                        "schedule lookup failed"
                    );
                    return SupervisionOutcome::Aborted {
                        reason: err.to_string(),
                    };
                }
            }
            if self.revoked.contains(&id) {
                return SupervisionOutcome::Stopped { attempts: attempt };
            }

            attempt += 1;
            let output_path =
                output_path_for_attempt(&self.settings.output_dir, &schedule.file_name, attempt);
            let (stop_tx, signal) = stop_channel();
            let (finished_tx, finished_rx) = watch::channel(false);
            self.active.insert(
                id,
                CaptureHandle {
                    schedule_id: id,
                    attempt,
                    output_path: output_path.clone(),
                    started_at: now,
                    stop: stop_tx,
                    finished: finished_rx,
                },
            );
            if self.revoked.contains(&id) {
                self.active.remove(&id);
                return SupervisionOutcome::Stopped {
                    attempts: attempt - 1,
                };
            }

            let request = CaptureRequest {
                schedule_id: id,
                source_url: schedule.stream_url.clone(),
                duration: Duration::from_secs(seconds_until(stop_time, now)),
                output_path,
                bitstream_filter: codec.bitstream_filter().to_string(),
            };
            info!(
                target: "recorder.supervisor",
                schedule_id = id,
                attempt,
                file_name = %schedule.file_name,
                seconds = request.duration.as_secs(),
                "starting capture attempt"
            );
            match self.encoder.capture(request, signal).await {
                Ok(exit) => {
                    info!(
                        target: "recorder.supervisor",
                        schedule_id = id,
                        attempt,
                        exit = ?exit,
                        "capture attempt ended"
                    )
                }
                Err(err) => {
                    warn!(
                        target: "recorder.supervisor",
                        schedule_id = id,
                        attempt,
                        error = %err,
                        "capture attempt failed"
                    )
                }
            }
            let _ = finished_tx.send(true);

            if self.active.remove(&id).is_none() {
                return SupervisionOutcome::Stopped { attempts: attempt };
            }
            if !self.settings.retry_delay.is_zero() {
                sleep(self.settings.retry_delay).await;
            }
        }
    }

    /// Stops the capture of `schedule_id`: quit request, bounded wait, then
    /// kill. Returns whether a running capture was found.
    pub async fn stop(&self, schedule_id: i64) -> bool {
        self.revoked.insert(schedule_id);
        let Some((_, mut handle)) = self.active.remove(&schedule_id) else {
            if !self.supervising.contains(&schedule_id) {
                self.revoked.remove(&schedule_id);
            }
            return false;
        };

        let wait = self.settings.graceful_stop_wait;
        handle.request(StopRequest::Graceful);
        if !handle.wait_finished(wait).await {
            warn!(
                target: "recorder.supervisor",
                schedule_id,
                attempt = handle.attempt,
                "capture ignored quit request; killing"
            );
            handle.request(StopRequest::Force);
            if !handle.wait_finished(wait).await {
                error!(
                    target: "recorder.supervisor",
                    schedule_id,
                    "capture did not exit after kill"
                );
            }
        }
        info!(
            target: "recorder.supervisor",
            schedule_id,
            output = %handle.output_path.display(),
            "capture stopped"
        );
        true
    }

    pub async fn stop_all(&self) -> usize {
        let mut stopped = 0;
        for id in self.active_ids() {
            if self.stop(id).await {
                stopped += 1;
            }
        }
        stopped
    }

    /// Stops every capture whose schedule row no longer exists.
    pub async fn stop_orphans(&self) -> Vec<i64> {
        let mut orphans = Vec::new();
        for id in self.active_ids() {
            match self.store.exists(id) {
                Ok(false) => {
                    warn!(
                        target: "recorder.supervisor",
                        schedule_id = id,
                        "schedule gone; stopping orphaned capture"
                    );
                    if self.stop(id).await {
                        orphans.push(id);
                    }
                }
                Ok(true) => {}
                Err(err) => {
                    warn!(
                        target: "recorder.supervisor",
                        schedule_id = id,
                        error = %err,
                        "orphan check failed"
                    )
                }
            }
        }
        orphans
    }
}
