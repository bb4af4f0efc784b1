use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStderr, Command};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::error::{CaptureError, CaptureResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    pub schedule_id: i64,
    pub source_url: String,
    pub duration: Duration,
    pub output_path: PathBuf,
    pub bitstream_filter: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopRequest {
    Running,
    Graceful,
    Force,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureExit {
    Completed,
    Failed { code: Option<i32> },
    Stopped,
}

/// Creates the channel a stop path uses to escalate against one capture.
pub fn stop_channel() -> (watch::Sender<StopRequest>, StopSignal) {
    let (tx, rx) = watch::channel(StopRequest::Running);
    (tx, StopSignal { rx })
}

/// Receiving side of a stop escalation.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<StopRequest>,
}

impl StopSignal {
    pub fn current(&self) -> StopRequest {
        *self.rx.borrow()
    }

    /// Resolves on the next escalation. Stays pending once the sender is gone.
    pub async fn changed(&mut self) -> StopRequest {
        if self.rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
        *self.rx.borrow_and_update()
    }
}

#[async_trait]
pub trait Encoder: Send + Sync {
    /// Runs one capture attempt to completion or until stopped.
    async fn capture(
        &self,
        request: CaptureRequest,
        signal: StopSignal,
    ) -> CaptureResult<CaptureExit>;
}

#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    binary: PathBuf,
    log_level: String,
    reconnect_delay_max: u32,
}

impl FfmpegEncoder {
    pub fn new(binary: impl Into<PathBuf>, log_level: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            log_level: log_level.into(),
            reconnect_delay_max: 20,
        }
    }

    pub fn with_reconnect_delay_max(mut self, seconds: u32) -> Self {
        self.reconnect_delay_max = seconds;
        self
    }

    pub fn build_args(&self, request: &CaptureRequest) -> Vec<String> {
        vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            self.log_level.clone(),
            "-xerror".into(),
            "-reconnect".into(),
            "1".into(),
            "-reconnect_streamed".into(),
            "1".into(),
            "-reconnect_delay_max".into(),
            self.reconnect_delay_max.to_string(),
            "-i".into(),
            request.source_url.clone(),
            "-fps_mode".into(),
            "vfr".into(),
            "-bsf:v".into(),
            request.bitstream_filter.clone(),
            "-t".into(),
            request.duration.as_secs().to_string(),
            "-c".into(),
            "copy".into(),
            "-y".into(),
            request.output_path.to_string_lossy().into_owned(),
        ]
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn capture(
        &self,
        request: CaptureRequest,
        mut signal: StopSignal,
    ) -> CaptureResult<CaptureExit> {
        if signal.current() != StopRequest::Running {
            return Ok(CaptureExit::Stopped);
        }
        if let Some(parent) = request.output_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| CaptureError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let args = self.build_args(&request);
        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CaptureError::Launch {
                program: self.binary.display().to_string(),
                source,
            })?;
        info!(
            target: "recorder.ffmpeg",
            schedule_id = request.schedule_id,
            output = %request.output_path.display(),
            seconds = request.duration.as_secs(),
            "ffmpeg started"
        );

        let mut stdin = child.stdin.take();
        let log_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(forward_stderr(stderr, request.schedule_id)));

        let mut stopped = false;
        let status = loop {
            tokio::select! {
                status = child.wait() => break status.map_err(CaptureError::Wait)?,
                escalation = signal.changed() => match escalation {
                    StopRequest::Running => {}
                    StopRequest::Graceful => {
                        stopped = true;
                        if let Some(mut pipe) = stdin.take() {
                            if let Err(err) = pipe.write_all(b"q").await {
                                debug!(
                                    target: "recorder.ffmpeg",
                                    error = %err,
                                    "stdin closed before quit request"
                                );
                            }
                        }
                    }
                    StopRequest::Force => {
                        stopped = true;
                        if let Err(err) = child.start_kill() {
                            warn!(target: "recorder.ffmpeg", error = %err, "failed to kill ffmpeg");
                        }
                    }
                },
            }
        };
        if let Some(task) = log_task {
            let _ = task.await;
        }

        let exit = if stopped {
            CaptureExit::Stopped
        } else if status.success() {
            CaptureExit::Completed
        } else {
            CaptureExit::Failed {
                code: status.code(),
            }
        };
        info!(
            target: "recorder.ffmpeg",
            schedule_id = request.schedule_id,
            exit = ?exit,
            "ffmpeg exited"
        );
        Ok(exit)
    }
}

async fn forward_stderr(stderr: ChildStderr, schedule_id: i64) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if !line.trim().is_empty() {
            info!(target: "recorder.ffmpeg", schedule_id, "{line}");
        }
    }
}
