//! External capture tooling and the per-schedule supervisor that drives it.

mod encoder;
mod error;
mod pool;
mod probe;
mod supervisor;

use std::fmt;

use tokio::process::Command;

pub use encoder::{
    stop_channel, CaptureExit, CaptureRequest, Encoder, FfmpegEncoder, StopRequest, StopSignal,
};
pub use error::{CaptureError, CaptureResult};
pub use pool::WorkerPool;
pub use probe::{parse_probe_output, FfprobeProber, ProbeOutcome, Prober};
pub use supervisor::{
    output_path_for_attempt, CaptureHandle, ProcessSupervisor, SupervisionOutcome,
    SupervisorSettings,
};

#[async_trait::async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, command: &mut Command) -> std::io::Result<std::process::Output>;
}

#[derive(Debug, Default)]
pub struct SystemCommandExecutor;

#[async_trait::async_trait]
impl CommandExecutor for SystemCommandExecutor {
    async fn run(&self, command: &mut Command) -> std::io::Result<std::process::Output> {
        command.kill_on_drop(true).output().await
    }
}

/// Video codecs that can be stream-copied into the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoCodec {
    H264,
    Hevc,
}

impl VideoCodec {
    pub fn from_name(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("h264") {
            Some(VideoCodec::H264)
        } else if name.eq_ignore_ascii_case("hevc") {
            Some(VideoCodec::Hevc)
        } else {
            None
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "h264",
            VideoCodec::Hevc => "hevc",
        }
    }

    pub fn bitstream_filter(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "h264_mp4toannexb",
            VideoCodec::Hevc => "hevc_mp4toannexb",
        }
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
