use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use super::{CommandExecutor, SystemCommandExecutor, VideoCodec};

/// What a single probe of a source found. A failed probe is an outcome, not
/// an error: the caller decides to abort either way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Video(VideoCodec),
    Unsupported(String),
    Undetermined(String),
}

#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, url: &str) -> ProbeOutcome;
}

#[derive(Debug, Deserialize)]
struct ProbeDocument {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
}

/// Picks the first video stream out of `ffprobe -of json` output.
pub fn parse_probe_output(stdout: &[u8]) -> ProbeOutcome {
    let document: ProbeDocument = match serde_json::from_slice(stdout) {
        Ok(document) => document,
        Err(err) => return ProbeOutcome::Undetermined(format!("unreadable probe output: {err}")),
    };
    let video = document
        .streams
        .into_iter()
        .find(|stream| stream.codec_type.as_deref() == Some("video"));
    match video.and_then(|stream| stream.codec_name) {
        Some(name) => match VideoCodec::from_name(&name) {
            Some(codec) => ProbeOutcome::Video(codec),
            None => ProbeOutcome::Unsupported(name),
        },
        None => ProbeOutcome::Undetermined("no video stream found".to_string()),
    }
}

pub struct FfprobeProber {
    binary: PathBuf,
    log_level: String,
    executor: Arc<dyn CommandExecutor>,
}

impl FfprobeProber {
    pub fn new(binary: impl Into<PathBuf>, log_level: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            log_level: log_level.into(),
            executor: Arc::new(SystemCommandExecutor),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }
}

#[async_trait]
impl Prober for FfprobeProber {
    async fn probe(&self, url: &str) -> ProbeOutcome {
        let mut command = Command::new(&self.binary);
        command.args([
            "-v",
            self.log_level.as_str(),
            "-show_entries",
            "stream=codec_type,codec_name",
            "-of",
            "json",
            url,
        ]);
        let output = match self.executor.run(&mut command).await {
            Ok(output) => output,
            Err(err) => {
                return ProbeOutcome::Undetermined(format!(
                    "failed to run {}: {err}",
                    self.binary.display()
                ))
            }
        };
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return ProbeOutcome::Undetermined(format!(
                "ffprobe exited with {}: {}",
                output.status,
                stderr.trim()
            ));
        }
        let outcome = parse_probe_output(&output.stdout);
        debug!(target: "recorder.probe", url, outcome = ?outcome, "probe finished");
        outcome
    }
}
