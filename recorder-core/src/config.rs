use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RecorderConfig {
    pub paths: PathsSection,
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub encoder: EncoderSection,
    /// Directory relative paths are resolved against; the config file's
    /// parent directory when loaded from disk.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl RecorderConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.data_dir)
    }

    pub fn database_path(&self) -> PathBuf {
        let database = Path::new(&self.paths.database);
        if database.is_absolute() {
            database.to_path_buf()
        } else {
            self.data_dir().join(database)
        }
    }

    pub fn output_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.output_dir)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scheduler.max_concurrent_recordings == 0 {
            return Err(ConfigError::Invalid {
                field: "scheduler.max_concurrent_recordings",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.scheduler.trigger_interval_seconds == 0 {
            return Err(ConfigError::Invalid {
                field: "scheduler.trigger_interval_seconds",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.scheduler.reaper_interval_seconds == 0 {
            return Err(ConfigError::Invalid {
                field: "scheduler.reaper_interval_seconds",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub data_dir: String,
    pub output_dir: String,
    #[serde(default = "default_database")]
    pub database: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    pub max_concurrent_recordings: usize,
    pub trigger_interval_seconds: u64,
    pub reaper_interval_seconds: u64,
    pub lookahead_seconds: u64,
    pub retry_guard_seconds: u64,
    pub stop_grace_seconds: u64,
    pub graceful_stop_wait_seconds: u64,
    pub retry_delay_ms: u64,
    /// 0 sizes the pool to the available hardware parallelism.
    pub worker_pool_size: usize,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            max_concurrent_recordings: 2,
            trigger_interval_seconds: 30,
            reaper_interval_seconds: 600,
            lookahead_seconds: 30,
            retry_guard_seconds: 30,
            stop_grace_seconds: 20,
            graceful_stop_wait_seconds: 3,
            retry_delay_ms: 0,
            worker_pool_size: 0,
        }
    }
}

impl SchedulerSection {
    pub fn trigger_interval(&self) -> Duration {
        Duration::from_secs(self.trigger_interval_seconds)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_seconds)
    }

    pub fn lookahead(&self) -> Duration {
        Duration::from_secs(self.lookahead_seconds)
    }

    pub fn retry_guard(&self) -> Duration {
        Duration::from_secs(self.retry_guard_seconds)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_seconds)
    }

    pub fn graceful_stop_wait(&self) -> Duration {
        Duration::from_secs(self.graceful_stop_wait_seconds)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn worker_pool_size(&self) -> Option<usize> {
        (self.worker_pool_size > 0).then_some(self.worker_pool_size)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EncoderSection {
    pub ffmpeg: String,
    pub ffprobe: String,
    pub log_level: String,
    pub reconnect_delay_max_seconds: u32,
}

impl Default for EncoderSection {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
            log_level: "warning".to_string(),
            reconnect_delay_max_seconds: 20,
        }
    }
}

fn default_database() -> String {
    "recorder.sqlite".to_string()
}

pub fn load_recorder_config<P: AsRef<Path>>(path: P) -> Result<RecorderConfig> {
    let path = path.as_ref();
    let mut config: RecorderConfig = load_toml(path)?;
    config.base_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    config.validate()?;
    Ok(config)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
