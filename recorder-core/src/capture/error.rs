use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        source: std::io::Error,
    },
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("process wait failed: {0}")]
    Wait(#[source] std::io::Error),
    #[error("worker pool is closed")]
    PoolClosed,
    #[error("no async runtime available to spawn supervisor")]
    NoRuntime,
    #[error("schedule {0} already has a running supervisor")]
    AlreadySupervised(i64),
}

pub type CaptureResult<T> = std::result::Result<T, CaptureError>;
