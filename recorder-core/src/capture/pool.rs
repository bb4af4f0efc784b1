use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::warn;

use super::error::{CaptureError, CaptureResult};

/// Bounded set of slots supervisor tasks run in.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    /// Sizes the pool to `requested`, or to the host's parallelism when
    /// unset, and never below the recording cap.
    pub fn new(requested: Option<usize>, cap: usize) -> Self {
        let base = requested.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1)
        });
        let size = if base < cap {
            warn!(
                target: "recorder.pool",
                pool_size = base,
                cap,
                "worker pool smaller than recording cap; raising to cap"
            );
            cap
        } else {
            base
        };
        Self {
            permits: Arc::new(Semaphore::new(size.max(1))),
            size: size.max(1),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Spawns `task` on the current runtime; it starts once a slot is free.
    pub fn spawn<F>(&self, task: F) -> CaptureResult<JoinHandle<()>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = Handle::try_current().map_err(|_| CaptureError::NoRuntime)?;
        if self.permits.is_closed() {
            return Err(CaptureError::PoolClosed);
        }
        let permits = Arc::clone(&self.permits);
        Ok(handle.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            task.await;
        }))
    }

    pub fn close(&self) {
        self.permits.close();
    }
}
