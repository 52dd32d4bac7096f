use super::{Scheduler, Task, TaskHandle};
use crate::error::{FlowError, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;

/// Wall-clock scheduler backed by tokio timers
///
/// Tasks run on the runtime's worker threads. The runtime must have the
/// time driver enabled.
pub struct RealTimeScheduler {
    handle: Handle,
    epoch: Instant,
}

impl RealTimeScheduler {
    /// Create a scheduler that spawns its timers on `handle`
    pub fn new(handle: Handle) -> Arc<Self> {
        Arc::new(Self {
            handle,
            epoch: Instant::now(),
        })
    }

    /// Create a scheduler on the runtime of the calling context
    pub fn current() -> Result<Arc<Self>> {
        let handle = Handle::try_current()
            .map_err(|e| FlowError::Scheduler(format!("no tokio runtime: {}", e)))?;
        Ok(Self::new(handle))
    }
}

impl Scheduler for RealTimeScheduler {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle {
        let handle = TaskHandle::new();
        let token = handle.clone();
        let join = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if !token.is_cancelled() {
                task();
            }
        });
        handle.set_abort(join.abort_handle());
        handle
    }

    fn name(&self) -> &'static str {
        "real-time"
    }
}
