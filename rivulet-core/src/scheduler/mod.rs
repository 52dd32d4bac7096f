//! Time sources for time-gated operators
//!
//! Operators such as [`Flux::interval`](crate::Flux::interval) and
//! [`Flux::delay_elements`](crate::Flux::delay_elements) take a
//! [`SchedulerRef`] explicitly. Production code passes a
//! [`RealTimeScheduler`]; tests pass a [`VirtualTimeScheduler`] and move the
//! clock by hand.

mod real_time;
mod virtual_time;

pub use real_time::RealTimeScheduler;
pub use virtual_time::VirtualTimeScheduler;

use crate::error::FlowError;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::error;

/// Deferred unit of work
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Shared scheduler handle
pub type SchedulerRef = Arc<dyn Scheduler>;

/// Runs tasks after a delay
pub trait Scheduler: Send + Sync + 'static {
    /// Time elapsed on this scheduler's clock
    fn now(&self) -> Duration;

    /// Run `task` once `delay` has elapsed on this scheduler's clock.
    /// Never runs the task inline.
    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle;

    /// Name used in logs
    fn name(&self) -> &'static str;
}

/// Cancellation token for a scheduled task
#[derive(Clone, Debug, Default)]
pub struct TaskHandle {
    cancelled: Arc<AtomicBool>,
    /// Set by schedulers that own a runtime task, so cancel can drop it early
    abort: Arc<Mutex<Option<AbortHandle>>>,
}

impl TaskHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prevent the task from running if it has not started yet, and release
    /// whatever it captured as soon as the scheduler allows
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        let abort = self.abort.lock().take();
        if let Some(abort) = abort {
            abort.abort();
        }
    }

    /// Attach the runtime task backing this handle
    pub(crate) fn set_abort(&self, abort: AbortHandle) {
        let mut slot = self.abort.lock();
        if self.is_cancelled() {
            abort.abort();
        } else {
            *slot = Some(abort);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Run `work`, turning a panic into a [`FlowError::Scheduler`] for `on_failure`
pub(crate) fn run_guarded<W, F>(work: W, on_failure: F)
where
    W: FnOnce(),
    F: FnOnce(FlowError),
{
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(work)) {
        let message = panic_message(payload.as_ref());
        error!("scheduled task panicked: {}", message);
        on_failure(FlowError::Scheduler(message));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked".to_string()
    }
}
