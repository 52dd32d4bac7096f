use super::{Scheduler, Task, TaskHandle};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Deterministic clock that only moves when told to
///
/// Tasks fire in fire-time order, ties in scheduling order. Tasks scheduled
/// by a running task fire within the same [`advance`](Self::advance) if they
/// fall inside the window.
///
/// # Example
/// ```
/// use rivulet::scheduler::{Scheduler, VirtualTimeScheduler};
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let clock = VirtualTimeScheduler::new();
/// let fired = Arc::new(AtomicBool::new(false));
/// let flag = fired.clone();
/// clock.schedule(Duration::from_secs(5), Box::new(move || flag.store(true, Ordering::SeqCst)));
///
/// clock.advance(Duration::from_secs(4));
/// assert!(!fired.load(Ordering::SeqCst));
/// clock.advance(Duration::from_secs(1));
/// assert!(fired.load(Ordering::SeqCst));
/// ```
pub struct VirtualTimeScheduler {
    state: Mutex<VirtualState>,
}

struct VirtualState {
    now: Duration,
    seq: u64,
    queue: BTreeMap<(Duration, u64), (Task, TaskHandle)>,
}

impl VirtualTimeScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(VirtualState {
                now: Duration::ZERO,
                seq: 0,
                queue: BTreeMap::new(),
            }),
        })
    }

    /// Move the clock forward by `by`, firing every task that falls due.
    /// The clock saturates at `Duration::MAX`.
    pub fn advance(&self, by: Duration) {
        let target = self.state.lock().now.saturating_add(by);
        self.advance_to(target);
    }

    /// Move the clock to `target`. Moving backwards is a no-op.
    ///
    /// Cancelled tasks are dropped from the queue first, releasing whatever
    /// they captured.
    pub fn advance_to(&self, target: Duration) {
        let purged = {
            let mut state = self.state.lock();
            let before = state.queue.len();
            state.queue.retain(|_, (_, handle)| !handle.is_cancelled());
            before - state.queue.len()
        };
        if purged > 0 {
            trace!(purged, "cancelled virtual tasks dropped");
        }
        loop {
            let due = {
                let mut state = self.state.lock();
                let fire_at = match state.queue.first_key_value() {
                    Some((&(fire_at, _), _)) if fire_at <= target => Some(fire_at),
                    _ => None,
                };
                match fire_at {
                    Some(fire_at) => {
                        state.now = state.now.max(fire_at);
                        state.queue.pop_first().map(|(_, task)| task)
                    }
                    None => {
                        state.now = state.now.max(target);
                        None
                    }
                }
            };
            match due {
                Some((task, handle)) => {
                    if !handle.is_cancelled() {
                        task();
                    }
                }
                None => break,
            }
        }
    }

    /// Number of scheduled tasks that are not cancelled
    pub fn pending(&self) -> usize {
        self.state
            .lock()
            .queue
            .values()
            .filter(|(_, handle)| !handle.is_cancelled())
            .count()
    }
}

impl Scheduler for VirtualTimeScheduler {
    fn now(&self) -> Duration {
        self.state.lock().now
    }

    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle {
        let handle = TaskHandle::new();
        let mut state = self.state.lock();
        let fire_at = state.now.saturating_add(delay);
        state.seq += 1;
        let seq = state.seq;
        trace!(?fire_at, seq, "virtual task scheduled");
        state.queue.insert((fire_at, seq), (task, handle.clone()));
        handle
    }

    fn name(&self) -> &'static str {
        "virtual"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Log = Arc<Mutex<Vec<&'static str>>>;

    fn record(
        clock: &Arc<VirtualTimeScheduler>,
        log: &Log,
        delay: u64,
        tag: &'static str,
    ) -> TaskHandle {
        let log = log.clone();
        clock.schedule(
            Duration::from_secs(delay),
            Box::new(move || log.lock().push(tag)),
        )
    }

    #[test]
    fn test_fire_order_and_ties() {
        let clock = VirtualTimeScheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        record(&clock, &log, 3, "c");
        record(&clock, &log, 1, "a");
        record(&clock, &log, 1, "b");

        clock.advance(Duration::from_secs(3));
        assert_eq!(*log.lock(), vec!["a", "b", "c"]);
        assert_eq!(clock.now(), Duration::from_secs(3));
    }

    #[test]
    fn test_never_fires_spontaneously() {
        let clock = VirtualTimeScheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        record(&clock, &log, 0, "zero");

        assert!(log.lock().is_empty());
        assert_eq!(clock.pending(), 1);
        clock.advance(Duration::ZERO);
        assert_eq!(*log.lock(), vec!["zero"]);
    }

    #[test]
    fn test_cancelled_task_skipped() {
        let clock = VirtualTimeScheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let handle = record(&clock, &log, 1, "skipped");
        handle.cancel();

        assert_eq!(clock.pending(), 0);
        clock.advance(Duration::from_secs(2));
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_nested_schedule_within_window() {
        let clock = VirtualTimeScheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let inner_clock = clock.clone();
        let inner_log = log.clone();
        clock.schedule(
            Duration::from_secs(1),
            Box::new(move || {
                inner_log.lock().push("outer");
                let log = inner_log.clone();
                inner_clock.schedule(
                    Duration::from_secs(1),
                    Box::new(move || log.lock().push("inner")),
                );
            }),
        );

        clock.advance(Duration::from_secs(2));
        assert_eq!(*log.lock(), vec!["outer", "inner"]);
    }

    #[test]
    fn test_advance_to_backwards_is_noop() {
        let clock = VirtualTimeScheduler::new();
        clock.advance(Duration::from_secs(10));
        clock.advance_to(Duration::from_secs(5));
        assert_eq!(clock.now(), Duration::from_secs(10));
    }

    #[test]
    fn test_cancelled_task_released_on_advance() {
        let clock = VirtualTimeScheduler::new();
        let payload = Arc::new(0u64);
        let captured = payload.clone();
        let handle = clock.schedule(
            Duration::from_secs(60),
            Box::new(move || drop(captured)),
        );
        handle.cancel();
        assert_eq!(Arc::strong_count(&payload), 2);

        clock.advance(Duration::ZERO);
        assert_eq!(Arc::strong_count(&payload), 1);
        assert_eq!(clock.now(), Duration::ZERO);
    }

    #[test]
    fn test_far_future_saturates() {
        let clock = VirtualTimeScheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        clock.advance(Duration::from_secs(5));
        let entry = log.clone();
        clock.schedule(Duration::MAX, Box::new(move || entry.lock().push("max")));

        clock.advance(Duration::from_secs(1));
        assert!(log.lock().is_empty());
        clock.advance(Duration::MAX);
        assert_eq!(clock.now(), Duration::MAX);
        assert_eq!(*log.lock(), vec!["max"]);

        clock.advance(Duration::MAX);
        assert_eq!(clock.now(), Duration::MAX);
    }
}
