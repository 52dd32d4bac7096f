use crate::demand::UNBOUNDED;
use crate::error::FlowError;
use crate::flux::{Flux, Publisher};
use crate::guard::SerialSink;
use crate::scheduler::{self, SchedulerRef, TaskHandle};
use crate::subscriber::{BoxSubscriber, Demand, Subscriber, Subscription};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, trace};

impl<T: Send + 'static> Flux<T> {
    /// Delay every item by `delay` on `scheduler`
    ///
    /// Items are pulled from upstream one at a time, so at most one item is
    /// ever waiting on the clock. A terminal signal is forwarded right after
    /// the last delayed item, without an extra delay.
    pub fn delay_elements(&self, delay: Duration, scheduler: SchedulerRef) -> Flux<T> {
        Flux::from_publisher(DelayPublisher {
            source: self.clone(),
            delay,
            scheduler,
        })
    }
}

struct DelayPublisher<T> {
    source: Flux<T>,
    delay: Duration,
    scheduler: SchedulerRef,
}

impl<T: Send + 'static> Publisher<T> for DelayPublisher<T> {
    fn subscribe(&self, subscriber: BoxSubscriber<T>) {
        let state = Arc::new(DelayState {
            sink: SerialSink::new(subscriber),
            delay: self.delay,
            scheduler: self.scheduler.clone(),
            upstream: Mutex::new(None),
            inner: Mutex::new(DelayInner {
                wanted: 0,
                phase: Phase::Idle,
                pending_terminal: None,
                timer: None,
                generation: 0,
            }),
            cancelled: AtomicBool::new(false),
        });
        self.source.subscribe_raw(Box::new(DelaySubscriber { state }));
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Phase {
    Idle,
    /// One item requested from upstream
    Requested,
    /// One item waiting on the clock
    Scheduled,
    Done,
}

enum Terminal {
    Complete,
    Error(FlowError),
}

struct DelayInner {
    wanted: u64,
    phase: Phase,
    pending_terminal: Option<Terminal>,
    timer: Option<TaskHandle>,
    /// Bumped for every scheduled item so a late store cannot clobber a newer timer
    generation: u64,
}

struct DelayState<T> {
    sink: Arc<SerialSink<T>>,
    delay: Duration,
    scheduler: SchedulerRef,
    upstream: Mutex<Option<Subscription>>,
    inner: Mutex<DelayInner>,
    cancelled: AtomicBool,
}

impl<T: Send + 'static> DelayState<T> {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Ask upstream for the next item if downstream wants one and none is in flight
    fn pull(&self) {
        {
            let mut inner = self.inner.lock();
            if self.is_cancelled() || inner.phase != Phase::Idle || inner.wanted == 0 {
                return;
            }
            inner.phase = Phase::Requested;
        }
        let upstream = self.upstream.lock().clone();
        if let Some(upstream) = upstream {
            upstream.request(1);
        }
    }

    fn schedule(self: &Arc<Self>, item: T) {
        // phase must flip before the timer can fire on another thread
        let generation = {
            let mut inner = self.inner.lock();
            inner.phase = Phase::Scheduled;
            inner.generation += 1;
            inner.generation
        };
        let this = self.clone();
        let handle = self.scheduler.schedule(
            self.delay,
            Box::new(move || {
                let failing = this.clone();
                scheduler::run_guarded(|| this.emit(item), move |err| failing.fail(err));
            }),
        );
        {
            let mut inner = self.inner.lock();
            if inner.generation != generation || inner.phase != Phase::Scheduled {
                // already fired
                return;
            }
            inner.timer = Some(handle);
        }
        if self.is_cancelled() {
            let timer = self.inner.lock().timer.take();
            if let Some(timer) = timer {
                timer.cancel();
            }
        }
    }

    fn emit(&self, item: T) {
        if self.is_cancelled() {
            return;
        }
        let terminal = {
            let mut inner = self.inner.lock();
            if inner.wanted != UNBOUNDED {
                inner.wanted = inner.wanted.saturating_sub(1);
            }
            inner.timer = None;
            let terminal = inner.pending_terminal.take();
            inner.phase = if terminal.is_some() {
                Phase::Done
            } else {
                Phase::Idle
            };
            terminal
        };
        trace!(delay = ?self.delay, "delayed item released");
        self.sink.next(item);
        match terminal {
            Some(terminal) => self.finish(terminal),
            None => self.pull(),
        }
    }

    fn terminate(&self, terminal: Terminal) {
        {
            let mut inner = self.inner.lock();
            if inner.phase == Phase::Scheduled {
                inner.pending_terminal = Some(terminal);
                return;
            }
            inner.phase = Phase::Done;
        }
        self.finish(terminal);
    }

    fn finish(&self, terminal: Terminal) {
        self.upstream.lock().take();
        match terminal {
            Terminal::Complete => self.sink.complete(),
            Terminal::Error(error) => self.sink.error(error),
        }
    }

    fn fail(&self, error: FlowError) {
        self.inner.lock().phase = Phase::Done;
        let upstream = self.upstream.lock().take();
        if let Some(upstream) = upstream {
            upstream.cancel();
        }
        self.sink.error(error);
    }
}

impl<T: Send + 'static> Demand for DelayState<T> {
    fn request(&self, n: u64) {
        if n == 0 {
            debug!("delay_elements ignoring request(0)");
            return;
        }
        {
            let mut inner = self.inner.lock();
            inner.wanted = inner.wanted.saturating_add(n);
        }
        self.pull();
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("delay_elements cancelled");
        let timer = self.inner.lock().timer.take();
        if let Some(timer) = timer {
            timer.cancel();
        }
        let upstream = self.upstream.lock().take();
        if let Some(upstream) = upstream {
            upstream.cancel();
        }
        self.sink.cancel();
    }
}

struct DelaySubscriber<T> {
    state: Arc<DelayState<T>>,
}

impl<T: Send + 'static> Subscriber<T> for DelaySubscriber<T> {
    fn on_subscribe(&mut self, subscription: Subscription) {
        *self.state.upstream.lock() = Some(subscription);
        self.state
            .sink
            .on_subscribe(Subscription::new(self.state.clone()));
    }

    fn on_next(&mut self, item: T) {
        if self.state.is_cancelled() {
            return;
        }
        self.state.schedule(item);
    }

    fn on_error(&mut self, error: FlowError) {
        self.state.terminate(Terminal::Error(error));
    }

    fn on_complete(&mut self) {
        self.state.terminate(Terminal::Complete);
    }
}
