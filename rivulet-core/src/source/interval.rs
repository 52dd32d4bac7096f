use crate::demand;
use crate::error::FlowError;
use crate::flux::Publisher;
use crate::scheduler::{self, SchedulerRef, TaskHandle};
use crate::subscriber::{BoxSubscriber, Demand, Subscription};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Emits 0, 1, 2, ... once per period, forever
pub(crate) struct IntervalPublisher {
    period: Duration,
    scheduler: SchedulerRef,
}

impl IntervalPublisher {
    pub(crate) fn new(period: Duration, scheduler: SchedulerRef) -> Self {
        Self { period, scheduler }
    }
}

impl Publisher<u64> for IntervalPublisher {
    fn subscribe(&self, subscriber: BoxSubscriber<u64>) {
        let this = Arc::new(IntervalSubscription {
            period: self.period,
            scheduler: self.scheduler.clone(),
            demand: AtomicU64::new(0),
            count: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
            downstream: Mutex::new(Some(subscriber)),
            pending: Mutex::new(None),
        });
        {
            let mut downstream = this.downstream.lock();
            if let Some(downstream) = downstream.as_mut() {
                downstream.on_subscribe(Subscription::new(this.clone()));
            }
        }
        debug!(period = ?self.period, scheduler = self.scheduler.name(), "interval started");
        this.schedule_next();
    }
}

struct IntervalSubscription {
    period: Duration,
    scheduler: SchedulerRef,
    demand: AtomicU64,
    count: AtomicU64,
    cancelled: AtomicBool,
    downstream: Mutex<Option<BoxSubscriber<u64>>>,
    pending: Mutex<Option<TaskHandle>>,
}

impl IntervalSubscription {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn schedule_next(self: &Arc<Self>) {
        if self.is_cancelled() {
            return;
        }
        let this = self.clone();
        let handle = self.scheduler.schedule(
            self.period,
            Box::new(move || {
                let failing = this.clone();
                scheduler::run_guarded(|| this.tick(), move |err| failing.fail(err));
            }),
        );
        *self.pending.lock() = Some(handle);
    }

    fn tick(self: &Arc<Self>) {
        if self.is_cancelled() {
            self.release();
            return;
        }
        let index = self.count.load(Ordering::Acquire);
        if self.demand.load(Ordering::Acquire) == 0 {
            warn!(index, "interval tick without demand");
            self.fail(FlowError::Overflow(format!(
                "could not emit tick {} due to lack of requests",
                index
            )));
            return;
        }
        demand::produced(&self.demand, 1);
        self.count.store(index + 1, Ordering::Release);
        {
            let mut downstream = self.downstream.lock();
            match downstream.as_mut() {
                Some(subscriber) => subscriber.on_next(index),
                None => return,
            }
        }
        if self.is_cancelled() {
            self.release();
        } else {
            self.schedule_next();
        }
    }

    fn fail(&self, error: FlowError) {
        self.cancelled.store(true, Ordering::Release);
        let subscriber = self.downstream.lock().take();
        if let Some(mut subscriber) = subscriber {
            subscriber.on_error(error);
        }
    }

    fn release(&self) {
        let subscriber = self.downstream.lock().take();
        drop(subscriber);
    }
}

impl Demand for IntervalSubscription {
    fn request(&self, n: u64) {
        if n == 0 {
            debug!("interval ignoring request(0)");
            return;
        }
        demand::add(&self.demand, n);
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(ticks = self.count.load(Ordering::Acquire), "interval cancelled");
        let pending = self.pending.lock().take();
        if let Some(handle) = pending {
            handle.cancel();
        }
        // a tick in progress holds the lock and releases on its own
        let released = self.downstream.try_lock().and_then(|mut downstream| downstream.take());
        drop(released);
    }
}
