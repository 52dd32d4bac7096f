use crate::demand;
use crate::flux::Publisher;
use crate::subscriber::{BoxSubscriber, Demand, Subscription};
use parking_lot::Mutex;
use std::iter::Peekable;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, trace};

pub(crate) type BoxIter<T> = Box<dyn Iterator<Item = T> + Send>;
pub(crate) type IterFactory<T> = Arc<dyn Fn() -> BoxIter<T> + Send + Sync>;

/// Finite (or lazily infinite) source driven by downstream demand
pub(crate) struct IterPublisher<T> {
    factory: IterFactory<T>,
}

impl<T> IterPublisher<T> {
    pub(crate) fn new(factory: IterFactory<T>) -> Self {
        Self { factory }
    }
}

impl<T: Send + 'static> Publisher<T> for IterPublisher<T> {
    fn subscribe(&self, subscriber: BoxSubscriber<T>) {
        IterSubscription::start((self.factory)(), subscriber);
    }
}

struct IterSubscription<T> {
    iter: Mutex<Peekable<BoxIter<T>>>,
    downstream: Mutex<Option<BoxSubscriber<T>>>,
    demand: AtomicU64,
    wip: AtomicUsize,
    cancelled: AtomicBool,
}

impl<T: Send + 'static> IterSubscription<T> {
    fn start(iter: BoxIter<T>, subscriber: BoxSubscriber<T>) {
        // wip starts held so requests made inside on_subscribe only record demand
        let this = Arc::new(Self {
            iter: Mutex::new(iter.peekable()),
            downstream: Mutex::new(Some(subscriber)),
            demand: AtomicU64::new(0),
            wip: AtomicUsize::new(1),
            cancelled: AtomicBool::new(false),
        });
        {
            let mut downstream = this.downstream.lock();
            if let Some(downstream) = downstream.as_mut() {
                downstream.on_subscribe(Subscription::new(this.clone()));
            }
        }
        this.drain_loop();
    }

    fn drain(&self) {
        if self.wip.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }
        self.drain_loop();
    }

    fn drain_loop(&self) {
        let mut missed = 1;
        loop {
            if self.emit_batch() {
                // terminated: keep wip held so no one drains again
                return;
            }
            missed = self.wip.fetch_sub(missed, Ordering::AcqRel) - missed;
            if missed == 0 {
                return;
            }
        }
    }

    /// Emit up to the current demand. Returns true once terminated.
    fn emit_batch(&self) -> bool {
        let requested = self.demand.load(Ordering::Acquire);
        let mut emitted = 0u64;
        let mut iter = self.iter.lock();
        let mut downstream = self.downstream.lock();
        loop {
            if self.cancelled.load(Ordering::Acquire) {
                trace!(emitted, "iterable source cancelled");
                downstream.take();
                return true;
            }
            if iter.peek().is_none() {
                let subscriber = downstream.take();
                drop(downstream);
                if let Some(mut subscriber) = subscriber {
                    subscriber.on_complete();
                }
                return true;
            }
            if emitted == requested {
                break;
            }
            let Some(item) = iter.next() else {
                continue;
            };
            match downstream.as_mut() {
                Some(subscriber) => subscriber.on_next(item),
                None => return true,
            }
            emitted += 1;
        }
        if emitted > 0 {
            demand::produced(&self.demand, emitted);
        }
        false
    }
}

impl<T: Send + 'static> Demand for IterSubscription<T> {
    fn request(&self, n: u64) {
        if n == 0 {
            debug!("iterable source ignoring request(0)");
            return;
        }
        demand::add(&self.demand, n);
        self.drain();
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.drain();
    }
}
