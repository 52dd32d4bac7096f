use crate::demand::UNBOUNDED;
use crate::error::FlowError;
use crate::flux::{Flux, Publisher};
use crate::guard::SerialSink;
use crate::subscriber::{BoxSubscriber, Demand, Subscriber, Subscription};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

impl<T: Send + 'static> Flux<T> {
    /// On error, continue with the Flux returned by `handler`
    ///
    /// Demand not yet satisfied by the failed source is requested from the
    /// fallback, so downstream sees a single uninterrupted stream.
    pub fn on_error_resume<F>(&self, handler: F) -> Flux<T>
    where
        F: Fn(FlowError) -> Flux<T> + Send + Sync + 'static,
    {
        Flux::from_publisher(ResumePublisher {
            source: self.clone(),
            handler: Arc::new(handler),
        })
    }

    /// On error, emit `value` and complete
    pub fn on_error_return(&self, value: T) -> Flux<T>
    where
        T: Clone + Sync,
    {
        self.on_error_resume(move |error| {
            debug!(kind = error.as_label(), "replacing error with fallback value");
            Flux::just([value.clone()])
        })
    }
}

type Handler<T> = Arc<dyn Fn(FlowError) -> Flux<T> + Send + Sync>;

struct ResumePublisher<T> {
    source: Flux<T>,
    handler: Handler<T>,
}

impl<T: Send + 'static> Publisher<T> for ResumePublisher<T> {
    fn subscribe(&self, subscriber: BoxSubscriber<T>) {
        let arbiter = Arc::new(Arbiter {
            sink: SerialSink::new(subscriber),
            slot: Mutex::new(ArbiterSlot {
                current: None,
                outstanding: 0,
            }),
            cancelled: AtomicBool::new(false),
        });
        self.source.subscribe_raw(Box::new(MainSubscriber {
            arbiter,
            handler: self.handler.clone(),
        }));
    }
}

struct ArbiterSlot {
    current: Option<Subscription>,
    /// Requested downstream and not yet delivered
    outstanding: u64,
}

/// Hands downstream demand to whichever source is currently active
struct Arbiter<T> {
    sink: Arc<SerialSink<T>>,
    slot: Mutex<ArbiterSlot>,
    cancelled: AtomicBool,
}

impl<T: Send + 'static> Arbiter<T> {
    /// Switch to `subscription`, requesting whatever demand is outstanding
    fn set(&self, subscription: Subscription) {
        let outstanding = {
            let mut slot = self.slot.lock();
            if self.cancelled.load(Ordering::Acquire) {
                drop(slot);
                subscription.cancel();
                return;
            }
            slot.current = Some(subscription.clone());
            slot.outstanding
        };
        if outstanding > 0 {
            subscription.request(outstanding);
        }
    }

    fn next(&self, item: T) {
        {
            let mut slot = self.slot.lock();
            if slot.outstanding != UNBOUNDED {
                slot.outstanding = slot.outstanding.saturating_sub(1);
            }
        }
        self.sink.next(item);
    }

    fn clear(&self) {
        self.slot.lock().current = None;
    }
}

impl<T: Send + 'static> Demand for Arbiter<T> {
    fn request(&self, n: u64) {
        if n == 0 {
            debug!("on_error_resume ignoring request(0)");
            return;
        }
        let current = {
            let mut slot = self.slot.lock();
            slot.outstanding = slot.outstanding.saturating_add(n);
            slot.current.clone()
        };
        if let Some(current) = current {
            current.request(n);
        }
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        let current = self.slot.lock().current.take();
        if let Some(current) = current {
            current.cancel();
        }
        self.sink.cancel();
    }
}

struct MainSubscriber<T> {
    arbiter: Arc<Arbiter<T>>,
    handler: Handler<T>,
}

impl<T: Send + 'static> Subscriber<T> for MainSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Subscription) {
        self.arbiter.slot.lock().current = Some(subscription);
        self.arbiter
            .sink
            .on_subscribe(Subscription::new(self.arbiter.clone()));
    }

    fn on_next(&mut self, item: T) {
        self.arbiter.next(item);
    }

    fn on_error(&mut self, error: FlowError) {
        self.arbiter.clear();
        if self.arbiter.cancelled.load(Ordering::Acquire) {
            return;
        }
        debug!(kind = error.as_label(), "resuming after error");
        let fallback = (self.handler)(error);
        fallback.subscribe_raw(Box::new(FallbackSubscriber {
            arbiter: self.arbiter.clone(),
        }));
    }

    fn on_complete(&mut self) {
        self.arbiter.clear();
        self.arbiter.sink.complete();
    }
}

struct FallbackSubscriber<T> {
    arbiter: Arc<Arbiter<T>>,
}

impl<T: Send + 'static> Subscriber<T> for FallbackSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Subscription) {
        self.arbiter.set(subscription);
    }

    fn on_next(&mut self, item: T) {
        self.arbiter.next(item);
    }

    fn on_error(&mut self, error: FlowError) {
        self.arbiter.clear();
        self.arbiter.sink.error(error);
    }

    fn on_complete(&mut self) {
        self.arbiter.clear();
        self.arbiter.sink.complete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscriber::LambdaSubscriber;

    fn failing_after_two() -> Flux<i64> {
        Flux::range(1, 5).try_map(|n| {
            if n == 3 {
                Err(std::io::Error::other("bad element"))
            } else {
                Ok(n)
            }
        })
    }

    #[test]
    fn test_resume_switches_to_fallback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        failing_after_two()
            .on_error_resume(|_| Flux::range(100, 3))
            .subscribe_next(move |n| sink.lock().push(n));
        assert_eq!(*seen.lock(), vec![1, 2, 100, 101, 102]);
    }

    #[test]
    fn test_resume_carries_outstanding_demand() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        failing_after_two()
            .on_error_resume(|_| Flux::range(100, 10))
            .subscribe(
                LambdaSubscriber::new(move |n| sink.lock().push(n))
                    .with_subscribe(|s: &Subscription| s.request(4)),
            );
        assert_eq!(*seen.lock(), vec![1, 2, 100, 101]);
    }

    #[test]
    fn test_on_error_return() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let completed = Arc::new(AtomicBool::new(false));
        let (sink, flag) = (seen.clone(), completed.clone());

        Flux::<&str>::error(FlowError::msg("boom"))
            .on_error_return("fallback")
            .subscribe_with(
                move |v| sink.lock().push(v),
                |e| panic!("unexpected {}", e),
                move || flag.store(true, Ordering::SeqCst),
            );

        assert_eq!(*seen.lock(), vec!["fallback"]);
        assert!(completed.load(Ordering::SeqCst));
    }
}
