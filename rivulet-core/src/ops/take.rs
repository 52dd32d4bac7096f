use crate::error::FlowError;
use crate::flux::{Flux, Publisher};
use crate::subscriber::{BoxSubscriber, Demand, Subscriber, Subscription};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, trace};

impl<T: Send + 'static> Flux<T> {
    /// Forward the first `n` items, then cancel upstream and complete
    ///
    /// Upstream never sees more than `n` items requested in total.
    pub fn take(&self, n: u64) -> Flux<T> {
        Flux::from_publisher(TakePublisher {
            source: self.clone(),
            limit: n,
        })
    }
}

struct TakePublisher<T> {
    source: Flux<T>,
    limit: u64,
}

impl<T: Send + 'static> Publisher<T> for TakePublisher<T> {
    fn subscribe(&self, subscriber: BoxSubscriber<T>) {
        self.source.subscribe_raw(Box::new(TakeSubscriber {
            downstream: subscriber,
            limit: self.limit,
            received: 0,
            done: false,
            upstream: None,
        }));
    }
}

/// Caps the total demand passed upstream at the take limit
struct TakeDemand {
    requestable: Mutex<u64>,
    upstream: Subscription,
}

impl Demand for TakeDemand {
    fn request(&self, n: u64) {
        if n == 0 {
            debug!("take ignoring request(0)");
            return;
        }
        let grant = {
            let mut requestable = self.requestable.lock();
            let grant = n.min(*requestable);
            *requestable -= grant;
            grant
        };
        if grant > 0 {
            self.upstream.request(grant);
        }
    }

    fn cancel(&self) {
        self.upstream.cancel();
    }
}

struct TakeSubscriber<T> {
    downstream: BoxSubscriber<T>,
    limit: u64,
    received: u64,
    done: bool,
    upstream: Option<Subscription>,
}

impl<T: Send + 'static> Subscriber<T> for TakeSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Subscription) {
        if self.limit == 0 {
            debug!("take(0) completes immediately");
            self.done = true;
            subscription.cancel();
            self.downstream.on_subscribe(Subscription::noop());
            self.downstream.on_complete();
            return;
        }
        self.upstream = Some(subscription.clone());
        let capped = TakeDemand {
            requestable: Mutex::new(self.limit),
            upstream: subscription,
        };
        self.downstream.on_subscribe(Subscription::new(Arc::new(capped)));
    }

    fn on_next(&mut self, item: T) {
        if self.done {
            trace!("take dropped item past limit");
            return;
        }
        self.received += 1;
        self.downstream.on_next(item);
        if self.received == self.limit {
            self.done = true;
            if let Some(upstream) = self.upstream.take() {
                upstream.cancel();
            }
            self.downstream.on_complete();
        }
    }

    fn on_error(&mut self, error: FlowError) {
        if self.done {
            return;
        }
        self.done = true;
        self.upstream = None;
        self.downstream.on_error(error);
    }

    fn on_complete(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        self.upstream = None;
        self.downstream.on_complete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn test_take_caps_upstream_demand() {
        let requested = Arc::new(AtomicU64::new(0));
        let counter = requested.clone();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        Flux::range(1, 100)
            .do_on_request(move |n| {
                counter.fetch_add(n.min(1_000), Ordering::SeqCst);
            })
            .take(3)
            .subscribe_next(move |n| sink.lock().push(n));

        assert_eq!(*seen.lock(), vec![1, 2, 3]);
        assert_eq!(requested.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_take_zero_completes_immediately() {
        let completed = Arc::new(Mutex::new(false));
        let flag = completed.clone();
        Flux::range(1, 5)
            .take(0)
            .subscribe_with(|_| panic!("no items"), |_| {}, move || *flag.lock() = true);
        assert!(*completed.lock());
    }
}
