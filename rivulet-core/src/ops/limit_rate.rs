use crate::demand::UNBOUNDED;
use crate::error::FlowError;
use crate::flux::{Flux, Publisher};
use crate::subscriber::{BoxSubscriber, Demand, Subscriber, Subscription};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, trace};

impl<T: Send + 'static> Flux<T> {
    /// Split downstream demand into upstream requests of at most `n`
    ///
    /// The next batch is requested once the previous one has been fully
    /// delivered and downstream still wants more. A zero `n` is treated as 1.
    pub fn limit_rate(&self, n: u64) -> Flux<T> {
        Flux::from_publisher(LimitRatePublisher {
            source: self.clone(),
            batch: n.max(1),
        })
    }
}

struct LimitRatePublisher<T> {
    source: Flux<T>,
    batch: u64,
}

impl<T: Send + 'static> Publisher<T> for LimitRatePublisher<T> {
    fn subscribe(&self, subscriber: BoxSubscriber<T>) {
        let limiter = Arc::new(RateLimiter {
            batch: self.batch,
            counters: Mutex::new(RateCounters {
                wanted: 0,
                outstanding: 0,
            }),
            upstream: Mutex::new(None),
        });
        self.source.subscribe_raw(Box::new(LimitRateSubscriber {
            downstream: subscriber,
            limiter,
        }));
    }
}

struct RateCounters {
    /// Downstream demand not yet delivered
    wanted: u64,
    /// Requested upstream and not yet received
    outstanding: u64,
}

struct RateLimiter {
    batch: u64,
    counters: Mutex<RateCounters>,
    upstream: Mutex<Option<Subscription>>,
}

impl RateLimiter {
    fn replenish(&self) {
        let grant = {
            let mut counters = self.counters.lock();
            if counters.outstanding > 0 || counters.wanted == 0 {
                return;
            }
            let grant = self.batch.min(counters.wanted);
            counters.outstanding = grant;
            grant
        };
        let upstream = self.upstream.lock().clone();
        if let Some(upstream) = upstream {
            trace!(grant, "limit_rate requesting batch");
            upstream.request(grant);
        }
    }

    fn received(&self) {
        let mut counters = self.counters.lock();
        counters.outstanding = counters.outstanding.saturating_sub(1);
        if counters.wanted != UNBOUNDED {
            counters.wanted = counters.wanted.saturating_sub(1);
        }
    }
}

impl Demand for RateLimiter {
    fn request(&self, n: u64) {
        if n == 0 {
            debug!("limit_rate ignoring request(0)");
            return;
        }
        {
            let mut counters = self.counters.lock();
            counters.wanted = counters.wanted.saturating_add(n);
        }
        self.replenish();
    }

    fn cancel(&self) {
        let upstream = self.upstream.lock().take();
        if let Some(upstream) = upstream {
            upstream.cancel();
        }
    }
}

struct LimitRateSubscriber<T> {
    downstream: BoxSubscriber<T>,
    limiter: Arc<RateLimiter>,
}

impl<T: Send + 'static> Subscriber<T> for LimitRateSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Subscription) {
        *self.limiter.upstream.lock() = Some(subscription);
        self.downstream
            .on_subscribe(Subscription::new(self.limiter.clone()));
        self.limiter.replenish();
    }

    fn on_next(&mut self, item: T) {
        self.limiter.received();
        self.downstream.on_next(item);
        self.limiter.replenish();
    }

    fn on_error(&mut self, error: FlowError) {
        self.limiter.upstream.lock().take();
        self.downstream.on_error(error);
    }

    fn on_complete(&mut self) {
        self.limiter.upstream.lock().take();
        self.downstream.on_complete();
    }
}
