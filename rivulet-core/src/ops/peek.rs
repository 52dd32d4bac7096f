//! Side-effect stages: `observe`, the `do_on_*` family and `log`

use crate::error::FlowError;
use crate::flux::{Flux, Publisher};
use crate::subscriber::{BoxSubscriber, Demand, Subscriber, Subscription};
use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Hooks invoked as signals pass through an [`observe`](Flux::observe) stage
///
/// Every method defaults to a no-op. `on_dropped` fires for signals that
/// reach the stage after it already terminated.
pub trait SignalObserver<T>: Send + Sync + 'static {
    fn on_subscribe(&self) {}

    fn on_request(&self, _n: u64) {}

    fn on_next(&self, _item: &T) {}

    fn on_error(&self, _error: &FlowError) {}

    fn on_complete(&self) {}

    fn on_cancel(&self) {}

    fn on_dropped(&self, _signal: &'static str) {}
}

pub(crate) type ObserverFactory<T> = Arc<dyn Fn() -> Arc<dyn SignalObserver<T>> + Send + Sync>;

impl<T: Send + 'static> Flux<T> {
    /// Attach an observer shared by every subscription
    pub fn observe(&self, observer: Arc<dyn SignalObserver<T>>) -> Flux<T> {
        self.observe_with(Arc::new(move || observer.clone()))
    }

    /// Attach a fresh observer per subscription
    pub(crate) fn observe_with(&self, factory: ObserverFactory<T>) -> Flux<T> {
        Flux::from_publisher(PeekPublisher {
            source: self.clone(),
            factory,
        })
    }

    pub fn do_on_subscribe<F>(&self, f: F) -> Flux<T>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.observe(Arc::new(OnSubscribe(f)))
    }

    /// Run `f` with every amount requested from upstream
    pub fn do_on_request<F>(&self, f: F) -> Flux<T>
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        self.observe(Arc::new(OnRequest(f)))
    }

    pub fn do_on_next<F>(&self, f: F) -> Flux<T>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.observe(Arc::new(OnNext(f)))
    }

    pub fn do_on_error<F>(&self, f: F) -> Flux<T>
    where
        F: Fn(&FlowError) + Send + Sync + 'static,
    {
        self.observe(Arc::new(OnError(f)))
    }

    pub fn do_on_complete<F>(&self, f: F) -> Flux<T>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.observe(Arc::new(OnComplete(f)))
    }

    pub fn do_on_cancel<F>(&self, f: F) -> Flux<T>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.observe(Arc::new(OnCancel(f)))
    }

    /// Log every signal at info level under `category`
    pub fn log(&self, category: impl Into<String>) -> Flux<T>
    where
        T: Debug,
    {
        self.observe(Arc::new(SignalLogger {
            category: category.into(),
        }))
    }
}

struct OnSubscribe<F>(F);

impl<T, F: Fn() + Send + Sync + 'static> SignalObserver<T> for OnSubscribe<F> {
    fn on_subscribe(&self) {
        (self.0)()
    }
}

struct OnRequest<F>(F);

impl<T, F: Fn(u64) + Send + Sync + 'static> SignalObserver<T> for OnRequest<F> {
    fn on_request(&self, n: u64) {
        (self.0)(n)
    }
}

struct OnNext<F>(F);

impl<T, F: Fn(&T) + Send + Sync + 'static> SignalObserver<T> for OnNext<F> {
    fn on_next(&self, item: &T) {
        (self.0)(item)
    }
}

struct OnError<F>(F);

impl<T, F: Fn(&FlowError) + Send + Sync + 'static> SignalObserver<T> for OnError<F> {
    fn on_error(&self, error: &FlowError) {
        (self.0)(error)
    }
}

struct OnComplete<F>(F);

impl<T, F: Fn() + Send + Sync + 'static> SignalObserver<T> for OnComplete<F> {
    fn on_complete(&self) {
        (self.0)()
    }
}

struct OnCancel<F>(F);

impl<T, F: Fn() + Send + Sync + 'static> SignalObserver<T> for OnCancel<F> {
    fn on_cancel(&self) {
        (self.0)()
    }
}

/// Observer behind [`Flux::log`]
pub(crate) struct SignalLogger {
    pub(crate) category: String,
}

impl<T: Debug> SignalObserver<T> for SignalLogger {
    fn on_subscribe(&self) {
        info!(category = %self.category, "onSubscribe");
    }

    fn on_request(&self, n: u64) {
        if n == u64::MAX {
            info!(category = %self.category, "request(unbounded)");
        } else {
            info!(category = %self.category, "request({})", n);
        }
    }

    fn on_next(&self, item: &T) {
        info!(category = %self.category, "onNext({:?})", item);
    }

    fn on_error(&self, error: &FlowError) {
        info!(category = %self.category, "onError({})", error);
    }

    fn on_complete(&self) {
        info!(category = %self.category, "onComplete()");
    }

    fn on_cancel(&self) {
        info!(category = %self.category, "cancel()");
    }

    fn on_dropped(&self, signal: &'static str) {
        warn!(category = %self.category, signal, "signal dropped after terminal");
    }
}

struct PeekPublisher<T> {
    source: Flux<T>,
    factory: ObserverFactory<T>,
}

impl<T: Send + 'static> Publisher<T> for PeekPublisher<T> {
    fn subscribe(&self, subscriber: BoxSubscriber<T>) {
        self.source.subscribe_raw(Box::new(PeekSubscriber {
            downstream: subscriber,
            observer: (self.factory)(),
            terminated: false,
        }));
    }
}

struct PeekDemand<T> {
    upstream: Subscription,
    observer: Arc<dyn SignalObserver<T>>,
    cancelled: AtomicBool,
}

impl<T: Send + 'static> Demand for PeekDemand<T> {
    fn request(&self, n: u64) {
        if n == 0 {
            debug!("peek ignoring request(0)");
            return;
        }
        self.observer.on_request(n);
        self.upstream.request(n);
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        self.observer.on_cancel();
        self.upstream.cancel();
    }
}

struct PeekSubscriber<T> {
    downstream: BoxSubscriber<T>,
    observer: Arc<dyn SignalObserver<T>>,
    terminated: bool,
}

impl<T: Send + 'static> PeekSubscriber<T> {
    fn dropped(&self, signal: &'static str) {
        warn!(signal, "observe stage received signal after terminal");
        self.observer.on_dropped(signal);
    }
}

impl<T: Send + 'static> Subscriber<T> for PeekSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Subscription) {
        self.observer.on_subscribe();
        let demand = PeekDemand {
            upstream: subscription,
            observer: self.observer.clone(),
            cancelled: AtomicBool::new(false),
        };
        self.downstream.on_subscribe(Subscription::new(Arc::new(demand)));
    }

    fn on_next(&mut self, item: T) {
        if self.terminated {
            self.dropped("next");
            return;
        }
        self.observer.on_next(&item);
        self.downstream.on_next(item);
    }

    fn on_error(&mut self, error: FlowError) {
        if self.terminated {
            self.dropped("error");
            return;
        }
        self.terminated = true;
        self.observer.on_error(&error);
        self.downstream.on_error(error);
    }

    fn on_complete(&mut self) {
        if self.terminated {
            self.dropped("complete");
            return;
        }
        self.terminated = true;
        self.observer.on_complete();
        self.downstream.on_complete();
    }
}
