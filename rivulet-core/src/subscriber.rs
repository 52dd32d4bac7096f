//! Subscriber contract and subscription handles

use crate::demand::UNBOUNDED;
use crate::error::FlowError;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error};

/// The upstream side of a subscription, implemented by every publisher
/// and operator stage.
pub trait Demand: Send + Sync {
    /// Authorize `n` more items. `n` must be positive.
    fn request(&self, n: u64);

    /// Stop emission. Must be idempotent.
    fn cancel(&self);
}

/// Handle a subscriber uses to pull items and to cancel
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<dyn Demand>,
}

impl Subscription {
    /// Wrap a demand implementation
    pub fn new(inner: Arc<dyn Demand>) -> Self {
        Self { inner }
    }

    /// A subscription that ignores requests and cancellation
    pub fn noop() -> Self {
        Self::new(Arc::new(Noop))
    }

    pub fn request(&self, n: u64) {
        self.inner.request(n);
    }

    pub fn cancel(&self) {
        self.inner.cancel();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Subscription")
    }
}

struct Noop;

impl Demand for Noop {
    fn request(&self, _n: u64) {}
    fn cancel(&self) {}
}

/// Receiver of the four boundary signals.
///
/// Only `on_next` is mandatory. The defaults request unbounded demand on
/// subscribe, log errors, and ignore completion.
pub trait Subscriber<T>: Send + 'static {
    fn on_subscribe(&mut self, subscription: Subscription) {
        subscription.request(UNBOUNDED);
    }

    fn on_next(&mut self, item: T);

    fn on_error(&mut self, error: FlowError) {
        error!(kind = error.as_label(), "unhandled stream error: {}", error);
    }

    fn on_complete(&mut self) {}
}

impl<T, S> Subscriber<T> for Box<S>
where
    S: Subscriber<T> + ?Sized,
{
    fn on_subscribe(&mut self, subscription: Subscription) {
        (**self).on_subscribe(subscription)
    }

    fn on_next(&mut self, item: T) {
        (**self).on_next(item)
    }

    fn on_error(&mut self, error: FlowError) {
        (**self).on_error(error)
    }

    fn on_complete(&mut self) {
        (**self).on_complete()
    }
}

/// Type-erased subscriber
pub type BoxSubscriber<T> = Box<dyn Subscriber<T>>;

/// A stream signal
#[derive(Debug, Clone)]
pub enum Signal<T> {
    Next(T),
    Error(FlowError),
    Complete,
}

impl<T> Signal<T> {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Signal::Next(_))
    }

    /// Signal name as used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Signal::Next(_) => "next",
            Signal::Error(_) => "error",
            Signal::Complete => "complete",
        }
    }
}

/// Cancellation handle returned by the lambda `subscribe_*` helpers
#[derive(Clone, Default)]
pub struct SubscriptionHandle {
    slot: Arc<Mutex<HandleSlot>>,
}

#[derive(Default)]
struct HandleSlot {
    subscription: Option<Subscription>,
    disposed: bool,
}

impl SubscriptionHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the live subscription. Cancels it right away if the handle
    /// was disposed first.
    pub(crate) fn attach(&self, subscription: &Subscription) {
        let mut slot = self.slot.lock();
        if slot.disposed {
            drop(slot);
            subscription.cancel();
            return;
        }
        slot.subscription = Some(subscription.clone());
    }

    /// Mark the subscription as finished without cancelling upstream
    pub(crate) fn release(&self) {
        let mut slot = self.slot.lock();
        slot.disposed = true;
        slot.subscription = None;
    }

    /// Cancel the subscription
    pub fn unsubscribe(&self) {
        let subscription = {
            let mut slot = self.slot.lock();
            slot.disposed = true;
            slot.subscription.take()
        };
        if let Some(subscription) = subscription {
            debug!("subscription handle disposed");
            subscription.cancel();
        }
    }

    /// Check if the subscription is cancelled or terminated
    pub fn is_disposed(&self) -> bool {
        self.slot.lock().disposed
    }
}

type NextFn<T> = Box<dyn FnMut(T) + Send>;
type ErrorFn = Box<dyn FnMut(FlowError) + Send>;
type CompleteFn = Box<dyn FnMut() + Send>;
type SubscribeFn = Box<dyn FnMut(&Subscription) + Send>;

/// Subscriber assembled from closures
///
/// # Example
/// ```
/// use rivulet::{Flux, LambdaSubscriber};
///
/// let subscriber = LambdaSubscriber::new(|n: i64| println!("Number {}", n))
///     .with_complete(|| println!("DONE!"))
///     .with_subscribe(|subscription| subscription.request(3));
/// Flux::range(1, 5).subscribe(subscriber);
/// ```
pub struct LambdaSubscriber<T> {
    on_next: NextFn<T>,
    on_error: Option<ErrorFn>,
    on_complete: Option<CompleteFn>,
    on_subscribe: Option<SubscribeFn>,
    handle: SubscriptionHandle,
}

impl<T: Send + 'static> LambdaSubscriber<T> {
    pub fn new<N>(on_next: N) -> Self
    where
        N: FnMut(T) + Send + 'static,
    {
        Self {
            on_next: Box::new(on_next),
            on_error: None,
            on_complete: None,
            on_subscribe: None,
            handle: SubscriptionHandle::new(),
        }
    }

    pub fn with_error<E>(mut self, on_error: E) -> Self
    where
        E: FnMut(FlowError) + Send + 'static,
    {
        self.on_error = Some(Box::new(on_error));
        self
    }

    pub fn with_complete<C>(mut self, on_complete: C) -> Self
    where
        C: FnMut() + Send + 'static,
    {
        self.on_complete = Some(Box::new(on_complete));
        self
    }

    /// Replace the default unbounded request with custom demand handling
    pub fn with_subscribe<S>(mut self, on_subscribe: S) -> Self
    where
        S: FnMut(&Subscription) + Send + 'static,
    {
        self.on_subscribe = Some(Box::new(on_subscribe));
        self
    }

    /// Handle that cancels this subscriber's subscription
    pub fn handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }
}

impl<T: Send + 'static> Subscriber<T> for LambdaSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Subscription) {
        self.handle.attach(&subscription);
        match self.on_subscribe.as_mut() {
            Some(hook) => hook(&subscription),
            None => subscription.request(UNBOUNDED),
        }
    }

    fn on_next(&mut self, item: T) {
        (self.on_next)(item);
    }

    fn on_error(&mut self, error: FlowError) {
        self.handle.release();
        match self.on_error.as_mut() {
            Some(hook) => hook(error),
            None => error!(kind = error.as_label(), "unhandled stream error: {}", error),
        }
    }

    fn on_complete(&mut self) {
        self.handle.release();
        if let Some(hook) = self.on_complete.as_mut() {
            hook();
        }
    }
}
