//! Flux: a cold, reusable publisher of 0..N items

use crate::error::FlowError;
use crate::guard::Guarded;
use crate::subscriber::{BoxSubscriber, LambdaSubscriber, Subscriber, SubscriptionHandle};
use std::sync::Arc;

/// A source of signals for any number of independent subscribers
pub trait Publisher<T>: Send + Sync + 'static {
    /// Attach `subscriber`. Implementations must call `on_subscribe` before
    /// any other signal and emit only what has been requested.
    fn subscribe(&self, subscriber: BoxSubscriber<T>);
}

/// A cold publisher description, cheap to clone
///
/// Every subscription replays the sequence from the start.
///
/// # Example
/// ```
/// use rivulet::Flux;
///
/// let flux = Flux::range(1, 5).map(|n| n * 10);
/// flux.subscribe_next(|n| println!("Number {}", n));
/// flux.subscribe_next(|n| println!("Again {}", n));
/// ```
pub struct Flux<T> {
    source: Arc<dyn Publisher<T>>,
}

impl<T> Clone for Flux<T> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
        }
    }
}

impl<T: Send + 'static> Flux<T> {
    /// Create a Flux from a custom publisher
    pub fn from_publisher<P>(publisher: P) -> Self
    where
        P: Publisher<T>,
    {
        Self {
            source: Arc::new(publisher),
        }
    }

    /// Subscribe with a full subscriber
    ///
    /// The subscriber is wrapped in a guard that serializes its callbacks and
    /// fails the stream if items arrive beyond the requested demand.
    pub fn subscribe<S>(&self, subscriber: S)
    where
        S: Subscriber<T>,
    {
        self.source.subscribe(Box::new(Guarded::new(Box::new(subscriber))));
    }

    /// Subscribe an operator stage without the user-facing guard
    pub(crate) fn subscribe_raw(&self, subscriber: BoxSubscriber<T>) {
        self.source.subscribe(subscriber);
    }

    /// Subscribe with only a next callback (unbounded demand)
    pub fn subscribe_next<N>(&self, on_next: N) -> SubscriptionHandle
    where
        N: FnMut(T) + Send + 'static,
    {
        self.subscribe_lambda(LambdaSubscriber::new(on_next))
    }

    /// Subscribe with next/error/complete callbacks (unbounded demand)
    pub fn subscribe_with<N, E, C>(
        &self,
        on_next: N,
        on_error: E,
        on_complete: C,
    ) -> SubscriptionHandle
    where
        N: FnMut(T) + Send + 'static,
        E: FnMut(FlowError) + Send + 'static,
        C: FnMut() + Send + 'static,
    {
        self.subscribe_lambda(
            LambdaSubscriber::new(on_next)
                .with_error(on_error)
                .with_complete(on_complete),
        )
    }

    /// Subscribe a lambda subscriber, returning its cancellation handle
    pub fn subscribe_lambda(&self, subscriber: LambdaSubscriber<T>) -> SubscriptionHandle {
        let handle = subscriber.handle();
        self.subscribe(subscriber);
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_cold_replay() {
        let flux = Flux::just(vec![1, 2, 3]);
        let first = Arc::new(Mutex::new(Vec::new()));
        let second = Arc::new(Mutex::new(Vec::new()));

        let sink = first.clone();
        flux.subscribe_next(move |v| sink.lock().push(v));
        let sink = second.clone();
        flux.subscribe_next(move |v| sink.lock().push(v));

        assert_eq!(*first.lock(), vec![1, 2, 3]);
        assert_eq!(*second.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn test_subscribe_with_callbacks() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let (on_next, on_error, on_complete) = (events.clone(), events.clone(), events.clone());

        let handle = Flux::range(1, 2).subscribe_with(
            move |v| on_next.lock().push(format!("next {}", v)),
            move |e| on_error.lock().push(format!("error {}", e)),
            move || on_complete.lock().push("complete".to_string()),
        );

        assert_eq!(*events.lock(), vec!["next 1", "next 2", "complete"]);
        assert!(handle.is_disposed());
    }
}
