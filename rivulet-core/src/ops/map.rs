use crate::error::FlowError;
use crate::flux::{Flux, Publisher};
use crate::subscriber::{BoxSubscriber, Subscriber, Subscription};
use std::convert::Infallible;
use std::error::Error as StdError;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::trace;

impl<T: Send + 'static> Flux<T> {
    /// Transform every item with `f`
    pub fn map<U, F>(&self, f: F) -> Flux<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        self.try_map(move |item| Ok::<U, Infallible>(f(item)))
    }

    /// Transform every item with a fallible `f`
    ///
    /// The first `Err` cancels upstream and terminates the stream with
    /// [`FlowError::Upstream`].
    pub fn try_map<U, E, F>(&self, f: F) -> Flux<U>
    where
        U: Send + 'static,
        E: StdError + Send + Sync + 'static,
        F: Fn(T) -> Result<U, E> + Send + Sync + 'static,
    {
        Flux::from_publisher(MapPublisher {
            source: self.clone(),
            f: Arc::new(f),
            _marker: PhantomData,
        })
    }
}

struct MapPublisher<T, U, E, F> {
    source: Flux<T>,
    f: Arc<F>,
    _marker: PhantomData<fn() -> (U, E)>,
}

impl<T, U, E, F> Publisher<U> for MapPublisher<T, U, E, F>
where
    T: Send + 'static,
    U: Send + 'static,
    E: StdError + Send + Sync + 'static,
    F: Fn(T) -> Result<U, E> + Send + Sync + 'static,
{
    fn subscribe(&self, subscriber: BoxSubscriber<U>) {
        self.source.subscribe_raw(Box::new(MapSubscriber {
            downstream: subscriber,
            f: self.f.clone(),
            upstream: None,
            done: false,
            _marker: PhantomData,
        }));
    }
}

struct MapSubscriber<T, U, E, F> {
    downstream: BoxSubscriber<U>,
    f: Arc<F>,
    upstream: Option<Subscription>,
    done: bool,
    _marker: PhantomData<fn(T) -> E>,
}

impl<T, U, E, F> Subscriber<T> for MapSubscriber<T, U, E, F>
where
    T: Send + 'static,
    U: Send + 'static,
    E: StdError + Send + Sync + 'static,
    F: Fn(T) -> Result<U, E> + Send + Sync + 'static,
{
    fn on_subscribe(&mut self, subscription: Subscription) {
        self.upstream = Some(subscription.clone());
        self.downstream.on_subscribe(subscription);
    }

    fn on_next(&mut self, item: T) {
        if self.done {
            trace!("map dropped item after failure");
            return;
        }
        match (self.f)(item) {
            Ok(mapped) => self.downstream.on_next(mapped),
            Err(err) => {
                self.done = true;
                if let Some(upstream) = self.upstream.take() {
                    upstream.cancel();
                }
                self.downstream.on_error(FlowError::upstream(err));
            }
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
