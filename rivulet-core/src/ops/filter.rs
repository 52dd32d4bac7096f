use crate::error::FlowError;
use crate::flux::{Flux, Publisher};
use crate::subscriber::{BoxSubscriber, Subscriber, Subscription};
use std::sync::Arc;
use tracing::trace;

impl<T: Send + 'static> Flux<T> {
    /// Keep only the items matching `predicate`
    ///
    /// Every rejected item is replaced with a `request(1)` upstream, so the
    /// downstream demand is still met.
    pub fn filter<P>(&self, predicate: P) -> Flux<T>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Flux::from_publisher(FilterPublisher {
            source: self.clone(),
            predicate: Arc::new(predicate),
        })
    }
}

struct FilterPublisher<T, P> {
    source: Flux<T>,
    predicate: Arc<P>,
}

impl<T, P> Publisher<T> for FilterPublisher<T, P>
where
    T: Send + 'static,
    P: Fn(&T) -> bool + Send + Sync + 'static,
{
    fn subscribe(&self, subscriber: BoxSubscriber<T>) {
        self.source.subscribe_raw(Box::new(FilterSubscriber {
            downstream: subscriber,
            predicate: self.predicate.clone(),
            upstream: None,
        }));
    }
}

struct FilterSubscriber<T, P> {
    downstream: BoxSubscriber<T>,
    predicate: Arc<P>,
    upstream: Option<Subscription>,
}

impl<T, P> Subscriber<T> for FilterSubscriber<T, P>
where
    T: Send + 'static,
    P: Fn(&T) -> bool + Send + Sync + 'static,
{
    fn on_subscribe(&mut self, subscription: Subscription) {
        self.upstream = Some(subscription.clone());
        self.downstream.on_subscribe(subscription);
    }

    fn on_next(&mut self, item: T) {
        if (self.predicate)(&item) {
            self.downstream.on_next(item);
            return;
        }
        trace!("filter rejected item");
        if let Some(upstream) = &self.upstream {
            upstream.request(1);
        }
    }

    fn on_error(&mut self, error: FlowError) {
        self.upstream = None;
        self.downstream.on_error(error);
    }

    fn on_complete(&mut self) {
        self.upstream = None;
        self.downstream.on_complete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscriber::LambdaSubscriber;
    use parking_lot::Mutex;

    #[test]
    fn test_filter_with_bounded_demand() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let done = Arc::new(Mutex::new(false));
        let (sink, flag) = (seen.clone(), done.clone());

        Flux::range(1, 10).filter(|n| n % 2 == 0).subscribe(
            LambdaSubscriber::new(move |n| sink.lock().push(n))
                .with_complete(move || *flag.lock() = true)
                .with_subscribe(|s: &Subscription| s.request(3)),
        );

        assert_eq!(*seen.lock(), vec![2, 4, 6]);
        assert!(!*done.lock());
    }
}
