//! Source publishers: just, range, from_iter, interval, error, empty, never, defer

mod interval;
mod iter;

use crate::error::FlowError;
use crate::flux::{Flux, Publisher};
use crate::scheduler::SchedulerRef;
use crate::subscriber::{BoxSubscriber, Subscription};
use interval::IntervalPublisher;
use iter::{BoxIter, IterPublisher};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

impl<T: Send + 'static> Flux<T> {
    /// Emit the given values, then complete
    pub fn just<I>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Clone + Sync,
    {
        let values: Arc<Vec<T>> = Arc::new(values.into_iter().collect());
        Flux::from_publisher(IterPublisher::new(Arc::new(move || {
            let values = Arc::clone(&values);
            Box::new((0..values.len()).map(move |i| values[i].clone())) as BoxIter<T>
        })))
    }

    /// Emit every item of `iterable`, then complete. The collection is
    /// cloned for each subscription.
    pub fn from_iter<I>(iterable: I) -> Self
    where
        I: IntoIterator<Item = T> + Clone + Send + Sync + 'static,
        I::IntoIter: Send + 'static,
    {
        Flux::from_publisher(IterPublisher::new(Arc::new(move || {
            Box::new(iterable.clone().into_iter()) as BoxIter<T>
        })))
    }

    /// Terminate with `error` right after subscription
    pub fn error(error: FlowError) -> Self {
        Flux::from_publisher(ErrorPublisher { error })
    }

    /// Complete right after subscription
    pub fn empty() -> Self {
        Flux::from_publisher(EmptyPublisher)
    }

    /// Never signal anything after subscription
    pub fn never() -> Self {
        Flux::from_publisher(NeverPublisher)
    }

    /// Build a fresh Flux for every subscription
    pub fn defer<F>(factory: F) -> Self
    where
        F: Fn() -> Flux<T> + Send + Sync + 'static,
    {
        Flux::from_publisher(DeferPublisher {
            factory: Box::new(factory),
        })
    }
}

impl Flux<i64> {
    /// Emit `start, start + 1, ..., start + count - 1`, then complete
    ///
    /// A range whose last value does not fit in `i64` fails with
    /// [`FlowError::InvalidArgument`] before emitting anything.
    pub fn range(start: i64, count: u64) -> Self {
        let fits = count == 0
            || i64::try_from(count - 1)
                .ok()
                .and_then(|span| start.checked_add(span))
                .is_some();
        if !fits {
            warn!(start, count, "range overflows i64");
            return Flux::error(FlowError::InvalidArgument(format!(
                "range({}, {}) overflows i64",
                start, count
            )));
        }
        Flux::from_publisher(IterPublisher::new(Arc::new(move || {
            Box::new((0..count).map(move |offset| start + offset as i64)) as BoxIter<i64>
        })))
    }
}

impl Flux<u64> {
    /// Emit 0, 1, 2, ... every `period` on `scheduler`, starting one period
    /// after subscription. Never completes.
    ///
    /// A tick that finds no outstanding demand fails the stream with
    /// [`FlowError::Overflow`].
    pub fn interval(period: Duration, scheduler: SchedulerRef) -> Self {
        Flux::from_publisher(IntervalPublisher::new(period, scheduler))
    }
}

struct ErrorPublisher {
    error: FlowError,
}

impl<T: Send + 'static> Publisher<T> for ErrorPublisher {
    fn subscribe(&self, mut subscriber: BoxSubscriber<T>) {
        subscriber.on_subscribe(Subscription::noop());
        subscriber.on_error(self.error.clone());
    }
}

struct EmptyPublisher;

impl<T: Send + 'static> Publisher<T> for EmptyPublisher {
    fn subscribe(&self, mut subscriber: BoxSubscriber<T>) {
        subscriber.on_subscribe(Subscription::noop());
        subscriber.on_complete();
    }
}

struct NeverPublisher;

impl<T: Send + 'static> Publisher<T> for NeverPublisher {
    fn subscribe(&self, mut subscriber: BoxSubscriber<T>) {
        subscriber.on_subscribe(Subscription::noop());
    }
}

type FluxFactory<T> = Box<dyn Fn() -> Flux<T> + Send + Sync>;

struct DeferPublisher<T> {
    factory: FluxFactory<T>,
}

impl<T: Send + 'static> Publisher<T> for DeferPublisher<T> {
    fn subscribe(&self, subscriber: BoxSubscriber<T>) {
        (self.factory)().subscribe_raw(subscriber);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscriber::{Signal, Subscriber};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Requests `initial` on subscribe and records everything
    struct Recorder<T> {
        signals: Arc<Mutex<Vec<Signal<T>>>>,
        subscription: Arc<Mutex<Option<Subscription>>>,
        initial: u64,
    }

    impl<T: Send + 'static> Subscriber<T> for Recorder<T> {
        fn on_subscribe(&mut self, subscription: Subscription) {
            if self.initial > 0 {
                subscription.request(self.initial);
            }
            *self.subscription.lock() = Some(subscription);
        }

        fn on_next(&mut self, item: T) {
            self.signals.lock().push(Signal::Next(item));
        }

        fn on_error(&mut self, error: FlowError) {
            self.signals.lock().push(Signal::Error(error));
        }

        fn on_complete(&mut self) {
            self.signals.lock().push(Signal::Complete);
        }
    }

    type Recorded<T> = (Arc<Mutex<Vec<Signal<T>>>>, Arc<Mutex<Option<Subscription>>>);

    fn record<T: Send + 'static>(flux: &Flux<T>, initial: u64) -> Recorded<T> {
        let signals = Arc::new(Mutex::new(Vec::new()));
        let subscription = Arc::new(Mutex::new(None));
        flux.subscribe(Recorder {
            signals: signals.clone(),
            subscription: subscription.clone(),
            initial,
        });
        (signals, subscription)
    }

    fn nexts<T: Clone>(signals: &[Signal<T>]) -> Vec<T> {
        signals
            .iter()
            .filter_map(|s| match s {
                Signal::Next(v) => Some(v.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_range_emits_only_requested() {
        let (signals, subscription) = record(&Flux::range(1, 5), 2);
        assert_eq!(nexts(&signals.lock()), vec![1, 2]);

        subscription.lock().clone().unwrap().request(2);
        assert_eq!(nexts(&signals.lock()), vec![1, 2, 3, 4]);
        assert!(!signals.lock().iter().any(Signal::is_terminal));
    }

    #[test]
    fn test_complete_right_after_last_item() {
        let (signals, _) = record(&Flux::range(1, 3), 3);
        let signals = signals.lock();
        assert_eq!(nexts(&signals), vec![1, 2, 3]);
        assert!(matches!(signals.last(), Some(Signal::Complete)));
    }

    #[test]
    fn test_empty_completes_without_request() {
        let (signals, _) = record(&Flux::<i32>::empty(), 0);
        assert!(matches!(signals.lock().as_slice(), [Signal::Complete]));

        let (signals, _) = record(&Flux::range(1, 0), 0);
        assert!(matches!(signals.lock().as_slice(), [Signal::Complete]));
    }

    #[test]
    fn test_error_source() {
        let (signals, _) = record(&Flux::<i32>::error(FlowError::msg("boom")), 0);
        assert!(matches!(signals.lock().as_slice(), [Signal::Error(_)]));
    }

    #[test]
    fn test_range_overflow_fails_before_first_item() {
        let (signals, _) = record(&Flux::range(i64::MAX, 2), 10);
        assert!(matches!(
            signals.lock().as_slice(),
            [Signal::Error(FlowError::InvalidArgument(_))]
        ));

        let (signals, _) = record(&Flux::range(0, u64::MAX), 10);
        assert!(matches!(
            signals.lock().as_slice(),
            [Signal::Error(FlowError::InvalidArgument(_))]
        ));
    }

    #[test]
    fn test_range_ending_at_max() {
        let (signals, _) = record(&Flux::range(i64::MAX - 1, 2), 10);
        let signals = signals.lock();
        assert_eq!(nexts(&signals), vec![i64::MAX - 1, i64::MAX]);
        assert!(matches!(signals.last(), Some(Signal::Complete)));

        let (signals, _) = record(&Flux::range(i64::MIN, 1), 1);
        assert_eq!(nexts(&signals.lock()), vec![i64::MIN]);
    }

    #[test]
    fn test_never_source() {
        let (signals, _) = record(&Flux::<i32>::never(), 10);
        assert!(signals.lock().is_empty());
    }

    #[test]
    fn test_cancel_stops_emission() {
        let (signals, subscription) = record(&Flux::range(1, 10), 3);
        let subscription = subscription.lock().clone().unwrap();
        subscription.cancel();
        subscription.request(5);
        assert_eq!(nexts(&signals.lock()), vec![1, 2, 3]);
    }

    #[test]
    fn test_reentrant_request_from_on_next() {
        struct OneByOne {
            seen: Arc<Mutex<Vec<i64>>>,
            subscription: Option<Subscription>,
        }

        impl Subscriber<i64> for OneByOne {
            fn on_subscribe(&mut self, subscription: Subscription) {
                subscription.request(1);
                self.subscription = Some(subscription);
            }

            fn on_next(&mut self, item: i64) {
                self.seen.lock().push(item);
                if let Some(subscription) = &self.subscription {
                    subscription.request(1);
                }
            }
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        Flux::range(1, 1000).subscribe(OneByOne {
            seen: seen.clone(),
            subscription: None,
        });
        assert_eq!(seen.lock().len(), 1000);
    }

    #[test]
    fn test_from_iter_and_just() {
        let (signals, _) = record(&Flux::from_iter(vec!["a", "b"]), u64::MAX);
        assert_eq!(nexts(&signals.lock()), vec!["a", "b"]);

        let (signals, _) = record(&Flux::just(["Hugo", "Vinicius"]), u64::MAX);
        assert_eq!(nexts(&signals.lock()), vec!["Hugo", "Vinicius"]);
    }

    #[test]
    fn test_defer_builds_per_subscription() {
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = builds.clone();
        let flux = Flux::defer(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) as i64;
            Flux::just(vec![n])
        });

        let (first, _) = record(&flux, 1);
        let (second, _) = record(&flux, 1);
        assert_eq!(nexts(&first.lock()), vec![0]);
        assert_eq!(nexts(&second.lock()), vec![1]);
    }
}
