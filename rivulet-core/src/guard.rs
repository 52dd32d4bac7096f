//! Signal serialization and the subscribe-side protocol guard
//!
//! [`SerialSink`] funnels signals from any number of threads (and from
//! reentrant calls made inside a callback) into one ordered queue that is
//! drained by whichever caller wins the work-in-progress counter. Only the
//! drainer ever touches the downstream subscriber.
//!
//! [`Guarded`] sits between the last operator and a user subscriber. It
//! records cumulative demand and rejects items emitted beyond it.

use crate::demand::{self, UNBOUNDED};
use crate::error::{FlowError, ProtocolViolation};
use crate::subscriber::{BoxSubscriber, Demand, Subscriber, Subscription};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tracing::{error, trace, warn};

enum Event<T> {
    Subscribe(Subscription),
    Next(T),
    Error(FlowError),
    Complete,
}

impl<T> Event<T> {
    fn kind(&self) -> &'static str {
        match self {
            Event::Subscribe(_) => "subscribe",
            Event::Next(_) => "next",
            Event::Error(_) => "error",
            Event::Complete => "complete",
        }
    }
}

struct SinkQueue<T> {
    events: VecDeque<Event<T>>,
    terminal_enqueued: bool,
}

/// Ordered, reentrancy-safe delivery to one downstream subscriber
pub(crate) struct SerialSink<T> {
    queue: Mutex<SinkQueue<T>>,
    wip: AtomicUsize,
    downstream: Mutex<Option<BoxSubscriber<T>>>,
    cancelled: AtomicBool,
    ledger: Option<Arc<Ledger>>,
}

impl<T: Send + 'static> SerialSink<T> {
    pub(crate) fn new(downstream: BoxSubscriber<T>) -> Arc<Self> {
        Self::build(downstream, None)
    }

    fn build(downstream: BoxSubscriber<T>, ledger: Option<Arc<Ledger>>) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(SinkQueue {
                events: VecDeque::new(),
                terminal_enqueued: false,
            }),
            wip: AtomicUsize::new(0),
            downstream: Mutex::new(Some(downstream)),
            cancelled: AtomicBool::new(false),
            ledger,
        })
    }

    pub(crate) fn on_subscribe(&self, subscription: Subscription) {
        self.push(Event::Subscribe(subscription));
    }

    pub(crate) fn next(&self, item: T) {
        self.push(Event::Next(item));
    }

    pub(crate) fn error(&self, error: FlowError) {
        self.push(Event::Error(error));
    }

    pub(crate) fn complete(&self) {
        self.push(Event::Complete);
    }

    /// Drop the downstream subscriber and everything still queued
    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.drain();
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn push(&self, event: Event<T>) {
        {
            let mut queue = self.queue.lock();
            let terminal = matches!(event, Event::Error(_) | Event::Complete);
            if queue.terminal_enqueued && !matches!(event, Event::Subscribe(_)) {
                drop(queue);
                self.report_dropped(event.kind());
                return;
            }
            queue.terminal_enqueued |= terminal;
            queue.events.push_back(event);
        }
        self.drain();
    }

    fn report_dropped(&self, kind: &'static str) {
        if self.is_cancelled() {
            trace!(signal = kind, "signal dropped after cancel");
        } else {
            let violation = ProtocolViolation::AfterTerminal(kind);
            warn!(signal = kind, "dropped signal: {}", violation);
        }
    }

    fn drain(&self) {
        if self.wip.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }
        let _reset = WipReset(&self.wip);
        let mut missed = 1;
        loop {
            loop {
                if self.is_cancelled() {
                    self.queue.lock().events.clear();
                    let downstream = self.downstream.lock().take();
                    drop(downstream);
                    break;
                }
                let event = self.queue.lock().events.pop_front();
                match event {
                    Some(event) => self.deliver(event),
                    None => break,
                }
            }
            missed = self.wip.fetch_sub(missed, Ordering::AcqRel) - missed;
            if missed == 0 {
                break;
            }
        }
    }

    fn release_upstream(&self) {
        if let Some(ledger) = &self.ledger {
            ledger.release_upstream();
        }
    }

    fn deliver(&self, event: Event<T>) {
        let mut guard = self.downstream.lock();
        match event {
            Event::Subscribe(subscription) => {
                if let Some(downstream) = guard.as_mut() {
                    downstream.on_subscribe(subscription);
                }
            }
            Event::Next(item) => {
                if let Some(ledger) = &self.ledger {
                    if let Err(violation) = ledger.consume() {
                        let downstream = guard.take();
                        drop(guard);
                        {
                            let mut queue = self.queue.lock();
                            queue.events.clear();
                            queue.terminal_enqueued = true;
                        }
                        error!("{}", violation);
                        ledger.cancel_upstream();
                        if let Some(mut downstream) = downstream {
                            downstream.on_error(violation.into());
                        }
                        return;
                    }
                }
                match guard.as_mut() {
                    Some(downstream) => downstream.on_next(item),
                    None => trace!("next dropped, subscriber released"),
                }
            }
            Event::Error(error) => {
                let downstream = guard.take();
                drop(guard);
                if let Some(mut downstream) = downstream {
                    self.release_upstream();
                    downstream.on_error(error);
                }
            }
            Event::Complete => {
                let downstream = guard.take();
                drop(guard);
                if let Some(mut downstream) = downstream {
                    self.release_upstream();
                    downstream.on_complete();
                }
            }
        }
    }
}

/// Releases the drain slot if a callback unwinds, so a later terminal
/// signal can still be delivered.
struct WipReset<'a>(&'a AtomicUsize);

impl Drop for WipReset<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.store(0, Ordering::Release);
        }
    }
}

/// Cumulative demand bookkeeping for one guarded subscription
pub(crate) struct Ledger {
    requested: AtomicU64,
    delivered: AtomicU64,
    upstream: Mutex<Option<Subscription>>,
}

impl Ledger {
    fn new() -> Self {
        Self {
            requested: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            upstream: Mutex::new(None),
        }
    }

    fn consume(&self) -> Result<(), ProtocolViolation> {
        let requested = self.requested.load(Ordering::Acquire);
        let delivered = self.delivered.load(Ordering::Acquire);
        if requested != UNBOUNDED && delivered >= requested {
            return Err(ProtocolViolation::DemandExceeded {
                requested,
                delivered: delivered + 1,
            });
        }
        self.delivered.store(delivered + 1, Ordering::Release);
        Ok(())
    }

    fn upstream(&self) -> Option<Subscription> {
        self.upstream.lock().clone()
    }

    fn cancel_upstream(&self) {
        let upstream = self.upstream.lock().take();
        if let Some(upstream) = upstream {
            upstream.cancel();
        }
    }

    fn release_upstream(&self) {
        let upstream = self.upstream.lock().take();
        drop(upstream);
    }
}

/// The subscription handed to a guarded subscriber
struct GuardDemand<T> {
    ledger: Arc<Ledger>,
    sink: Arc<SerialSink<T>>,
}

impl<T: Send + 'static> Demand for GuardDemand<T> {
    fn request(&self, n: u64) {
        if n == 0 {
            let violation = ProtocolViolation::NonPositiveRequest;
            error!("{}", violation);
            self.ledger.cancel_upstream();
            self.sink.error(violation.into());
            return;
        }
        demand::add(&self.ledger.requested, n);
        if let Some(upstream) = self.ledger.upstream() {
            upstream.request(n);
        }
    }

    fn cancel(&self) {
        self.ledger.cancel_upstream();
        self.sink.cancel();
    }
}

/// Protocol-enforcing wrapper placed around every user subscriber
pub(crate) struct Guarded<T> {
    ledger: Arc<Ledger>,
    sink: Arc<SerialSink<T>>,
}

impl<T: Send + 'static> Guarded<T> {
    pub(crate) fn new(downstream: BoxSubscriber<T>) -> Self {
        let ledger = Arc::new(Ledger::new());
        let sink = SerialSink::build(downstream, Some(ledger.clone()));
        Self { ledger, sink }
    }
}

impl<T: Send + 'static> Subscriber<T> for Guarded<T> {
    fn on_subscribe(&mut self, subscription: Subscription) {
        if self.sink.is_cancelled() {
            subscription.cancel();
            return;
        }
        *self.ledger.upstream.lock() = Some(subscription);
        let demand = GuardDemand {
            ledger: self.ledger.clone(),
            sink: self.sink.clone(),
        };
        self.sink.on_subscribe(Subscription::new(Arc::new(demand)));
    }

    fn on_next(&mut self, item: T) {
        self.sink.next(item);
    }

    fn on_error(&mut self, error: FlowError) {
        self.sink.error(error);
    }

    fn on_complete(&mut self) {
        self.sink.complete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscriber::Signal;

    struct Recording {
        signals: Arc<Mutex<Vec<Signal<i32>>>>,
        initial: u64,
    }

    impl Subscriber<i32> for Recording {
        fn on_subscribe(&mut self, subscription: Subscription) {
            subscription.request(self.initial);
        }

        fn on_next(&mut self, item: i32) {
            self.signals.lock().push(Signal::Next(item));
        }

        fn on_error(&mut self, error: FlowError) {
            self.signals.lock().push(Signal::Error(error));
        }

        fn on_complete(&mut self) {
            self.signals.lock().push(Signal::Complete);
        }
    }

    fn guarded(initial: u64) -> (Guarded<i32>, Arc<Mutex<Vec<Signal<i32>>>>) {
        let signals = Arc::new(Mutex::new(Vec::new()));
        let guarded = Guarded::new(Box::new(Recording {
            signals: signals.clone(),
            initial,
        }));
        (guarded, signals)
    }

    #[test]
    fn test_guard_rejects_excess_items() {
        let (mut guard, signals) = guarded(2);
        guard.on_subscribe(Subscription::noop());
        guard.on_next(1);
        guard.on_next(2);
        guard.on_next(3);

        let signals = signals.lock();
        assert_eq!(signals.len(), 3);
        match &signals[2] {
            Signal::Error(FlowError::Protocol(ProtocolViolation::DemandExceeded {
                requested,
                delivered,
            })) => {
                assert_eq!(*requested, 2);
                assert_eq!(*delivered, 3);
            }
            other => panic!("unexpected signal {:?}", other),
        }
    }

    #[test]
    fn test_guard_drops_signals_after_terminal() {
        let (mut guard, signals) = guarded(UNBOUNDED);
        guard.on_subscribe(Subscription::noop());
        guard.on_next(1);
        guard.on_complete();
        guard.on_next(2);
        guard.on_error(FlowError::msg("late"));

        let signals = signals.lock();
        assert_eq!(signals.len(), 2);
        assert!(matches!(signals[1], Signal::Complete));
    }

    #[test]
    fn test_guard_rejects_zero_request() {
        let (mut guard, signals) = guarded(0);
        guard.on_subscribe(Subscription::noop());

        let signals = signals.lock();
        assert!(matches!(
            signals.as_slice(),
            [Signal::Error(FlowError::Protocol(
                ProtocolViolation::NonPositiveRequest
            ))]
        ));
    }
}
