//! Hot multicasting: `publish()` and `ConnectableFlux`
//!
//! One upstream subscription, opened by [`ConnectableFlux::connect`], feeds
//! every attached subscriber. An item is handed out only once every
//! subscriber that was attached when it arrived has demand for it, so the
//! slowest subscriber paces the group. Items that arrive with nobody
//! attached are dropped.

use crate::demand;
use crate::error::FlowError;
use crate::flux::{Flux, Publisher};
use crate::guard::SerialSink;
use crate::subscriber::{
    BoxSubscriber, Demand, LambdaSubscriber, Subscriber, Subscription, SubscriptionHandle,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// Default number of items requested from upstream by `publish()`
pub const DEFAULT_PUBLISH_PREFETCH: u64 = 256;

impl<T: Clone + Send + Sync + 'static> Flux<T> {
    /// Share one upstream subscription among many subscribers
    ///
    /// Nothing is requested upstream until [`ConnectableFlux::connect`].
    pub fn publish(&self) -> ConnectableFlux<T> {
        self.publish_with(DEFAULT_PUBLISH_PREFETCH)
    }

    /// [`publish`](Self::publish) with an explicit upstream prefetch
    pub fn publish_with(&self, prefetch: u64) -> ConnectableFlux<T> {
        let prefetch = prefetch.max(1);
        let shared = Arc::new(Multicast {
            source: self.clone(),
            prefetch,
            replenish_at: (prefetch - prefetch / 4).max(1),
            state: Mutex::new(CastState {
                members: Vec::new(),
                queue: VecDeque::new(),
                next_seq: 0,
                consumed: 0,
                terminal: None,
            }),
            wip: AtomicUsize::new(0),
            connection: Mutex::new(None),
            next_member: AtomicU64::new(0),
        });
        ConnectableFlux {
            flux: Flux::from_publisher(MulticastPublisher {
                shared: shared.clone(),
            }),
            shared,
        }
    }
}

/// A hot Flux that starts emitting when connected
///
/// # Example
/// ```
/// use rivulet::Flux;
///
/// let hot = Flux::range(1, 3).publish();
/// hot.subscribe_next(|n| println!("first {}", n));
/// let connection = hot.connect();
/// hot.subscribe_next(|n| println!("late {}", n));
/// connection.dispose();
/// ```
pub struct ConnectableFlux<T> {
    flux: Flux<T>,
    shared: Arc<Multicast<T>>,
}

impl<T> Clone for ConnectableFlux<T> {
    fn clone(&self) -> Self {
        Self {
            flux: self.flux.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> ConnectableFlux<T> {
    /// Subscribe upstream, once. Later calls return the same connection.
    pub fn connect(&self) -> Connection {
        let connection = {
            let mut slot = self.shared.connection.lock();
            if let Some(existing) = slot.as_ref() {
                return existing.clone();
            }
            let connection = Connection::new();
            *slot = Some(connection.clone());
            connection
        };
        debug!(prefetch = self.shared.prefetch, "connecting multicast source");
        self.shared.source.subscribe_raw(Box::new(ConnectSubscriber {
            shared: self.shared.clone(),
            connection: connection.clone(),
        }));
        connection
    }

    /// The subscriber-facing side as a plain Flux, for further operators
    pub fn as_flux(&self) -> Flux<T> {
        self.flux.clone()
    }

    /// Number of subscribers currently attached
    pub fn subscriber_count(&self) -> usize {
        self.shared.state.lock().members.len()
    }

    pub fn subscribe<S>(&self, subscriber: S)
    where
        S: Subscriber<T>,
    {
        self.flux.subscribe(subscriber);
    }

    pub fn subscribe_next<N>(&self, on_next: N) -> SubscriptionHandle
    where
        N: FnMut(T) + Send + 'static,
    {
        self.flux.subscribe_next(on_next)
    }

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
        self.flux.subscribe_with(on_next, on_error, on_complete)
    }

    pub fn subscribe_lambda(&self, subscriber: LambdaSubscriber<T>) -> SubscriptionHandle {
        self.flux.subscribe_lambda(subscriber)
    }
}

/// Handle to the upstream subscription opened by `connect()`
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    upstream: Mutex<Option<Subscription>>,
    disposed: AtomicBool,
}

impl Connection {
    fn new() -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                upstream: Mutex::new(None),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Cancel the upstream subscription
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("multicast connection disposed");
        let upstream = self.inner.upstream.lock().take();
        if let Some(upstream) = upstream {
            upstream.cancel();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    fn attach(&self, subscription: Subscription) {
        let mut upstream = self.inner.upstream.lock();
        if self.is_disposed() {
            drop(upstream);
            subscription.cancel();
            return;
        }
        *upstream = Some(subscription);
    }

    fn upstream(&self) -> Option<Subscription> {
        self.inner.upstream.lock().clone()
    }

    fn release(&self) {
        self.inner.upstream.lock().take();
    }
}

#[derive(Clone)]
enum Terminal {
    Complete,
    Error(FlowError),
}

struct CastState<T> {
    members: Vec<Arc<Member<T>>>,
    /// Items received but not yet handed out, tagged with arrival order
    queue: VecDeque<(u64, T)>,
    next_seq: u64,
    /// Handed out since the last upstream request
    consumed: u64,
    terminal: Option<Terminal>,
}

struct Multicast<T> {
    source: Flux<T>,
    prefetch: u64,
    replenish_at: u64,
    state: Mutex<CastState<T>>,
    wip: AtomicUsize,
    connection: Mutex<Option<Connection>>,
    next_member: AtomicU64,
}

/// One drain decision, carried out with the state lock released
enum Step<T> {
    Deliver(T, Vec<Arc<Member<T>>>, u64),
    Terminate(Terminal, Vec<Arc<Member<T>>>),
    Wait,
}

impl<T: Clone + Send + Sync + 'static> Multicast<T> {
    fn drain(&self) {
        if self.wip.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }
        let mut missed = 1;
        loop {
            loop {
                match self.next_step() {
                    Step::Deliver(item, targets, replenish) => {
                        if replenish > 0 {
                            self.request_upstream(replenish);
                        }
                        deliver(item, &targets);
                    }
                    Step::Terminate(terminal, targets) => {
                        for member in targets {
                            match &terminal {
                                Terminal::Complete => member.sink.complete(),
                                Terminal::Error(error) => member.sink.error(error.clone()),
                            }
                        }
                    }
                    Step::Wait => break,
                }
            }
            missed = self.wip.fetch_sub(missed, Ordering::AcqRel) - missed;
            if missed == 0 {
                break;
            }
        }
    }

    fn next_step(&self) -> Step<T> {
        let mut state = self.state.lock();
        state
            .members
            .retain(|member| !member.cancelled.load(Ordering::Acquire));

        if let Some(&(seq, _)) = state.queue.front() {
            let eligible: Vec<Arc<Member<T>>> = state
                .members
                .iter()
                .filter(|member| member.since <= seq)
                .cloned()
                .collect();
            if !eligible.is_empty()
                && eligible
                    .iter()
                    .any(|member| member.demand.load(Ordering::Acquire) == 0)
            {
                return Step::Wait;
            }
            let Some((_, item)) = state.queue.pop_front() else {
                return Step::Wait;
            };
            state.consumed += 1;
            let replenish = if state.consumed >= self.replenish_at && state.terminal.is_none() {
                std::mem::take(&mut state.consumed)
            } else {
                0
            };
            if eligible.is_empty() {
                trace!(seq, "multicast item dropped, no subscribers");
            }
            for member in &eligible {
                demand::produced(&member.demand, 1);
            }
            return Step::Deliver(item, eligible, replenish);
        }

        if let Some(terminal) = state.terminal.clone() {
            let (ready, waiting): (Vec<_>, Vec<_>) = state
                .members
                .drain(..)
                .partition(|member| member.ready.load(Ordering::Acquire));
            state.members = waiting;
            if !ready.is_empty() {
                return Step::Terminate(terminal, ready);
            }
        }
        Step::Wait
    }

    fn request_upstream(&self, n: u64) {
        let connection = self.connection.lock().clone();
        if let Some(upstream) = connection.and_then(|c| c.upstream()) {
            upstream.request(n);
        }
    }
}

fn deliver<T: Clone + Send + 'static>(item: T, targets: &[Arc<Member<T>>]) {
    if let Some((last, rest)) = targets.split_last() {
        for member in rest {
            member.sink.next(item.clone());
        }
        last.sink.next(item);
    }
}

/// One attached subscriber
struct Member<T> {
    id: u64,
    sink: Arc<SerialSink<T>>,
    demand: AtomicU64,
    /// First item sequence this member may see
    since: u64,
    /// Set once `on_subscribe` has been delivered
    ready: AtomicBool,
    cancelled: AtomicBool,
    parent: Weak<Multicast<T>>,
}

impl<T: Clone + Send + Sync + 'static> Demand for Member<T> {
    fn request(&self, n: u64) {
        if n == 0 {
            debug!(member = self.id, "multicast member ignoring request(0)");
            return;
        }
        demand::add(&self.demand, n);
        if let Some(parent) = self.parent.upgrade() {
            parent.drain();
        }
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(member = self.id, "multicast subscriber cancelled");
        self.sink.cancel();
        if let Some(parent) = self.parent.upgrade() {
            parent.drain();
        }
    }
}

struct MulticastPublisher<T> {
    shared: Arc<Multicast<T>>,
}

impl<T: Clone + Send + Sync + 'static> Publisher<T> for MulticastPublisher<T> {
    fn subscribe(&self, subscriber: BoxSubscriber<T>) {
        let member = {
            let mut state = self.shared.state.lock();
            let member = Arc::new(Member {
                id: self.shared.next_member.fetch_add(1, Ordering::Relaxed),
                sink: SerialSink::new(subscriber),
                demand: AtomicU64::new(0),
                since: state.next_seq,
                ready: AtomicBool::new(false),
                cancelled: AtomicBool::new(false),
                parent: Arc::downgrade(&self.shared),
            });
            state.members.push(member.clone());
            member
        };
        debug!(member = member.id, since = member.since, "multicast subscriber attached");
        member
            .sink
            .on_subscribe(Subscription::new(member.clone()));
        member.ready.store(true, Ordering::Release);
        self.shared.drain();
    }
}

/// The single upstream subscriber opened by `connect()`
struct ConnectSubscriber<T> {
    shared: Arc<Multicast<T>>,
    connection: Connection,
}

impl<T: Clone + Send + Sync + 'static> Subscriber<T> for ConnectSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Subscription) {
        self.connection.attach(subscription.clone());
        if !self.connection.is_disposed() {
            subscription.request(self.shared.prefetch);
        }
    }

    fn on_next(&mut self, item: T) {
        {
            let mut state = self.shared.state.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.queue.push_back((seq, item));
        }
        self.shared.drain();
    }

    fn on_error(&mut self, error: FlowError) {
        debug!(kind = error.as_label(), "multicast source failed");
        self.connection.release();
        self.shared.state.lock().terminal = Some(Terminal::Error(error));
        self.shared.drain();
    }

    fn on_complete(&mut self) {
        debug!("multicast source completed");
        self.connection.release();
        self.shared.state.lock().terminal = Some(Terminal::Complete);
        self.shared.drain();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_items_dropped_without_subscribers() {
        let hot = Flux::range(1, 5).publish();
        let connection = hot.connect();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let completed = Arc::new(AtomicBool::new(false));
        let (sink, flag) = (seen.clone(), completed.clone());
        hot.subscribe_with(
            move |n| sink.lock().push(n),
            |e| panic!("unexpected {}", e),
            move || flag.store(true, Ordering::SeqCst),
        );

        assert!(seen.lock().is_empty());
        assert!(completed.load(Ordering::SeqCst));
        assert!(!connection.is_disposed());
    }

    #[test]
    fn test_connect_is_idempotent() {
        let subscriptions = Arc::new(AtomicUsize::new(0));
        let counter = subscriptions.clone();
        let hot = Flux::<i64>::never()
            .do_on_subscribe(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .publish();

        let first = hot.connect();
        let _second = hot.connect();
        assert_eq!(subscriptions.load(Ordering::SeqCst), 1);
        first.dispose();
        assert!(first.is_disposed());
    }

    #[test]
    fn test_slowest_subscriber_paces_the_group() {
        let hot = Flux::range(1, 4).publish();
        let fast = Arc::new(Mutex::new(Vec::new()));
        let slow = Arc::new(Mutex::new(Vec::new()));
        let (fast_sink, slow_sink) = (fast.clone(), slow.clone());

        hot.subscribe_next(move |n| fast_sink.lock().push(n));
        hot.subscribe_lambda(
            LambdaSubscriber::new(move |n| slow_sink.lock().push(n))
                .with_subscribe(|s: &Subscription| s.request(2)),
        );
        hot.connect();

        assert_eq!(*fast.lock(), vec![1, 2]);
        assert_eq!(*slow.lock(), vec![1, 2]);
        assert_eq!(hot.subscriber_count(), 2);
    }
}
