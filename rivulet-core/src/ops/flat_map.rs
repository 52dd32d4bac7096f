//! Merge of inner publishers produced from each upstream item
//!
//! Inner items are buffered per inner source (at most `prefetch` each) and
//! drained to the downstream subscriber as its demand allows. Only one
//! thread drains at a time; every other signal just bumps the
//! work-in-progress counter.

use crate::demand;
use crate::error::FlowError;
use crate::flux::{Flux, Publisher};
use crate::subscriber::{BoxSubscriber, Demand, Subscriber, Subscription};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, trace};

/// Default number of inner sources subscribed at once
pub const DEFAULT_FLAT_MAP_CONCURRENCY: u64 = 256;

/// Default number of items requested from each inner source up front
pub const DEFAULT_FLAT_MAP_PREFETCH: u64 = 32;

impl<T: Send + 'static> Flux<T> {
    /// Map every item to an inner Flux and merge the results
    ///
    /// Completes once upstream and every inner source completed. The first
    /// error from any source cancels all of them.
    pub fn flat_map<U, F>(&self, f: F) -> Flux<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Flux<U> + Send + Sync + 'static,
    {
        self.flat_map_with(f, DEFAULT_FLAT_MAP_CONCURRENCY, DEFAULT_FLAT_MAP_PREFETCH)
    }

    /// [`flat_map`](Self::flat_map) with explicit concurrency and prefetch.
    /// Zero values are treated as 1.
    pub fn flat_map_with<U, F>(&self, f: F, concurrency: u64, prefetch: u64) -> Flux<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Flux<U> + Send + Sync + 'static,
    {
        Flux::from_publisher(FlatMapPublisher {
            source: self.clone(),
            f: Arc::new(f),
            concurrency: concurrency.max(1),
            prefetch: prefetch.max(1),
        })
    }
}

struct FlatMapPublisher<T, F> {
    source: Flux<T>,
    f: Arc<F>,
    concurrency: u64,
    prefetch: u64,
}

impl<T, U, F> Publisher<U> for FlatMapPublisher<T, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Flux<U> + Send + Sync + 'static,
{
    fn subscribe(&self, subscriber: BoxSubscriber<U>) {
        let state = Arc::new(MergeState {
            concurrency: self.concurrency,
            prefetch: self.prefetch,
            replenish_at: (self.prefetch - self.prefetch / 4).max(1),
            downstream: Mutex::new(Some(subscriber)),
            sources: Mutex::new(Sources {
                outer: None,
                slots: BTreeMap::new(),
                next_id: 0,
                outer_done: false,
                error: None,
            }),
            demand: AtomicU64::new(0),
            wip: AtomicUsize::new(1),
            cancelled: AtomicBool::new(false),
        });
        self.source.subscribe_raw(Box::new(OuterSubscriber {
            state,
            f: self.f.clone(),
        }));
    }
}

struct Slot<U> {
    queue: VecDeque<U>,
    done: bool,
    subscription: Option<Subscription>,
    consumed: u64,
}

struct Sources<U> {
    outer: Option<Subscription>,
    slots: BTreeMap<u64, Slot<U>>,
    next_id: u64,
    outer_done: bool,
    error: Option<FlowError>,
}

impl<U> Sources<U> {
    fn take_subscriptions(&mut self) -> Vec<Subscription> {
        let mut all: Vec<Subscription> = self
            .slots
            .values_mut()
            .filter_map(|slot| slot.subscription.take())
            .collect();
        all.extend(self.outer.take());
        all
    }
}

/// What a drain pass decided, executed with no lock held
enum Step<U> {
    Emit(U, Option<(Subscription, u64)>),
    Idle { finished: u64 },
    Complete,
    Fail(FlowError),
}

struct MergeState<U> {
    concurrency: u64,
    prefetch: u64,
    replenish_at: u64,
    downstream: Mutex<Option<BoxSubscriber<U>>>,
    sources: Mutex<Sources<U>>,
    demand: AtomicU64,
    wip: AtomicUsize,
    cancelled: AtomicBool,
}

impl<U: Send + 'static> MergeState<U> {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn register(&self) -> Option<u64> {
        let mut sources = self.sources.lock();
        if sources.error.is_some() || self.is_cancelled() {
            return None;
        }
        let id = sources.next_id;
        sources.next_id += 1;
        sources.slots.insert(
            id,
            Slot {
                queue: VecDeque::new(),
                done: false,
                subscription: None,
                consumed: 0,
            },
        );
        Some(id)
    }

    fn fail(&self, error: FlowError) {
        let subscriptions = {
            let mut sources = self.sources.lock();
            if sources.error.is_some() {
                return;
            }
            debug!(kind = error.as_label(), "flat_map failing, cancelling all sources");
            sources.error = Some(error);
            sources.take_subscriptions()
        };
        for subscription in subscriptions {
            subscription.cancel();
        }
        self.drain();
    }

    fn drain(&self) {
        if self.wip.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }
        self.drain_loop();
    }

    fn drain_loop(&self) {
        let mut missed = 1;
        loop {
            if self.drain_pass() {
                // terminated: keep wip held so nobody drains again
                return;
            }
            missed = self.wip.fetch_sub(missed, Ordering::AcqRel) - missed;
            if missed == 0 {
                return;
            }
        }
    }

    /// Emit as much as demand allows. Returns true once terminated.
    fn drain_pass(&self) -> bool {
        let mut downstream = self.downstream.lock();
        loop {
            if self.is_cancelled() {
                let subscriptions = {
                    let mut sources = self.sources.lock();
                    sources.slots.clear();
                    sources.take_subscriptions()
                };
                drop(subscriptions);
                downstream.take();
                return true;
            }
            match self.next_step() {
                Step::Emit(item, replenish) => {
                    if let Some((subscription, n)) = replenish {
                        subscription.request(n);
                    }
                    match downstream.as_mut() {
                        Some(subscriber) => subscriber.on_next(item),
                        None => return true,
                    }
                }
                Step::Idle { finished } => {
                    if finished > 0 {
                        let outer = self.sources.lock().outer.clone();
                        if let Some(outer) = outer {
                            outer.request(finished);
                        }
                        continue;
                    }
                    return false;
                }
                Step::Complete => {
                    let subscriber = downstream.take();
                    drop(downstream);
                    if let Some(mut subscriber) = subscriber {
                        trace!("flat_map complete");
                        subscriber.on_complete();
                    }
                    return true;
                }
                Step::Fail(error) => {
                    let subscriber = downstream.take();
                    drop(downstream);
                    if let Some(mut subscriber) = subscriber {
                        subscriber.on_error(error);
                    }
                    return true;
                }
            }
        }
    }

    fn next_step(&self) -> Step<U> {
        let mut sources = self.sources.lock();
        if let Some(error) = sources.error.take() {
            sources.slots.clear();
            return Step::Fail(error);
        }

        let finished: Vec<u64> = sources
            .slots
            .iter()
            .filter(|(_, slot)| slot.done && slot.queue.is_empty())
            .map(|(id, _)| *id)
            .collect();
        for id in &finished {
            sources.slots.remove(id);
        }
        if !finished.is_empty() && !sources.outer_done {
            return Step::Idle {
                finished: finished.len() as u64,
            };
        }

        if self.demand.load(Ordering::Acquire) > 0 {
            let replenish_at = self.replenish_at;
            let ready = sources
                .slots
                .values_mut()
                .find(|slot| !slot.queue.is_empty());
            if let Some(slot) = ready {
                if let Some(item) = slot.queue.pop_front() {
                    demand::produced(&self.demand, 1);
                    let mut replenish = None;
                    if !slot.done {
                        slot.consumed += 1;
                        if slot.consumed >= replenish_at {
                            replenish = slot
                                .subscription
                                .clone()
                                .map(|subscription| (subscription, slot.consumed));
                            slot.consumed = 0;
                        }
                    }
                    return Step::Emit(item, replenish);
                }
            }
        }

        if sources.outer_done && sources.slots.is_empty() {
            return Step::Complete;
        }
        Step::Idle { finished: 0 }
    }
}

impl<U: Send + 'static> Demand for MergeState<U> {
    fn request(&self, n: u64) {
        if n == 0 {
            debug!("flat_map ignoring request(0)");
            return;
        }
        demand::add(&self.demand, n);
        self.drain();
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("flat_map cancelled");
        let subscriptions = self.sources.lock().take_subscriptions();
        for subscription in subscriptions {
            subscription.cancel();
        }
        self.drain();
    }
}

struct OuterSubscriber<U, F> {
    state: Arc<MergeState<U>>,
    f: Arc<F>,
}

impl<T, U, F> Subscriber<T> for OuterSubscriber<U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Flux<U> + Send + Sync + 'static,
{
    fn on_subscribe(&mut self, subscription: Subscription) {
        self.state.sources.lock().outer = Some(subscription.clone());
        {
            // wip is still held, so requests made here only record demand
            let mut downstream = self.state.downstream.lock();
            if let Some(downstream) = downstream.as_mut() {
                downstream.on_subscribe(Subscription::new(self.state.clone()));
            }
        }
        if !self.state.is_cancelled() {
            subscription.request(self.state.concurrency);
        }
        self.state.drain_loop();
    }

    fn on_next(&mut self, item: T) {
        let Some(id) = self.state.register() else {
            trace!("flat_map dropped outer item after termination");
            return;
        };
        let inner = (self.f)(item);
        inner.subscribe_raw(Box::new(InnerSubscriber {
            state: self.state.clone(),
            id,
        }));
    }

    fn on_error(&mut self, error: FlowError) {
        self.state.fail(error);
    }

    fn on_complete(&mut self) {
        {
            let mut sources = self.state.sources.lock();
            sources.outer_done = true;
            sources.outer = None;
        }
        self.state.drain();
    }
}

struct InnerSubscriber<U> {
    state: Arc<MergeState<U>>,
    id: u64,
}

impl<U: Send + 'static> Subscriber<U> for InnerSubscriber<U> {
    fn on_subscribe(&mut self, subscription: Subscription) {
        let accepted = {
            let mut sources = self.state.sources.lock();
            match sources.slots.get_mut(&self.id) {
                Some(slot) => {
                    slot.subscription = Some(subscription.clone());
                    true
                }
                None => false,
            }
        };
        if accepted {
            subscription.request(self.state.prefetch);
        } else {
            subscription.cancel();
        }
    }

    fn on_next(&mut self, item: U) {
        {
            let mut sources = self.state.sources.lock();
            match sources.slots.get_mut(&self.id) {
                Some(slot) => slot.queue.push_back(item),
                None => return,
            }
        }
        self.state.drain();
    }

    fn on_error(&mut self, error: FlowError) {
        self.state.fail(error);
    }

    fn on_complete(&mut self) {
        {
            let mut sources = self.state.sources.lock();
            if let Some(slot) = sources.slots.get_mut(&self.id) {
                slot.done = true;
                slot.subscription = None;
            }
        }
        self.state.drain();
    }
}
