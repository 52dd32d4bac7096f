//! Common test utilities

use parking_lot::Mutex;
use rivulet::{FlowError, Flux, Signal, Subscriber, Subscription};
use std::sync::Arc;

/// Install a tracing subscriber that writes through the test harness
#[allow(dead_code)] // Used by other test modules
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Subscriber that records every signal and keeps its subscription around
#[allow(dead_code)]
pub struct Recorder<T> {
    pub signals: Arc<Mutex<Vec<Signal<T>>>>,
    pub subscription: Arc<Mutex<Option<Subscription>>>,
    initial: u64,
}

/// Shared view of what a [`Recorder`] saw
#[allow(dead_code)]
#[derive(Clone)]
pub struct Recording<T> {
    pub signals: Arc<Mutex<Vec<Signal<T>>>>,
    pub subscription: Arc<Mutex<Option<Subscription>>>,
}

#[allow(dead_code)]
impl<T: Clone> Recording<T> {
    pub fn items(&self) -> Vec<T> {
        self.signals
            .lock()
            .iter()
            .filter_map(|signal| match signal {
                Signal::Next(item) => Some(item.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn completed(&self) -> bool {
        matches!(self.signals.lock().last(), Some(Signal::Complete))
    }

    pub fn error(&self) -> Option<FlowError> {
        self.signals.lock().iter().find_map(|signal| match signal {
            Signal::Error(error) => Some(error.clone()),
            _ => None,
        })
    }

    pub fn terminal_count(&self) -> usize {
        self.signals
            .lock()
            .iter()
            .filter(|signal| signal.is_terminal())
            .count()
    }

    pub fn request(&self, n: u64) {
        let subscription = self.subscription.lock().clone();
        if let Some(subscription) = subscription {
            subscription.request(n);
        }
    }

    pub fn cancel(&self) {
        let subscription = self.subscription.lock().clone();
        if let Some(subscription) = subscription {
            subscription.cancel();
        }
    }
}

impl<T: Send + 'static> Subscriber<T> for Recorder<T> {
    fn on_subscribe(&mut self, subscription: Subscription) {
        *self.subscription.lock() = Some(subscription.clone());
        if self.initial > 0 {
            subscription.request(self.initial);
        }
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

/// Subscribe a recorder requesting `initial` items up front (0 requests nothing)
#[allow(dead_code)]
pub fn record<T: Send + 'static>(flux: &Flux<T>, initial: u64) -> Recording<T> {
    let signals = Arc::new(Mutex::new(Vec::new()));
    let subscription = Arc::new(Mutex::new(None));
    flux.subscribe(Recorder {
        signals: signals.clone(),
        subscription: subscription.clone(),
        initial,
    });
    Recording {
        signals,
        subscription,
    }
}

/// Record every amount requested from `flux` by the stage below it
#[allow(dead_code)]
pub fn record_requests<T: Send + 'static>(flux: &Flux<T>) -> (Flux<T>, Arc<Mutex<Vec<u64>>>) {
    let requests = Arc::new(Mutex::new(Vec::new()));
    let log = requests.clone();
    (flux.do_on_request(move |n| log.lock().push(n)), requests)
}
