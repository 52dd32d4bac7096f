//! Scripted verification of a Flux
//!
//! A [`StepVerifier`] subscribes to a Flux, then checks the recorded signals
//! against a list of expectations, one step at a time. In virtual-time mode
//! the verifier owns a [`VirtualTimeScheduler`] and never waits: time only
//! moves through [`StepVerifier::then_await`] and
//! [`StepVerifier::expect_no_event`].
//!
//! ```
//! use rivulet::Flux;
//! use rivulet::verifier::StepVerifier;
//! use std::time::Duration;
//!
//! StepVerifier::with_virtual_time(|clock| Flux::interval(Duration::from_secs(86_400), clock).take(2))
//!     .expect_subscription()
//!     .expect_no_event(Duration::from_secs(86_400))
//!     .expect_next([0])
//!     .then_await(Duration::from_secs(86_400))
//!     .expect_next([1])
//!     .verify_complete()
//!     .unwrap();
//! ```

use crate::config::FlowConfig;
use crate::demand::UNBOUNDED;
use crate::error::FlowError;
use crate::flux::Flux;
use crate::scheduler::{Scheduler, SchedulerRef, VirtualTimeScheduler};
use crate::subscriber::{Subscriber, Subscription};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::error::Error as StdError;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// A failed verification
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("step {step}: expected {expected}, got {actual}")]
    Mismatch {
        step: usize,
        expected: String,
        actual: String,
    },

    #[error("step {step}: expected {expected}, nothing arrived within {waited:?}")]
    Timeout {
        step: usize,
        expected: String,
        waited: Duration,
    },
}

type Predicate<T> = Box<dyn Fn(&T) -> bool>;
type ErrorPredicate = Box<dyn Fn(&FlowError) -> bool>;

enum Step<T> {
    Subscription,
    Next(Vec<T>),
    NextCount(u64),
    NextMatches(Predicate<T>),
    ConsumeWhile(Predicate<T>),
    NoEvent(Duration),
    Await(Duration),
    Request(u64),
    Run(Box<dyn FnOnce()>),
    Cancel,
    Complete,
    Error,
    ErrorMatching(ErrorPredicate),
}

/// Builder for a scripted verification
pub struct StepVerifier<T> {
    flux: Flux<T>,
    clock: Option<Arc<VirtualTimeScheduler>>,
    steps: Vec<Step<T>>,
    initial_request: u64,
    timeout: Duration,
}

impl<T> StepVerifier<T>
where
    T: PartialEq + Debug + Send + 'static,
{
    /// Verify `flux` in real time
    pub fn create(flux: Flux<T>) -> Self {
        Self {
            flux,
            clock: None,
            steps: Vec::new(),
            initial_request: UNBOUNDED,
            timeout: FlowConfig::default().verifier.default_timeout(),
        }
    }

    /// Verify the Flux built by `build` on a fresh virtual clock
    pub fn with_virtual_time<F>(build: F) -> Self
    where
        F: FnOnce(SchedulerRef) -> Flux<T>,
    {
        let clock = VirtualTimeScheduler::new();
        let flux = build(clock.clone());
        Self {
            clock: Some(clock),
            ..Self::create(flux)
        }
    }

    /// The virtual clock, when verifying in virtual time
    pub fn clock(&self) -> Option<Arc<VirtualTimeScheduler>> {
        self.clock.clone()
    }

    /// Demand requested on subscribe. Zero requests nothing.
    pub fn initial_request(mut self, n: u64) -> Self {
        self.initial_request = n;
        self
    }

    /// Maximum real time to wait for signals
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Take the wait timeout from `config`
    pub fn with_config(self, config: &FlowConfig) -> Self {
        self.timeout(config.verifier.default_timeout())
    }

    pub fn expect_subscription(self) -> Self {
        self.step(Step::Subscription)
    }

    /// Expect exactly these items, in order
    pub fn expect_next<I>(self, values: I) -> Self
    where
        I: IntoIterator<Item = T>,
    {
        self.step(Step::Next(values.into_iter().collect()))
    }

    pub fn expect_next_count(self, n: u64) -> Self {
        self.step(Step::NextCount(n))
    }

    pub fn expect_next_matches<P>(self, predicate: P) -> Self
    where
        P: Fn(&T) -> bool + 'static,
    {
        self.step(Step::NextMatches(Box::new(predicate)))
    }

    /// Skip items while `predicate` holds
    pub fn consume_while<P>(self, predicate: P) -> Self
    where
        P: Fn(&T) -> bool + 'static,
    {
        self.step(Step::ConsumeWhile(Box::new(predicate)))
    }

    /// Let `duration` pass and expect no signal in the meantime
    pub fn expect_no_event(self, duration: Duration) -> Self {
        self.step(Step::NoEvent(duration))
    }

    /// Advance the virtual clock, or sleep in real time
    pub fn then_await(self, duration: Duration) -> Self {
        self.step(Step::Await(duration))
    }

    pub fn then_request(self, n: u64) -> Self {
        self.step(Step::Request(n))
    }

    /// Run an arbitrary action, such as connecting a hot source
    pub fn then<F>(self, action: F) -> Self
    where
        F: FnOnce() + 'static,
    {
        self.step(Step::Run(Box::new(action)))
    }

    pub fn then_cancel(self) -> Self {
        self.step(Step::Cancel)
    }

    pub fn expect_complete(self) -> Self {
        self.step(Step::Complete)
    }

    pub fn expect_error(self) -> Self {
        self.step(Step::Error)
    }

    pub fn expect_error_matching<P>(self, predicate: P) -> Self
    where
        P: Fn(&FlowError) -> bool + 'static,
    {
        self.step(Step::ErrorMatching(Box::new(predicate)))
    }

    /// Expect an upstream error of type `E`
    pub fn expect_error_of<E>(self) -> Self
    where
        E: StdError + 'static,
    {
        self.expect_error_matching(|error| error.is::<E>())
    }

    /// `expect_complete().verify()`
    pub fn verify_complete(self) -> Result<Duration, VerifyError> {
        self.expect_complete().verify()
    }

    fn step(mut self, step: Step<T>) -> Self {
        self.steps.push(step);
        self
    }

    /// Subscribe and run every step. Returns the real time spent.
    pub fn verify(self) -> Result<Duration, VerifyError> {
        let started = Instant::now();
        let recorder = Arc::new(Recorder::new());
        self.flux.subscribe(RecordingSubscriber {
            recorder: recorder.clone(),
            initial_request: self.initial_request,
        });

        let mut run = Run {
            recorder,
            clock: self.clock,
            deadline: started + self.timeout,
            timeout: self.timeout,
            cancelled: false,
        };
        let outcome = self
            .steps
            .into_iter()
            .enumerate()
            .try_for_each(|(index, step)| run.execute(index + 1, step));
        run.finish();
        outcome?;
        debug!(elapsed = ?started.elapsed(), "verification passed");
        Ok(started.elapsed())
    }
}

enum Recorded<T> {
    Next(T),
    Error(FlowError),
    Complete,
}

impl<T: Debug> Recorded<T> {
    fn describe(&self) -> String {
        match self {
            Recorded::Next(item) => format!("next({:?})", item),
            Recorded::Error(error) => format!("error({})", error),
            Recorded::Complete => "complete".to_string(),
        }
    }
}

struct Journal<T> {
    events: VecDeque<Recorded<T>>,
    subscription: Option<Subscription>,
    terminated: bool,
}

struct Recorder<T> {
    journal: Mutex<Journal<T>>,
    changed: Condvar,
}

impl<T> Recorder<T> {
    fn new() -> Self {
        Self {
            journal: Mutex::new(Journal {
                events: VecDeque::new(),
                subscription: None,
                terminated: false,
            }),
            changed: Condvar::new(),
        }
    }

    fn push(&self, event: Recorded<T>) {
        let mut journal = self.journal.lock();
        if !matches!(event, Recorded::Next(_)) {
            journal.terminated = true;
        }
        journal.events.push_back(event);
        self.changed.notify_all();
    }

    fn subscription(&self) -> Option<Subscription> {
        self.journal.lock().subscription.clone()
    }
}

struct RecordingSubscriber<T> {
    recorder: Arc<Recorder<T>>,
    initial_request: u64,
}

impl<T: Send + 'static> Subscriber<T> for RecordingSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Subscription) {
        {
            let mut journal = self.recorder.journal.lock();
            journal.subscription = Some(subscription.clone());
            self.recorder.changed.notify_all();
        }
        if self.initial_request > 0 {
            subscription.request(self.initial_request);
        }
    }

    fn on_next(&mut self, item: T) {
        self.recorder.push(Recorded::Next(item));
    }

    fn on_error(&mut self, error: FlowError) {
        self.recorder.push(Recorded::Error(error));
    }

    fn on_complete(&mut self) {
        self.recorder.push(Recorded::Complete);
    }
}

/// State of one `verify()` call
struct Run<T> {
    recorder: Arc<Recorder<T>>,
    clock: Option<Arc<VirtualTimeScheduler>>,
    deadline: Instant,
    timeout: Duration,
    cancelled: bool,
}

impl<T: PartialEq + Debug + Send + 'static> Run<T> {
    fn execute(&mut self, step: usize, action: Step<T>) -> Result<(), VerifyError> {
        match action {
            Step::Subscription => {
                let mut journal = self.recorder.journal.lock();
                while journal.subscription.is_none() {
                    if self.clock.is_some()
                        || self
                            .recorder
                            .changed
                            .wait_until(&mut journal, self.deadline)
                            .timed_out()
                    {
                        return Err(self.timeout_error(step, "subscription"));
                    }
                }
                Ok(())
            }
            Step::Next(values) => {
                for value in values {
                    let expected = format!("next({:?})", value);
                    match self.next_event(step, &expected)? {
                        Recorded::Next(item) if item == value => {}
                        other => return Err(mismatch(step, expected, other.describe())),
                    }
                }
                Ok(())
            }
            Step::NextCount(n) => {
                for received in 0..n {
                    let expected = format!("{} more items", n - received);
                    match self.next_event(step, &expected)? {
                        Recorded::Next(_) => {}
                        other => return Err(mismatch(step, expected, other.describe())),
                    }
                }
                Ok(())
            }
            Step::NextMatches(predicate) => {
                let expected = "next matching predicate".to_string();
                match self.next_event(step, &expected)? {
                    Recorded::Next(item) if predicate(&item) => Ok(()),
                    other => Err(mismatch(step, expected, other.describe())),
                }
            }
            Step::ConsumeWhile(predicate) => {
                loop {
                    let mut journal = self.recorder.journal.lock();
                    if journal.events.is_empty() {
                        if self.clock.is_some() || journal.terminated {
                            return Ok(());
                        }
                        if self
                            .recorder
                            .changed
                            .wait_until(&mut journal, self.deadline)
                            .timed_out()
                        {
                            return Err(self.timeout_error(step, "an item not matching"));
                        }
                        continue;
                    }
                    let matching = matches!(
                        journal.events.front(),
                        Some(Recorded::Next(item)) if predicate(item)
                    );
                    if !matching {
                        return Ok(());
                    }
                    journal.events.pop_front();
                }
            }
            Step::NoEvent(duration) => {
                // a signal landing exactly at the end of the window belongs to the next step
                let edge = duration.min(Duration::from_nanos(1));
                self.pass_time(duration - edge);
                let seen = self.recorder.journal.lock().events.front().map(Recorded::describe);
                if let Some(actual) = seen {
                    return Err(mismatch(step, format!("no event for {:?}", duration), actual));
                }
                self.pass_time(edge);
                Ok(())
            }
            Step::Await(duration) => {
                self.pass_time(duration);
                Ok(())
            }
            Step::Request(n) => {
                if let Some(subscription) = self.recorder.subscription() {
                    subscription.request(n);
                }
                Ok(())
            }
            Step::Run(action) => {
                action();
                Ok(())
            }
            Step::Cancel => {
                self.cancel();
                Ok(())
            }
            Step::Complete => {
                let expected = "complete".to_string();
                match self.next_event(step, &expected)? {
                    Recorded::Complete => Ok(()),
                    other => Err(mismatch(step, expected, other.describe())),
                }
            }
            Step::Error => {
                let expected = "error".to_string();
                match self.next_event(step, &expected)? {
                    Recorded::Error(_) => Ok(()),
                    other => Err(mismatch(step, expected, other.describe())),
                }
            }
            Step::ErrorMatching(predicate) => {
                let expected = "error matching predicate".to_string();
                match self.next_event(step, &expected)? {
                    Recorded::Error(error) if predicate(&error) => Ok(()),
                    other => Err(mismatch(step, expected, other.describe())),
                }
            }
        }
    }

    /// Pop the next recorded signal, waiting for it in real time
    fn next_event(&self, step: usize, expected: &str) -> Result<Recorded<T>, VerifyError> {
        let mut journal = self.recorder.journal.lock();
        loop {
            if let Some(event) = journal.events.pop_front() {
                return Ok(event);
            }
            if let Some(clock) = &self.clock {
                return Err(mismatch(
                    step,
                    expected.to_string(),
                    format!("no signal at virtual time {:?}", clock.now()),
                ));
            }
            if self
                .recorder
                .changed
                .wait_until(&mut journal, self.deadline)
                .timed_out()
                && journal.events.is_empty()
            {
                return Err(self.timeout_error(step, expected));
            }
        }
    }

    fn pass_time(&self, duration: Duration) {
        match &self.clock {
            Some(clock) => clock.advance(duration),
            None => std::thread::sleep(duration),
        }
    }

    fn cancel(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;
        if let Some(subscription) = self.recorder.subscription() {
            subscription.cancel();
        }
    }

    /// Cancel a subscription the script left running
    fn finish(&mut self) {
        let terminated = self.recorder.journal.lock().terminated;
        if !terminated {
            self.cancel();
        }
    }

    fn timeout_error(&self, step: usize, expected: &str) -> VerifyError {
        VerifyError::Timeout {
            step,
            expected: expected.to_string(),
            waited: self.timeout,
        }
    }
}

fn mismatch(step: usize, expected: String, actual: String) -> VerifyError {
    VerifyError::Mismatch {
        step,
        expected,
        actual,
    }
}
