use futures::StreamExt;
use parking_lot::Mutex;
use rivulet::{FlowConfig, FlowError, Flux, FluxStream, SchedulerRef};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Demonstration pipelines runnable from the command line
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Demo {
    /// Filter and map a finite range
    Range,
    /// Batch upstream requests with limit_rate
    LimitRate,
    /// Periodic ticks on the wall clock
    Interval,
    /// Two subscribers sharing one hot source, the second attaching late
    Connectable,
    /// Recover from a failing item with a fallback source
    ErrorResume,
}

impl Demo {
    pub fn name(self) -> &'static str {
        match self {
            Demo::Range => "range",
            Demo::LimitRate => "limit-rate",
            Demo::Interval => "interval",
            Demo::Connectable => "connectable",
            Demo::ErrorResume => "error-resume",
        }
    }
}

/// Knobs shared by every demo
#[derive(Debug, Clone)]
pub struct Settings {
    pub count: u64,
    pub period: Duration,
    pub rate: u64,
    pub config: FlowConfig,
}

/// One signal as seen by a named subscriber
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum Event {
    Next {
        subscriber: &'static str,
        value: i64,
        at_ms: u64,
    },
    Error {
        subscriber: &'static str,
        message: String,
        at_ms: u64,
    },
    Complete {
        subscriber: &'static str,
        at_ms: u64,
    },
}

#[derive(Debug, Serialize)]
pub struct Report {
    pub demo: &'static str,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub upstream_requests: Vec<u64>,
    pub events: Vec<Event>,
}

#[derive(Debug, Error)]
#[error("item {0} rejected")]
struct Rejected(i64);

pub async fn run(demo: Demo, settings: &Settings, clock: SchedulerRef) -> anyhow::Result<Report> {
    info!(demo = demo.name(), count = settings.count, "running demo");
    let started = clock.now();
    let mut upstream_requests = Vec::new();

    let events = match demo {
        Demo::Range => {
            let flux = Flux::range(1, settings.count)
                .filter(|n| n % 2 == 0)
                .map(|n| n * 10)
                .log("demo.range");
            collect("main", flux.into_stream(), clock.clone()).await
        }
        Demo::LimitRate => {
            let requests = Arc::new(Mutex::new(Vec::new()));
            let log = requests.clone();
            let flux = Flux::range(1, settings.count)
                .do_on_request(move |n| log.lock().push(n))
                .limit_rate(settings.rate);
            let events = collect("main", flux.into_stream(), clock.clone()).await;
            upstream_requests = requests.lock().clone();
            events
        }
        Demo::Interval => {
            let flux = ticks(settings, clock.clone());
            collect("main", flux.into_stream(), clock.clone()).await
        }
        Demo::Connectable => connectable(settings, clock.clone()).await?,
        Demo::ErrorResume => {
            let fail_at = (settings.count as i64 / 2).max(1);
            let flux = Flux::range(1, settings.count)
                .try_map(move |n| if n == fail_at { Err(Rejected(n)) } else { Ok(n) })
                .on_error_resume(|error| {
                    warn!(error = %error, "switching to fallback");
                    Flux::just([-1, -2])
                });
            collect("main", flux.into_stream(), clock.clone()).await
        }
    };

    Ok(Report {
        demo: demo.name(),
        elapsed_ms: millis(clock.now().saturating_sub(started)),
        upstream_requests,
        events,
    })
}

fn ticks(settings: &Settings, clock: SchedulerRef) -> Flux<i64> {
    Flux::interval(settings.period, clock)
        .take(settings.count)
        .map(|tick| tick as i64)
}

async fn connectable(settings: &Settings, clock: SchedulerRef) -> anyhow::Result<Vec<Event>> {
    let hot = ticks(settings, clock.clone()).publish_with(settings.config.publish.prefetch);

    let first = tokio::spawn(collect("first", hot.as_flux().into_stream(), clock.clone()));
    let connection = hot.connect();

    let half = u32::try_from(settings.count / 2).unwrap_or(u32::MAX);
    let halfway = settings.period.saturating_mul(half) + settings.period / 2;
    tokio::time::sleep(halfway).await;
    debug!(subscribers = hot.subscriber_count(), "attaching late subscriber");
    let second = tokio::spawn(collect("second", hot.as_flux().into_stream(), clock.clone()));

    let mut events = first.await?;
    events.extend(second.await?);
    connection.dispose();
    Ok(events)
}

async fn collect(
    subscriber: &'static str,
    mut stream: FluxStream<i64>,
    clock: SchedulerRef,
) -> Vec<Event> {
    let mut events = Vec::new();
    while let Some(item) = stream.next().await {
        let at_ms = millis(clock.now());
        match item {
            Ok(value) => events.push(Event::Next {
                subscriber,
                value,
                at_ms,
            }),
            Err(error) => {
                events.push(failure(subscriber, &error, at_ms));
                return events;
            }
        }
    }
    events.push(Event::Complete {
        subscriber,
        at_ms: millis(clock.now()),
    });
    events
}

fn failure(subscriber: &'static str, error: &FlowError, at_ms: u64) -> Event {
    Event::Error {
        subscriber,
        message: error.to_string(),
        at_ms,
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
