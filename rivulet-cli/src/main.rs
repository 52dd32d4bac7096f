mod demos;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use demos::{Demo, Event, Report, Settings};
use rivulet::config::LoggingConfig;
use rivulet::{FlowConfig, RealTimeScheduler, SchedulerRef};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Output {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "rivulet")]
#[command(
    about = "Rivulet - run reactive pipeline demos and inspect their signals",
    long_about = None
)]
struct Args {
    /// Demo pipeline to run
    #[arg(value_enum)]
    demo: Demo,

    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Summary format
    #[arg(short, long, value_enum, default_value = "text")]
    output: Output,

    /// Items emitted by the source
    #[arg(short = 'n', long, default_value = "10")]
    count: u64,

    /// Tick period in milliseconds for time-based demos
    #[arg(long, default_value = "100")]
    period_ms: u64,

    /// Batch size for the limit-rate demo
    #[arg(long, default_value = "3")]
    rate: u64,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // no ANSI codes inside log records
            error!(error = %format!("{:#}", e), "demo failed");
            eprintln!("{}", format!("Error: {:#}", e).red());
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => FlowConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => FlowConfig::default(),
    };
    if let Some(level) = &args.log_level {
        config = config.with_log_level(level.clone());
    }
    init_tracing(&config.logging);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.runtime.timer_threads)
        .enable_all()
        .build()
        .context("building runtime")?;

    let settings = Settings {
        count: args.count,
        period: Duration::from_millis(args.period_ms.max(1)),
        rate: args.rate,
        config,
    };
    let ticks = u32::try_from(settings.count).unwrap_or(u32::MAX);
    let limit = settings.config.verifier.default_timeout() + settings.period.saturating_mul(ticks);

    let report = runtime.block_on(async {
        let clock: SchedulerRef = RealTimeScheduler::new(tokio::runtime::Handle::current());
        tokio::time::timeout(limit, demos::run(args.demo, &settings, clock))
            .await
            .with_context(|| {
                format!("demo {} did not finish within {:?}", args.demo.name(), limit)
            })?
    })?;

    info!(demo = report.demo, events = report.events.len(), "demo finished");
    print_report(&report, args.output)
}

/// Logs go to stderr so the summary on stdout stays machine-readable
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(false);

    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_report(report: &Report, output: Output) -> Result<()> {
    match output {
        Output::Json => {
            println!("{}", serde_json::to_string_pretty(report)?);
        }
        Output::Text => {
            println!(
                "{} {}",
                format!("demo {}", report.demo).bold().cyan(),
                format!("({} ms)", report.elapsed_ms).dimmed()
            );
            if !report.upstream_requests.is_empty() {
                println!("upstream requests: {:?}", report.upstream_requests);
            }
            for event in &report.events {
                println!("{}", describe(event));
            }
        }
    }
    Ok(())
}

fn describe(event: &Event) -> String {
    match event {
        Event::Next {
            subscriber,
            value,
            at_ms,
        } => format!("{:>6} ms  {:<8} next({})", at_ms, subscriber, value),
        Event::Error {
            subscriber,
            message,
            at_ms,
        } => {
            let error = format!("error: {}", message).red();
            format!("{:>6} ms  {:<8} {}", at_ms, subscriber, error)
        }
        Event::Complete { subscriber, at_ms } => {
            format!("{:>6} ms  {:<8} {}", at_ms, subscriber, "complete".green())
        }
    }
}
