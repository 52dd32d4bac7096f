//! # Rivulet
//!
//! In-process reactive streams with demand-driven backpressure
//!
//! ## Features
//!
//! - 🚰 **Backpressure**: subscribers pull items with `request(n)`; nothing is emitted beyond demand
//! - 🧩 **Operators**: map, filter, take, limit_rate, delay_elements, flat_map, publish, error recovery
//! - ⏱️ **Schedulers**: tokio-backed real time, or a virtual clock for deterministic tests
//! - 🛡️ **Protocol guard**: every user subscriber sees ordered signals and exactly one terminal
//! - ✅ **StepVerifier**: scripted expectations over live or virtual-time pipelines
//!
//! ## Quick Start
//!
//! ```rust
//! use rivulet::{Flux, LambdaSubscriber, Subscription};
//!
//! Flux::range(1, 10)
//!     .filter(|n| n % 2 == 0)
//!     .map(|n| n * 10)
//!     .subscribe(
//!         LambdaSubscriber::new(|n| println!("Number {}", n))
//!             .with_complete(|| println!("DONE!"))
//!             .with_subscribe(|subscription: &Subscription| subscription.request(3)),
//!     );
//! ```

pub mod config;
pub mod demand;
pub mod error;
mod flux;
mod guard;
mod mono;
mod ops;
pub mod scheduler;
mod source;
pub mod stream;
mod subscriber;
pub mod verifier;

pub use config::FlowConfig;
pub use error::{ConfigError, FlowError, ProtocolViolation, Result};
pub use flux::{Flux, Publisher};
pub use mono::Mono;
pub use ops::{
    ConnectableFlux, Connection, DEFAULT_FLAT_MAP_CONCURRENCY, DEFAULT_FLAT_MAP_PREFETCH,
    DEFAULT_PUBLISH_PREFETCH, SignalObserver,
};
pub use scheduler::{RealTimeScheduler, Scheduler, SchedulerRef, VirtualTimeScheduler};
pub use stream::FluxStream;
pub use subscriber::{
    BoxSubscriber, Demand, LambdaSubscriber, Signal, Subscriber, Subscription, SubscriptionHandle,
};
pub use verifier::{StepVerifier, VerifyError};
