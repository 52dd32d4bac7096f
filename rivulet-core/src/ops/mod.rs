//! Operator stages
//!
//! Each operator is an inherent method on [`Flux`](crate::Flux) defined next
//! to the publisher/subscriber pair that implements it. A stage subscribes
//! upstream with the raw (unguarded) path and only wraps its downstream in a
//! serializing sink when it can emit from more than one context.

mod delay;
mod filter;
mod flat_map;
mod limit_rate;
mod map;
mod peek;
mod publish;
mod resume;
mod take;

pub use flat_map::{DEFAULT_FLAT_MAP_CONCURRENCY, DEFAULT_FLAT_MAP_PREFETCH};
pub use peek::SignalObserver;
pub use publish::{Connection, ConnectableFlux, DEFAULT_PUBLISH_PREFETCH};

pub(crate) use peek::ObserverFactory;
