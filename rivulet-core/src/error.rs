//! Error types for Rivulet

use std::error::Error as StdError;
use std::sync::Arc;
use thiserror::Error;

/// Result type alias for Rivulet operations
pub type Result<T> = std::result::Result<T, FlowError>;

/// A user error shared between every subscriber that observes it
pub type SharedError = Arc<dyn StdError + Send + Sync + 'static>;

/// Errors carried by a stream's terminal Error signal
#[derive(Error, Debug, Clone)]
pub enum FlowError {
    /// A user-supplied function failed
    #[error("upstream failure: {0}")]
    Upstream(#[source] SharedError),

    /// A scheduled callback panicked
    #[error("scheduler failure: {0}")]
    Scheduler(String),

    /// A publisher or subscriber broke the demand/terminal contract
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),

    /// A time-driven source could not emit for lack of demand
    #[error("overflow: {0}")]
    Overflow(String),

    /// A source was built with arguments it cannot honor
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Reactive-streams contract breaches
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    #[error("delivered {delivered} items against a cumulative demand of {requested}")]
    DemandExceeded { requested: u64, delivered: u64 },

    #[error("request(n) requires n > 0")]
    NonPositiveRequest,

    #[error("{0} signal after terminal")]
    AfterTerminal(&'static str),
}

impl FlowError {
    /// Wrap a user error
    pub fn upstream<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Upstream(Arc::new(error))
    }

    /// Wrap a plain message as an upstream failure
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Upstream(Arc::new(Message(message.into())))
    }

    /// Check whether this is an upstream failure of type `E`
    pub fn is<E: StdError + 'static>(&self) -> bool {
        self.downcast_ref::<E>().is_some()
    }

    /// Borrow the upstream failure as `E`, if it is one
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        match self {
            Self::Upstream(inner) => inner.downcast_ref::<E>(),
            _ => None,
        }
    }

    /// Short stable label for logs
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Upstream(_) => "upstream_failure",
            Self::Scheduler(_) => "scheduler_failure",
            Self::Protocol(_) => "protocol_violation",
            Self::Overflow(_) => "overflow",
            Self::InvalidArgument(_) => "invalid_argument",
        }
    }
}

#[derive(Debug, Error)]
#[error("{0}")]
struct Message(String);

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("index error")]
    struct IndexOutOfBounds;

    #[test]
    fn test_downcast_upstream() {
        let err = FlowError::upstream(IndexOutOfBounds);
        assert!(err.is::<IndexOutOfBounds>());
        assert_eq!(err.to_string(), "upstream failure: index error");
        assert_eq!(err.as_label(), "upstream_failure");
    }

    #[test]
    fn test_downcast_other_kinds() {
        let err = FlowError::from(ProtocolViolation::NonPositiveRequest);
        assert!(!err.is::<IndexOutOfBounds>());
        assert_eq!(err.as_label(), "protocol_violation");
    }

    #[test]
    fn test_msg() {
        let err = FlowError::msg("boom");
        assert_eq!(err.to_string(), "upstream failure: boom");
    }
}
