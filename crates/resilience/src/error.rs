//! Resilience error taxonomy
//!
//! A single sum type classifies every failure a policy can see. The retry
//! classifier, the circuit breaker and the transport façade all dispatch on
//! the variant, never on string matching.

use std::time::Duration;
use thiserror::Error;

/// Boxed cause preserved for logging.
pub type ErrorSource = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure classification shared by all resilience policies.
#[derive(Debug, Error)]
pub enum ResilienceError {
    /// Temporary failure (network blip, 5xx, broker hiccup). Retry-eligible.
    #[error("transient failure: {message}")]
    Transient {
        message: String,
        #[source]
        source: Option<ErrorSource>,
    },

    /// Permanent failure (validation, contract violation, 4xx). Never retried.
    #[error("permanent failure: {message}")]
    Permanent {
        message: String,
        #[source]
        source: Option<ErrorSource>,
    },

    /// Refused by an open circuit breaker without invoking the operation.
    #[error("circuit breaker '{breaker}' is open")]
    CircuitOpen { breaker: String },

    /// A bounded operation exceeded its budget.
    #[error("operation timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },

    /// The caller's context was cancelled. Never retried.
    #[error("operation was cancelled")]
    Cancelled,
}

impl ResilienceError {
    /// Creates a transient failure from a message.
    #[inline]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a transient failure chaining the underlying cause.
    #[inline]
    pub fn transient_with_source(message: impl Into<String>, source: impl Into<ErrorSource>) -> Self {
        Self::Transient {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Creates a permanent failure from a message.
    #[inline]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a permanent failure chaining the underlying cause.
    #[inline]
    pub fn permanent_with_source(message: impl Into<String>, source: impl Into<ErrorSource>) -> Self {
        Self::Permanent {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Default retry classification: transient failures and timeouts retry.
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Timeout { .. })
    }

    /// Returns true for caller-initiated cancellation.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Machine-readable kind for logs and metrics tags.
    #[inline]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transient { .. } => "transient",
            Self::Permanent { .. } => "permanent",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Result alias used across the resilience crate.
pub type ResilienceResult<T> = Result<T, ResilienceError>;
