//! Message bus error taxonomy

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by bus operations.
///
/// Handler failures never appear here from the caller's perspective; they are
/// confined to the delivery (requeue or drop).
#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("failed to connect to broker: {0}")]
    Connection(String),

    #[error("failed to publish message: {0}")]
    Publish(String),

    #[error("failed to subscribe: {0}")]
    Subscribe(String),

    #[error("message serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("request timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },

    #[error("request was cancelled")]
    Cancelled,
}

impl MessagingError {
    /// True for malformed-payload failures, which must not be redelivered.
    #[inline]
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Serialization(_))
    }

    /// Machine-readable kind for logs and metrics tags.
    #[inline]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::Publish(_) => "publish",
            Self::Subscribe(_) => "subscribe",
            Self::Serialization(_) => "serialization",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Result alias used across the messaging crate.
pub type MessagingResult<T> = Result<T, MessagingError>;
