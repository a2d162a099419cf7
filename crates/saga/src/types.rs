//! Core saga types

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// SagaId
// ============================================================================

/// Unique identifier of one saga execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SagaId(pub Uuid);

impl SagaId {
    /// Creates a fresh random id
    #[inline]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID
    #[inline]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID
    #[inline]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SagaId {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SagaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// SagaStatus
// ============================================================================

/// Lifecycle of a saga execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SagaStatus {
    /// Created, no step launched yet
    Pending,
    /// Steps are executing
    Running,
    /// Every step completed
    Succeeded,
    /// A step failed and every executed step was compensated
    Compensated,
    /// A step failed and compensation could not fully run
    CompensationFailed,
    /// Execution was cancelled; executed steps were compensated best-effort
    Cancelled,
}

impl SagaStatus {
    /// True once the saga can no longer change state
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaStatus::Succeeded
                | SagaStatus::Compensated
                | SagaStatus::CompensationFailed
                | SagaStatus::Cancelled
        )
    }

    /// Lowercase tag used in metrics and logs
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::Pending => "pending",
            SagaStatus::Running => "running",
            SagaStatus::Succeeded => "succeeded",
            SagaStatus::Compensated => "compensated",
            SagaStatus::CompensationFailed => "compensation_failed",
            SagaStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// SagaError
// ============================================================================

/// Failure surfaced to the saga caller.
#[derive(Debug, Error)]
pub enum SagaError {
    /// A step failed; executed predecessors were compensated
    #[error("step '{step}' failed: {reason}")]
    StepFailed { step: String, reason: String },

    /// The execution context was cancelled
    #[error("saga was cancelled")]
    Cancelled,
}

/// Result alias for saga consumers.
pub type SagaResult<T> = Result<T, SagaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saga_id_uniqueness_and_display() {
        let a = SagaId::new();
        let b = SagaId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string(), a.as_uuid().to_string());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!SagaStatus::Pending.is_terminal());
        assert!(!SagaStatus::Running.is_terminal());
        assert!(SagaStatus::Succeeded.is_terminal());
        assert!(SagaStatus::Compensated.is_terminal());
        assert!(SagaStatus::CompensationFailed.is_terminal());
        assert!(SagaStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_step_failed_message_carries_step_and_reason() {
        let err = SagaError::StepFailed {
            step: "B".to_string(),
            reason: "inv".to_string(),
        };
        assert_eq!(err.to_string(), "step 'B' failed: inv");
    }
}
