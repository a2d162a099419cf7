//! Saga step contract

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Boxed cause preserved for logging.
pub type ErrorSource = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure of a step's execute or compensate operation.
///
/// `compensatable` qualifies an execute failure: when false, the state left
/// behind cannot be undone automatically and the orchestrator halts
/// compensation at that step instead of unwinding its predecessors.
#[derive(Debug, Error)]
#[error("{reason}")]
pub struct StepError {
    reason: String,
    #[source]
    source: Option<ErrorSource>,
    compensatable: bool,
}

impl StepError {
    /// Creates a compensatable failure.
    #[inline]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            source: None,
            compensatable: true,
        }
    }

    /// Creates a compensatable failure chaining its cause.
    #[inline]
    pub fn with_source(reason: impl Into<String>, source: impl Into<ErrorSource>) -> Self {
        Self {
            reason: reason.into(),
            source: Some(source.into()),
            compensatable: true,
        }
    }

    /// Creates a failure after which automatic compensation is unsafe.
    #[inline]
    pub fn non_compensatable(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            source: None,
            compensatable: false,
        }
    }

    /// The human-readable failure reason.
    #[inline]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Whether compensation may proceed after this failure.
    #[inline]
    pub fn is_compensatable(&self) -> bool {
        self.compensatable
    }
}

/// Result alias for step operations.
pub type StepResult = Result<(), StepError>;

/// One named unit of a saga.
///
/// `execute` is effectful and not assumed idempotent. `compensate` is the
/// application-defined undo: it MUST be idempotent and safe to call after a
/// partially successful `execute`.
#[async_trait]
pub trait SagaStep<T>: Send + Sync {
    /// Step name used in logs, events and failure messages
    fn name(&self) -> &str;

    /// Execution order; strictly positive, unique within a definition
    fn order(&self) -> u32;

    /// Forward operation, mutating the shared payload
    async fn execute(&self, payload: &mut T, ctx: &CancellationToken) -> StepResult;

    /// Inverse operation, undoing this step's effect on the payload
    async fn compensate(&self, payload: &mut T, ctx: &CancellationToken) -> StepResult;
}
