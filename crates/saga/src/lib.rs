//! Saga orchestration with automatic compensation.
//!
//! A saga is a long-running business transaction modeled as an ordered
//! sequence of locally committed steps with compensating inverses. The
//! orchestrator executes steps strictly sequentially; on failure or
//! cancellation it compensates the executed steps in reverse order, then
//! surfaces the original outcome.
//!
//! Saga state lives in memory and is scoped to a single execution: this crate
//! deliberately carries no persistence.

pub mod definition;
pub mod instance;
pub mod orchestrator;
pub mod step;
pub mod types;

pub use definition::{SagaDefinition, SagaDefinitionBuilder, SagaDefinitionError};
pub use instance::{ExecutedStep, SagaInstance};
pub use orchestrator::{SagaOrchestrator, SagaReport};
pub use step::{SagaStep, StepError, StepResult};
pub use types::{SagaError, SagaId, SagaResult, SagaStatus};
