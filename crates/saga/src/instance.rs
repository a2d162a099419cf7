//! Per-execution saga state

use std::time::Instant;

use crate::types::{SagaId, SagaStatus};

/// Record of one successfully executed step, kept for compensation.
#[derive(Debug, Clone)]
pub struct ExecutedStep {
    /// Index into the definition's sorted step list
    pub index: usize,
    /// Step name
    pub name: String,
}

/// Mutable state of one running saga execution.
///
/// The payload is owned exclusively by the running saga; steps mutate it
/// sequentially, so no locking is involved.
pub struct SagaInstance<T> {
    id: SagaId,
    definition_name: String,
    payload: T,
    executed: Vec<ExecutedStep>,
    status: SagaStatus,
    started_at: Instant,
}

impl<T> SagaInstance<T> {
    /// Creates pending state for a new execution.
    pub fn new(definition_name: impl Into<String>, payload: T) -> Self {
        Self {
            id: SagaId::new(),
            definition_name: definition_name.into(),
            payload,
            executed: Vec::new(),
            status: SagaStatus::Pending,
            started_at: Instant::now(),
        }
    }

    #[inline]
    pub fn id(&self) -> &SagaId {
        &self.id
    }

    #[inline]
    pub fn definition_name(&self) -> &str {
        &self.definition_name
    }

    #[inline]
    pub fn status(&self) -> SagaStatus {
        self.status
    }

    #[inline]
    pub fn payload(&self) -> &T {
        &self.payload
    }

    #[inline]
    pub fn payload_mut(&mut self) -> &mut T {
        &mut self.payload
    }

    /// Steps recorded as executed, in execution order.
    #[inline]
    pub fn executed(&self) -> &[ExecutedStep] {
        &self.executed
    }

    #[inline]
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Records a step as executed; it becomes eligible for compensation.
    pub fn record_executed(&mut self, index: usize, name: &str) {
        self.executed.push(ExecutedStep {
            index,
            name: name.to_string(),
        });
    }

    /// Moves the lifecycle forward. Terminal states are sticky.
    pub fn set_status(&mut self, status: SagaStatus) {
        if !self.status.is_terminal() {
            self.status = status;
        }
    }

    /// Tears the instance apart into its terminal pieces.
    pub(crate) fn into_parts(self) -> (SagaId, String, T, Vec<ExecutedStep>, SagaStatus) {
        (
            self.id,
            self.definition_name,
            self.payload,
            self.executed,
            self.status,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_recording() {
        let mut instance = SagaInstance::new("order", 0u32);
        assert_eq!(instance.status(), SagaStatus::Pending);
        assert!(instance.executed().is_empty());

        instance.set_status(SagaStatus::Running);
        instance.record_executed(0, "reserve");
        instance.record_executed(1, "charge");
        assert_eq!(instance.executed().len(), 2);
        assert_eq!(instance.executed()[1].name, "charge");
    }

    #[test]
    fn test_terminal_status_is_sticky() {
        let mut instance = SagaInstance::new("order", ());
        instance.set_status(SagaStatus::Cancelled);
        instance.set_status(SagaStatus::Succeeded);
        assert_eq!(instance.status(), SagaStatus::Cancelled);
    }

    #[test]
    fn test_payload_is_mutable() {
        let mut instance = SagaInstance::new("order", vec![1]);
        instance.payload_mut().push(2);
        assert_eq!(instance.payload(), &vec![1, 2]);
    }
}
