//! Saga definition
//!
//! An immutable, named, ordered sequence of steps. Ordering problems are
//! rejected at construction, never at execution time.

use std::sync::Arc;
use thiserror::Error;

use crate::step::SagaStep;

/// Errors rejected by the definition builder.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SagaDefinitionError {
    #[error("step '{step}' has order 0; orders are strictly positive")]
    NonPositiveOrder { step: String },

    #[error("steps '{first}' and '{second}' share order {order}")]
    DuplicateOrder {
        order: u32,
        first: String,
        second: String,
    },
}

/// Immutable ordered sequence of steps with a stable name.
pub struct SagaDefinition<T> {
    name: String,
    steps: Vec<Arc<dyn SagaStep<T>>>,
}

impl<T> SagaDefinition<T> {
    /// Starts building a definition with the given stable name.
    pub fn builder(name: impl Into<String>) -> SagaDefinitionBuilder<T> {
        SagaDefinitionBuilder {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    /// The stable saga name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Steps sorted by ascending order.
    #[inline]
    pub fn steps(&self) -> &[Arc<dyn SagaStep<T>>] {
        &self.steps
    }

    /// Number of steps.
    #[inline]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// True when the definition has no steps.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Builder validating step ordering.
pub struct SagaDefinitionBuilder<T> {
    name: String,
    steps: Vec<Arc<dyn SagaStep<T>>>,
}

impl<T> SagaDefinitionBuilder<T> {
    /// Adds a step.
    pub fn step(mut self, step: impl SagaStep<T> + 'static) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    /// Adds an already shared step.
    pub fn step_arc(mut self, step: Arc<dyn SagaStep<T>>) -> Self {
        self.steps.push(step);
        self
    }

    /// Validates orders (strictly positive, no ties) and sorts the steps.
    pub fn build(self) -> Result<SagaDefinition<T>, SagaDefinitionError> {
        let mut steps = self.steps;
        for step in &steps {
            if step.order() == 0 {
                return Err(SagaDefinitionError::NonPositiveOrder {
                    step: step.name().to_string(),
                });
            }
        }
        steps.sort_by_key(|step| step.order());
        for pair in steps.windows(2) {
            if pair[0].order() == pair[1].order() {
                return Err(SagaDefinitionError::DuplicateOrder {
                    order: pair[0].order(),
                    first: pair[0].name().to_string(),
                    second: pair[1].name().to_string(),
                });
            }
        }
        Ok(SagaDefinition {
            name: self.name,
            steps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{StepError, StepResult};
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    struct NamedStep {
        name: &'static str,
        order: u32,
    }

    #[async_trait]
    impl SagaStep<u32> for NamedStep {
        fn name(&self) -> &str {
            self.name
        }

        fn order(&self) -> u32 {
            self.order
        }

        async fn execute(&self, _payload: &mut u32, _ctx: &CancellationToken) -> StepResult {
            Ok(())
        }

        async fn compensate(&self, _payload: &mut u32, _ctx: &CancellationToken) -> StepResult {
            Err(StepError::new("unused"))
        }
    }

    #[test]
    fn test_steps_are_sorted_by_order() {
        let definition = SagaDefinition::builder("order-fulfillment")
            .step(NamedStep { name: "ship", order: 3 })
            .step(NamedStep { name: "reserve", order: 1 })
            .step(NamedStep { name: "charge", order: 2 })
            .build()
            .unwrap();

        let names: Vec<_> = definition.steps().iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["reserve", "charge", "ship"]);
        assert_eq!(definition.name(), "order-fulfillment");
        assert_eq!(definition.len(), 3);
    }

    #[test]
    fn test_zero_order_is_rejected() {
        let result = SagaDefinition::builder("bad")
            .step(NamedStep { name: "zero", order: 0 })
            .build();
        assert_eq!(
            result.err(),
            Some(SagaDefinitionError::NonPositiveOrder {
                step: "zero".to_string()
            })
        );
    }

    #[test]
    fn test_duplicate_order_is_rejected() {
        let result = SagaDefinition::builder("bad")
            .step(NamedStep { name: "a", order: 1 })
            .step(NamedStep { name: "b", order: 1 })
            .build();
        assert!(matches!(
            result.err(),
            Some(SagaDefinitionError::DuplicateOrder { order: 1, .. })
        ));
    }

    #[test]
    fn test_empty_definition_builds() {
        let definition = SagaDefinition::<u32>::builder("noop").build().unwrap();
        assert!(definition.is_empty());
    }
}
