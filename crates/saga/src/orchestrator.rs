//! Saga orchestrator
//!
//! Executes a definition against a payload: steps run strictly sequentially
//! in ascending order; the first failure (or cancellation) unwinds the
//! already-executed steps in reverse order. Compensation is best-effort and
//! always runs under a fresh, non-cancellable context, so a cancelled saga
//! still releases what it reserved.

use sarea_observability::{Metrics, NoopMetrics, NoopTracer, SpanHandle, SpanKind, SpanStatus, Tracer};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::definition::SagaDefinition;
use crate::instance::SagaInstance;
use crate::types::{SagaError, SagaId, SagaStatus};

/// Terminal report of one saga execution.
///
/// The payload snapshot is returned in every outcome; the original failure,
/// when present, is never overridden by compensation problems.
#[derive(Debug)]
pub struct SagaReport<T> {
    pub saga_id: SagaId,
    pub saga_name: String,
    pub status: SagaStatus,
    pub payload: T,
    /// Names of steps that executed successfully, in execution order
    pub executed_steps: Vec<String>,
    /// Names of steps whose compensation succeeded, in compensation order
    pub compensated_steps: Vec<String>,
    /// Names of steps whose compensation failed
    pub failed_compensations: Vec<String>,
    pub duration: Duration,
    /// The original failure for every non-success outcome
    pub error: Option<SagaError>,
}

impl<T> SagaReport<T> {
    /// True when every step completed.
    #[inline]
    pub fn is_success(&self) -> bool {
        self.status == SagaStatus::Succeeded
    }

    /// Converts the report into the payload or the original failure.
    pub fn into_result(self) -> Result<T, SagaError> {
        match self.error {
            None => Ok(self.payload),
            Some(error) => Err(error),
        }
    }
}

/// Per-execution compensation bookkeeping.
#[derive(Default)]
struct CompensationLog {
    compensated: Vec<String>,
    failed: Vec<String>,
    halted: bool,
}

impl CompensationLog {
    fn is_clean(&self) -> bool {
        self.failed.is_empty() && !self.halted
    }
}

/// Drives saga executions. Cheap to clone; holds only observability sinks.
#[derive(Clone)]
pub struct SagaOrchestrator {
    tracer: Arc<dyn Tracer>,
    metrics: Arc<dyn Metrics>,
}

impl Default for SagaOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl SagaOrchestrator {
    /// Creates an orchestrator with no-op observability.
    pub fn new() -> Self {
        Self {
            tracer: Arc::new(NoopTracer),
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Wires a tracer.
    pub fn with_tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = tracer;
        self
    }

    /// Wires a metrics backend.
    pub fn with_metrics(mut self, metrics: Arc<dyn Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Executes `definition` against `payload` under `ctx`.
    ///
    /// Cancellation stops launching new steps; executed steps are compensated
    /// under a fresh non-cancellable context and the cancellation is surfaced
    /// after compensation completes.
    pub async fn execute<T: Send>(
        &self,
        definition: &SagaDefinition<T>,
        payload: T,
        ctx: &CancellationToken,
    ) -> SagaReport<T> {
        let started = Instant::now();
        let mut instance = SagaInstance::new(definition.name(), payload);
        instance.set_status(SagaStatus::Running);

        let saga_id = instance.id().to_string();
        let mut span = self.tracer.start_span("saga.execute", SpanKind::Internal);
        span.add_tag("saga_name", definition.name());
        span.add_tag("saga_id", &saga_id);
        span.add_event("saga-start", &[("steps", &definition.len().to_string())]);
        info!(
            saga = definition.name(),
            saga_id = %saga_id,
            steps = definition.len(),
            "saga started"
        );

        let (failure, halt_compensation) = self
            .run_steps(definition, &mut instance, ctx, &mut *span)
            .await;

        let mut log = CompensationLog::default();
        let status = match &failure {
            None => SagaStatus::Succeeded,
            Some(original) => {
                if halt_compensation {
                    error!(
                        saga = definition.name(),
                        saga_id = %saga_id,
                        "non-compensatable failure, compensation halted"
                    );
                    span.add_event("compensation-halted", &[]);
                    log.halted = true;
                } else {
                    self.compensate(definition, &mut instance, &mut *span, &mut log)
                        .await;
                }
                match original {
                    SagaError::Cancelled => SagaStatus::Cancelled,
                    _ if log.is_clean() => SagaStatus::Compensated,
                    _ => SagaStatus::CompensationFailed,
                }
            }
        };

        let duration = started.elapsed();
        instance.set_status(status);
        span.add_event("saga-end", &[("status", status.as_str())]);
        span.set_status(
            if status == SagaStatus::Succeeded {
                SpanStatus::Ok
            } else {
                SpanStatus::Error
            },
            failure.as_ref().map(|e| e.to_string()).as_deref(),
        );
        self.metrics.record_saga_execution(
            definition.name(),
            status.as_str(),
            definition.len(),
            duration,
        );
        info!(
            saga = definition.name(),
            saga_id = %saga_id,
            status = %status,
            duration_ms = duration.as_millis() as u64,
            "saga finished"
        );

        let (saga_id, saga_name, payload, executed, _) = instance.into_parts();
        SagaReport {
            saga_id,
            saga_name,
            status,
            payload,
            executed_steps: executed.iter().map(|s| s.name.clone()).collect(),
            compensated_steps: log.compensated,
            failed_compensations: log.failed,
            duration,
            error: failure,
        }
    }

    /// Runs steps in order until completion, failure or cancellation.
    /// Returns the failure (if any) and whether compensation must halt.
    async fn run_steps<T: Send>(
        &self,
        definition: &SagaDefinition<T>,
        instance: &mut SagaInstance<T>,
        ctx: &CancellationToken,
        span: &mut dyn SpanHandle,
    ) -> (Option<SagaError>, bool) {
        let saga_id = instance.id().to_string();

        for (index, step) in definition.steps().iter().enumerate() {
            if ctx.is_cancelled() {
                return (Some(SagaError::Cancelled), false);
            }

            let step_name = step.name().to_string();
            span.add_event("step-start", &[("step", &step_name)]);
            let step_started = Instant::now();

            // A step future dropped on cancellation releases its payload
            // borrow before compensation begins.
            let outcome = tokio::select! {
                biased;
                outcome = step.execute(instance.payload_mut(), ctx) => Some(outcome),
                _ = ctx.cancelled() => None,
            };

            match outcome {
                Some(Ok(())) => {
                    self.metrics.record_saga_step(
                        definition.name(),
                        &step_name,
                        "success",
                        step_started.elapsed(),
                    );
                    span.add_event("step-result", &[("step", &step_name), ("result", "success")]);
                    instance.record_executed(index, &step_name);
                }
                Some(Err(step_error)) => {
                    self.metrics.record_saga_step(
                        definition.name(),
                        &step_name,
                        "failure",
                        step_started.elapsed(),
                    );
                    span.add_event("step-result", &[("step", &step_name), ("result", "failure")]);
                    warn!(
                        saga = definition.name(),
                        saga_id = %saga_id,
                        step = %step_name,
                        error = %step_error,
                        "saga step failed"
                    );
                    let halt = !step_error.is_compensatable();
                    return (
                        Some(SagaError::StepFailed {
                            step: step_name,
                            reason: step_error.reason().to_string(),
                        }),
                        halt,
                    );
                }
                None => {
                    self.metrics.record_saga_step(
                        definition.name(),
                        &step_name,
                        "cancelled",
                        step_started.elapsed(),
                    );
                    span.add_event("step-result", &[("step", &step_name), ("result", "cancelled")]);
                    return (Some(SagaError::Cancelled), false);
                }
            }
        }
        (None, false)
    }

    /// Unwinds executed steps in reverse order, best-effort: one failed
    /// compensation is recorded and the remaining steps are still unwound.
    async fn compensate<T: Send>(
        &self,
        definition: &SagaDefinition<T>,
        instance: &mut SagaInstance<T>,
        span: &mut dyn SpanHandle,
        log: &mut CompensationLog,
    ) {
        span.add_event("compensation-start", &[]);
        info!(
            saga = definition.name(),
            saga_id = %instance.id(),
            executed = instance.executed().len(),
            "compensating executed steps in reverse order"
        );

        // Compensation must complete even when the saga was cancelled.
        let compensation_ctx = CancellationToken::new();

        let executed: Vec<_> = instance.executed().to_vec();
        for record in executed.iter().rev() {
            let step = &definition.steps()[record.index];
            let step_started = Instant::now();
            let result = step
                .compensate(instance.payload_mut(), &compensation_ctx)
                .await;
            let elapsed = step_started.elapsed();

            match result {
                Ok(()) => {
                    self.metrics.record_saga_step(
                        definition.name(),
                        &record.name,
                        "compensated",
                        elapsed,
                    );
                    span.add_event(
                        "compensation-result",
                        &[("step", &record.name), ("result", "success")],
                    );
                    log.compensated.push(record.name.clone());
                }
                Err(err) => {
                    self.metrics.record_saga_step(
                        definition.name(),
                        &record.name,
                        "compensation_failed",
                        elapsed,
                    );
                    span.add_event(
                        "compensation-result",
                        &[("step", &record.name), ("result", "failure")],
                    );
                    error!(
                        saga = definition.name(),
                        saga_id = %instance.id(),
                        step = %record.name,
                        error = %err,
                        "compensation failed"
                    );
                    log.failed.push(record.name.clone());
                }
            }
        }
    }
}
