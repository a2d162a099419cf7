//! End-to-end orchestration scenarios.

use async_trait::async_trait;
use sarea_saga::{
    SagaDefinition, SagaError, SagaOrchestrator, SagaStatus, SagaStep, StepError, StepResult,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default, Clone, PartialEq)]
struct OrderPayload {
    order_id: u64,
    amount: f64,
    reservation_id: Option<String>,
    payment_id: Option<String>,
    shipment_id: Option<String>,
}

type Journal = Arc<Mutex<Vec<String>>>;

fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

/// Step that writes its side effect into the payload and journals each call.
struct RecordingStep {
    name: &'static str,
    order: u32,
    journal: Journal,
    fail_execute: Option<StepErrorKind>,
    fail_compensate: bool,
    execute_delay: Duration,
}

#[derive(Clone, Copy)]
enum StepErrorKind {
    Compensatable,
    NonCompensatable,
}

impl RecordingStep {
    fn new(name: &'static str, order: u32, journal: &Journal) -> Self {
        Self {
            name,
            order,
            journal: journal.clone(),
            fail_execute: None,
            fail_compensate: false,
            execute_delay: Duration::ZERO,
        }
    }

    fn failing(mut self, kind: StepErrorKind) -> Self {
        self.fail_execute = Some(kind);
        self
    }

    fn failing_compensation(mut self) -> Self {
        self.fail_compensate = true;
        self
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.execute_delay = delay;
        self
    }

    fn mark(&self, event: &str) {
        self.journal.lock().unwrap().push(format!("{}:{}", event, self.name));
    }
}

#[async_trait]
impl SagaStep<OrderPayload> for RecordingStep {
    fn name(&self) -> &str {
        self.name
    }

    fn order(&self) -> u32 {
        self.order
    }

    async fn execute(&self, payload: &mut OrderPayload, _ctx: &CancellationToken) -> StepResult {
        self.mark("exec");
        if !self.execute_delay.is_zero() {
            tokio::time::sleep(self.execute_delay).await;
        }
        if let Some(kind) = self.fail_execute {
            return Err(match kind {
                StepErrorKind::Compensatable => StepError::new("inv"),
                StepErrorKind::NonCompensatable => StepError::non_compensatable("charge settled"),
            });
        }
        match self.name {
            "reserve" => payload.reservation_id = Some(format!("res-{}", payload.order_id)),
            "charge" => payload.payment_id = Some(format!("pay-{}", payload.order_id)),
            "ship" => payload.shipment_id = Some(format!("shp-{}", payload.order_id)),
            _ => {}
        }
        Ok(())
    }

    async fn compensate(&self, payload: &mut OrderPayload, _ctx: &CancellationToken) -> StepResult {
        self.mark("comp");
        if self.fail_compensate {
            return Err(StepError::new("undo rejected"));
        }
        match self.name {
            "reserve" => payload.reservation_id = None,
            "charge" => payload.payment_id = None,
            "ship" => payload.shipment_id = None,
            _ => {}
        }
        Ok(())
    }
}

fn payload() -> OrderPayload {
    OrderPayload {
        order_id: 1,
        amount: 100.0,
        ..Default::default()
    }
}

#[tokio::test]
async fn happy_path_runs_every_step_once_in_order() {
    let journal = journal();
    let definition = SagaDefinition::builder("order-fulfillment")
        .step(RecordingStep::new("reserve", 1, &journal))
        .step(RecordingStep::new("charge", 2, &journal))
        .step(RecordingStep::new("ship", 3, &journal))
        .build()
        .unwrap();

    let report = SagaOrchestrator::new()
        .execute(&definition, payload(), &CancellationToken::new())
        .await;

    assert_eq!(report.status, SagaStatus::Succeeded);
    assert!(report.is_success());
    assert_eq!(report.executed_steps, vec!["reserve", "charge", "ship"]);
    assert!(report.compensated_steps.is_empty());
    assert!(report.error.is_none());
    assert_eq!(entries(&journal), vec!["exec:reserve", "exec:charge", "exec:ship"]);

    let payload = report.into_result().unwrap();
    assert_eq!(payload.reservation_id.as_deref(), Some("res-1"));
    assert_eq!(payload.payment_id.as_deref(), Some("pay-1"));
    assert_eq!(payload.shipment_id.as_deref(), Some("shp-1"));
}

#[tokio::test]
async fn failure_at_second_step_compensates_only_the_first() {
    let journal = journal();
    let definition = SagaDefinition::builder("order-fulfillment")
        .step(RecordingStep::new("reserve", 1, &journal))
        .step(RecordingStep::new("charge", 2, &journal).failing(StepErrorKind::Compensatable))
        .step(RecordingStep::new("ship", 3, &journal))
        .build()
        .unwrap();

    let report = SagaOrchestrator::new()
        .execute(&definition, payload(), &CancellationToken::new())
        .await;

    assert_eq!(report.status, SagaStatus::Compensated);
    assert_eq!(report.executed_steps, vec!["reserve"]);
    assert_eq!(report.compensated_steps, vec!["reserve"]);
    assert_eq!(
        entries(&journal),
        vec!["exec:reserve", "exec:charge", "comp:reserve"]
    );

    // The original failure names the step and reason; ship never ran.
    let error = report.error.as_ref().unwrap();
    assert_eq!(error.to_string(), "step 'charge' failed: inv");
    assert!(matches!(error, SagaError::StepFailed { .. }));
}

#[tokio::test]
async fn failure_at_step_k_unwinds_predecessors_in_reverse() {
    let journal = journal();
    let definition = SagaDefinition::builder("four-steps")
        .step(RecordingStep::new("reserve", 1, &journal))
        .step(RecordingStep::new("charge", 2, &journal))
        .step(RecordingStep::new("ship", 3, &journal).failing(StepErrorKind::Compensatable))
        .step(RecordingStep::new("notify", 4, &journal))
        .build()
        .unwrap();

    let report = SagaOrchestrator::new()
        .execute(&definition, payload(), &CancellationToken::new())
        .await;

    assert_eq!(report.status, SagaStatus::Compensated);
    assert_eq!(report.compensated_steps, vec!["charge", "reserve"]);
    assert_eq!(
        entries(&journal),
        vec![
            "exec:reserve",
            "exec:charge",
            "exec:ship",
            "comp:charge",
            "comp:reserve"
        ]
    );

    // Side effects of compensated steps were undone.
    assert!(report.payload.reservation_id.is_none());
    assert!(report.payload.payment_id.is_none());
}

#[tokio::test]
async fn compensation_failure_does_not_stop_the_unwind() {
    let journal = journal();
    let definition = SagaDefinition::builder("order-fulfillment")
        .step(RecordingStep::new("reserve", 1, &journal))
        .step(RecordingStep::new("charge", 2, &journal).failing_compensation())
        .step(RecordingStep::new("ship", 3, &journal).failing(StepErrorKind::Compensatable))
        .build()
        .unwrap();

    let report = SagaOrchestrator::new()
        .execute(&definition, payload(), &CancellationToken::new())
        .await;

    assert_eq!(report.status, SagaStatus::CompensationFailed);
    assert_eq!(report.failed_compensations, vec!["charge"]);
    // reserve was still unwound after charge's compensation failed.
    assert_eq!(report.compensated_steps, vec!["reserve"]);
    assert_eq!(
        entries(&journal),
        vec![
            "exec:reserve",
            "exec:charge",
            "exec:ship",
            "comp:charge",
            "comp:reserve"
        ]
    );

    // The original step failure is still what the caller sees.
    assert_eq!(
        report.error.as_ref().unwrap().to_string(),
        "step 'ship' failed: inv"
    );
}

#[tokio::test]
async fn non_compensatable_failure_halts_compensation() {
    let journal = journal();
    let definition = SagaDefinition::builder("order-fulfillment")
        .step(RecordingStep::new("reserve", 1, &journal))
        .step(RecordingStep::new("charge", 2, &journal).failing(StepErrorKind::NonCompensatable))
        .build()
        .unwrap();

    let report = SagaOrchestrator::new()
        .execute(&definition, payload(), &CancellationToken::new())
        .await;

    assert_eq!(report.status, SagaStatus::CompensationFailed);
    assert!(report.compensated_steps.is_empty());
    assert_eq!(entries(&journal), vec!["exec:reserve", "exec:charge"]);
    assert_eq!(
        report.error.as_ref().unwrap().to_string(),
        "step 'charge' failed: charge settled"
    );
}

#[tokio::test]
async fn cancellation_mid_step_compensates_executed_steps() {
    let journal = journal();
    let definition = SagaDefinition::builder("order-fulfillment")
        .step(RecordingStep::new("reserve", 1, &journal))
        .step(RecordingStep::new("charge", 2, &journal).slow(Duration::from_secs(30)))
        .step(RecordingStep::new("ship", 3, &journal))
        .build()
        .unwrap();

    let ctx = CancellationToken::new();
    let canceller = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let started = std::time::Instant::now();
    let report = SagaOrchestrator::new()
        .execute(&definition, payload(), &ctx)
        .await;

    assert!(started.elapsed() < Duration::from_secs(5), "cancellation was prompt");
    assert_eq!(report.status, SagaStatus::Cancelled);
    assert!(matches!(report.error, Some(SagaError::Cancelled)));
    assert_eq!(report.executed_steps, vec!["reserve"]);
    // Compensation ran to completion despite the cancelled context.
    assert_eq!(report.compensated_steps, vec!["reserve"]);
    // charge started but never completed; ship never started.
    assert_eq!(
        entries(&journal),
        vec!["exec:reserve", "exec:charge", "comp:reserve"]
    );
}

#[tokio::test]
async fn cancellation_before_start_runs_nothing() {
    let journal = journal();
    let definition = SagaDefinition::builder("order-fulfillment")
        .step(RecordingStep::new("reserve", 1, &journal))
        .build()
        .unwrap();

    let ctx = CancellationToken::new();
    ctx.cancel();

    let report = SagaOrchestrator::new()
        .execute(&definition, payload(), &ctx)
        .await;

    assert_eq!(report.status, SagaStatus::Cancelled);
    assert!(report.executed_steps.is_empty());
    assert!(entries(&journal).is_empty());
}

#[tokio::test]
async fn empty_definition_succeeds_immediately() {
    let definition = SagaDefinition::<OrderPayload>::builder("noop").build().unwrap();
    let report = SagaOrchestrator::new()
        .execute(&definition, payload(), &CancellationToken::new())
        .await;
    assert_eq!(report.status, SagaStatus::Succeeded);
    assert!(report.executed_steps.is_empty());
}

#[tokio::test]
async fn parallel_sagas_do_not_interfere() {
    let orchestrator = SagaOrchestrator::new();
    let mut tasks = Vec::new();
    for order_id in 0..32u64 {
        let orchestrator = orchestrator.clone();
        tasks.push(tokio::spawn(async move {
            let journal = journal();
            let definition = SagaDefinition::builder("order-fulfillment")
                .step(RecordingStep::new("reserve", 1, &journal))
                .step(RecordingStep::new("charge", 2, &journal))
                .build()
                .unwrap();
            let report = orchestrator
                .execute(
                    &definition,
                    OrderPayload {
                        order_id,
                        amount: 1.0,
                        ..Default::default()
                    },
                    &CancellationToken::new(),
                )
                .await;
            assert!(report.is_success());
            assert_eq!(
                report.payload.reservation_id.as_deref(),
                Some(format!("res-{order_id}").as_str())
            );
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
}
