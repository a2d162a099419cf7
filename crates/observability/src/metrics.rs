//! Metrics capability - counters, histograms and gauges
//!
//! The [`Metrics`] trait exposes three raw recording operations plus typed
//! convenience operations for the boundaries the engines instrument. Metric
//! and tag names are fixed: existing dashboards key on them.

use prometheus::{Encoder, HistogramVec, IntCounterVec, IntGauge, Registry, TextEncoder};
use std::time::Duration;
use thiserror::Error;

/// Metric names exposed by the stack. Renaming any of these breaks dashboards.
pub mod names {
    pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
    pub const HTTP_REQUEST_DURATION_MS: &str = "http_request_duration_ms";
    pub const CIRCUIT_BREAKER_STATE_CHANGES_TOTAL: &str = "circuit_breaker_state_changes_total";
    pub const RETRY_ATTEMPTS_TOTAL: &str = "retry_attempts_total";
    pub const SAGA_EXECUTIONS_TOTAL: &str = "saga_executions_total";
    pub const SAGA_EXECUTION_DURATION_MS: &str = "saga_execution_duration_ms";
    pub const SAGA_STEP_EXECUTION_DURATION_MS: &str = "saga_step_execution_duration_ms";
    pub const MESSAGE_OPERATIONS_TOTAL: &str = "message_operations_total";
    pub const MESSAGE_OPERATION_DURATION_MS: &str = "message_operation_duration_ms";
    pub const HEALTH_CHECK_DURATION_MS: &str = "health_check_duration_ms";
    pub const MEMORY_USAGE_BYTES: &str = "memory_usage_bytes";
    pub const ACTIVE_CONNECTIONS: &str = "active_connections";
}

/// Standard tag names shared across metrics.
pub mod tags {
    pub const METHOD: &str = "method";
    pub const ENDPOINT: &str = "endpoint";
    pub const STATUS_CODE: &str = "status_code";
    pub const CIRCUIT_BREAKER_NAME: &str = "circuit_breaker_name";
    pub const FROM_STATE: &str = "from_state";
    pub const TO_STATE: &str = "to_state";
    pub const OPERATION: &str = "operation";
    pub const ATTEMPT_NUMBER: &str = "attempt_number";
    pub const IS_SUCCESSFUL: &str = "is_successful";
    pub const SAGA_NAME: &str = "saga_name";
    pub const RESULT: &str = "result";
    pub const STEP_COUNT: &str = "step_count";
    pub const MESSAGE_TYPE: &str = "message_type";
    pub const STATUS: &str = "status";
}

/// Errors from metrics backend construction.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to register metric: {0}")]
    Registration(#[from] prometheus::Error),
}

/// Metrics sink injected into the engines.
///
/// The three raw operations are the backend surface; the typed operations are
/// provided methods that encode the fixed metric/tag vocabulary, so a backend
/// only implements the raw trio.
pub trait Metrics: Send + Sync {
    /// Increments a counter by one
    fn increment_counter(&self, name: &str, tag_values: &[(&str, &str)]);

    /// Records one histogram observation (durations are in milliseconds)
    fn record_histogram(&self, name: &str, value: f64, tag_values: &[(&str, &str)]);

    /// Sets a gauge to an absolute value
    fn set_gauge(&self, name: &str, value: i64, tag_values: &[(&str, &str)]);

    /// Records an HTTP round-trip through the resilient client
    fn record_http_request(&self, method: &str, endpoint: &str, status_code: u16, duration: Duration) {
        let status = status_code.to_string();
        self.increment_counter(
            names::HTTP_REQUESTS_TOTAL,
            &[
                (tags::METHOD, method),
                (tags::ENDPOINT, endpoint),
                (tags::STATUS_CODE, &status),
            ],
        );
        self.record_histogram(
            names::HTTP_REQUEST_DURATION_MS,
            duration.as_secs_f64() * 1000.0,
            &[(tags::METHOD, method), (tags::ENDPOINT, endpoint)],
        );
    }

    /// Records a circuit breaker state transition
    fn record_circuit_breaker_state_change(&self, breaker: &str, from: &str, to: &str) {
        self.increment_counter(
            names::CIRCUIT_BREAKER_STATE_CHANGES_TOTAL,
            &[
                (tags::CIRCUIT_BREAKER_NAME, breaker),
                (tags::FROM_STATE, from),
                (tags::TO_STATE, to),
            ],
        );
    }

    /// Records one retry attempt with its outcome
    fn record_retry_attempt(&self, operation: &str, attempt: u32, successful: bool) {
        let attempt = attempt.to_string();
        let successful = successful.to_string();
        self.increment_counter(
            names::RETRY_ATTEMPTS_TOTAL,
            &[
                (tags::OPERATION, operation),
                (tags::ATTEMPT_NUMBER, &attempt),
                (tags::IS_SUCCESSFUL, &successful),
            ],
        );
    }

    /// Records a completed saga execution
    fn record_saga_execution(&self, saga_name: &str, result: &str, step_count: usize, duration: Duration) {
        let step_count = step_count.to_string();
        self.increment_counter(
            names::SAGA_EXECUTIONS_TOTAL,
            &[
                (tags::SAGA_NAME, saga_name),
                (tags::RESULT, result),
                (tags::STEP_COUNT, &step_count),
            ],
        );
        self.record_histogram(
            names::SAGA_EXECUTION_DURATION_MS,
            duration.as_secs_f64() * 1000.0,
            &[(tags::SAGA_NAME, saga_name), (tags::RESULT, result)],
        );
    }

    /// Records one saga step execution or compensation
    fn record_saga_step(&self, saga_name: &str, step: &str, result: &str, duration: Duration) {
        self.record_histogram(
            names::SAGA_STEP_EXECUTION_DURATION_MS,
            duration.as_secs_f64() * 1000.0,
            &[
                (tags::SAGA_NAME, saga_name),
                (tags::OPERATION, step),
                (tags::RESULT, result),
            ],
        );
    }

    /// Records a bus operation (publish, consume, request)
    fn record_message_operation(&self, operation: &str, message_type: &str, status: &str, duration: Duration) {
        self.increment_counter(
            names::MESSAGE_OPERATIONS_TOTAL,
            &[
                (tags::OPERATION, operation),
                (tags::MESSAGE_TYPE, message_type),
                (tags::STATUS, status),
            ],
        );
        self.record_histogram(
            names::MESSAGE_OPERATION_DURATION_MS,
            duration.as_secs_f64() * 1000.0,
            &[(tags::OPERATION, operation), (tags::MESSAGE_TYPE, message_type)],
        );
    }

    /// Records a health probe of a named dependency
    fn record_health_check(&self, check: &str, healthy: bool, duration: Duration) {
        let status = if healthy { "healthy" } else { "unhealthy" };
        self.record_histogram(
            names::HEALTH_CHECK_DURATION_MS,
            duration.as_secs_f64() * 1000.0,
            &[(tags::OPERATION, check), (tags::STATUS, status)],
        );
    }

    /// Sets the process memory usage gauge
    fn set_memory_usage(&self, bytes: i64) {
        self.set_gauge(names::MEMORY_USAGE_BYTES, bytes, &[]);
    }

    /// Sets the active connection count gauge
    fn set_active_connections(&self, count: i64) {
        self.set_gauge(names::ACTIVE_CONNECTIONS, count, &[]);
    }
}

// ============================================================================
// No-op implementation
// ============================================================================

/// Metrics sink that discards everything. Default wiring.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn increment_counter(&self, _name: &str, _tag_values: &[(&str, &str)]) {}
    fn record_histogram(&self, _name: &str, _value: f64, _tag_values: &[(&str, &str)]) {}
    fn set_gauge(&self, _name: &str, _value: i64, _tag_values: &[(&str, &str)]) {}
}

// ============================================================================
// Prometheus implementation
// ============================================================================

/// Histogram buckets for millisecond durations
const DURATION_MS_BUCKETS: &[f64] = &[
    1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0,
];

/// Metrics backed by a `prometheus` registry.
#[derive(Debug)]
pub struct PrometheusMetrics {
    http_requests_total: IntCounterVec,
    http_request_duration_ms: HistogramVec,
    circuit_breaker_state_changes_total: IntCounterVec,
    retry_attempts_total: IntCounterVec,
    saga_executions_total: IntCounterVec,
    saga_execution_duration_ms: HistogramVec,
    saga_step_execution_duration_ms: HistogramVec,
    message_operations_total: IntCounterVec,
    message_operation_duration_ms: HistogramVec,
    health_check_duration_ms: HistogramVec,
    memory_usage_bytes: IntGauge,
    active_connections: IntGauge,
    registry: Registry,
}

impl PrometheusMetrics {
    /// Creates the full metric set and registers it in a fresh registry.
    pub fn new() -> Result<Self, MetricsError> {
        fn counter(name: &str, help: &str, labels: &[&str]) -> Result<IntCounterVec, prometheus::Error> {
            IntCounterVec::new(prometheus::Opts::new(name, help), labels)
        }
        fn histogram(name: &str, help: &str, labels: &[&str]) -> Result<HistogramVec, prometheus::Error> {
            HistogramVec::new(
                prometheus::HistogramOpts::new(name, help).buckets(DURATION_MS_BUCKETS.to_vec()),
                labels,
            )
        }

        let http_requests_total = counter(
            names::HTTP_REQUESTS_TOTAL,
            "Total HTTP requests through the resilient client",
            &[tags::METHOD, tags::ENDPOINT, tags::STATUS_CODE],
        )?;
        let http_request_duration_ms = histogram(
            names::HTTP_REQUEST_DURATION_MS,
            "HTTP request duration in milliseconds",
            &[tags::METHOD, tags::ENDPOINT],
        )?;
        let circuit_breaker_state_changes_total = counter(
            names::CIRCUIT_BREAKER_STATE_CHANGES_TOTAL,
            "Circuit breaker state transitions",
            &[tags::CIRCUIT_BREAKER_NAME, tags::FROM_STATE, tags::TO_STATE],
        )?;
        let retry_attempts_total = counter(
            names::RETRY_ATTEMPTS_TOTAL,
            "Retry attempts by operation and outcome",
            &[tags::OPERATION, tags::ATTEMPT_NUMBER, tags::IS_SUCCESSFUL],
        )?;
        let saga_executions_total = counter(
            names::SAGA_EXECUTIONS_TOTAL,
            "Completed saga executions",
            &[tags::SAGA_NAME, tags::RESULT, tags::STEP_COUNT],
        )?;
        let saga_execution_duration_ms = histogram(
            names::SAGA_EXECUTION_DURATION_MS,
            "Saga execution duration in milliseconds",
            &[tags::SAGA_NAME, tags::RESULT],
        )?;
        let saga_step_execution_duration_ms = histogram(
            names::SAGA_STEP_EXECUTION_DURATION_MS,
            "Saga step duration in milliseconds",
            &[tags::SAGA_NAME, tags::OPERATION, tags::RESULT],
        )?;
        let message_operations_total = counter(
            names::MESSAGE_OPERATIONS_TOTAL,
            "Message bus operations",
            &[tags::OPERATION, tags::MESSAGE_TYPE, tags::STATUS],
        )?;
        let message_operation_duration_ms = histogram(
            names::MESSAGE_OPERATION_DURATION_MS,
            "Message bus operation duration in milliseconds",
            &[tags::OPERATION, tags::MESSAGE_TYPE],
        )?;
        let health_check_duration_ms = histogram(
            names::HEALTH_CHECK_DURATION_MS,
            "Health check duration in milliseconds",
            &[tags::OPERATION, tags::STATUS],
        )?;
        let memory_usage_bytes =
            IntGauge::new(names::MEMORY_USAGE_BYTES, "Resident memory in bytes")?;
        let active_connections =
            IntGauge::new(names::ACTIVE_CONNECTIONS, "Open transport connections")?;

        let registry = Registry::new();
        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration_ms.clone()))?;
        registry.register(Box::new(circuit_breaker_state_changes_total.clone()))?;
        registry.register(Box::new(retry_attempts_total.clone()))?;
        registry.register(Box::new(saga_executions_total.clone()))?;
        registry.register(Box::new(saga_execution_duration_ms.clone()))?;
        registry.register(Box::new(saga_step_execution_duration_ms.clone()))?;
        registry.register(Box::new(message_operations_total.clone()))?;
        registry.register(Box::new(message_operation_duration_ms.clone()))?;
        registry.register(Box::new(health_check_duration_ms.clone()))?;
        registry.register(Box::new(memory_usage_bytes.clone()))?;
        registry.register(Box::new(active_connections.clone()))?;

        Ok(Self {
            http_requests_total,
            http_request_duration_ms,
            circuit_breaker_state_changes_total,
            retry_attempts_total,
            saga_executions_total,
            saga_execution_duration_ms,
            saga_step_execution_duration_ms,
            message_operations_total,
            message_operation_duration_ms,
            health_check_duration_ms,
            memory_usage_bytes,
            active_connections,
            registry,
        })
    }

    /// Returns the backing registry for exposition wiring.
    #[inline]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Renders the registry in the Prometheus text exposition format.
    pub fn gather(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    /// Resolves label values from a tag slice in the declared label order.
    fn label_values<'a>(tag_values: &'a [(&'a str, &'a str)], labels: &[&str]) -> Vec<&'a str> {
        labels
            .iter()
            .map(|label| {
                tag_values
                    .iter()
                    .find(|(k, _)| k == label)
                    .map(|(_, v)| *v)
                    .unwrap_or("")
            })
            .collect()
    }
}

impl Metrics for PrometheusMetrics {
    fn increment_counter(&self, name: &str, tag_values: &[(&str, &str)]) {
        let (vec, labels): (&IntCounterVec, &[&str]) = match name {
            names::HTTP_REQUESTS_TOTAL => (
                &self.http_requests_total,
                &[tags::METHOD, tags::ENDPOINT, tags::STATUS_CODE],
            ),
            names::CIRCUIT_BREAKER_STATE_CHANGES_TOTAL => (
                &self.circuit_breaker_state_changes_total,
                &[tags::CIRCUIT_BREAKER_NAME, tags::FROM_STATE, tags::TO_STATE],
            ),
            names::RETRY_ATTEMPTS_TOTAL => (
                &self.retry_attempts_total,
                &[tags::OPERATION, tags::ATTEMPT_NUMBER, tags::IS_SUCCESSFUL],
            ),
            names::SAGA_EXECUTIONS_TOTAL => (
                &self.saga_executions_total,
                &[tags::SAGA_NAME, tags::RESULT, tags::STEP_COUNT],
            ),
            names::MESSAGE_OPERATIONS_TOTAL => (
                &self.message_operations_total,
                &[tags::OPERATION, tags::MESSAGE_TYPE, tags::STATUS],
            ),
            other => {
                tracing::debug!(metric = other, "unknown counter, sample dropped");
                return;
            }
        };
        vec.with_label_values(&Self::label_values(tag_values, labels)).inc();
    }

    fn record_histogram(&self, name: &str, value: f64, tag_values: &[(&str, &str)]) {
        let (vec, labels): (&HistogramVec, &[&str]) = match name {
            names::HTTP_REQUEST_DURATION_MS => (
                &self.http_request_duration_ms,
                &[tags::METHOD, tags::ENDPOINT],
            ),
            names::SAGA_EXECUTION_DURATION_MS => (
                &self.saga_execution_duration_ms,
                &[tags::SAGA_NAME, tags::RESULT],
            ),
            names::SAGA_STEP_EXECUTION_DURATION_MS => (
                &self.saga_step_execution_duration_ms,
                &[tags::SAGA_NAME, tags::OPERATION, tags::RESULT],
            ),
            names::MESSAGE_OPERATION_DURATION_MS => (
                &self.message_operation_duration_ms,
                &[tags::OPERATION, tags::MESSAGE_TYPE],
            ),
            names::HEALTH_CHECK_DURATION_MS => (
                &self.health_check_duration_ms,
                &[tags::OPERATION, tags::STATUS],
            ),
            other => {
                tracing::debug!(metric = other, "unknown histogram, sample dropped");
                return;
            }
        };
        vec.with_label_values(&Self::label_values(tag_values, labels))
            .observe(value);
    }

    fn set_gauge(&self, name: &str, value: i64, _tag_values: &[(&str, &str)]) {
        match name {
            names::MEMORY_USAGE_BYTES => self.memory_usage_bytes.set(value),
            names::ACTIVE_CONNECTIONS => self.active_connections.set(value),
            other => tracing::debug!(metric = other, "unknown gauge, sample dropped"),
        }
    }
}
