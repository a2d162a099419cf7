//! Composed resilience pipeline
//!
//! Ordering from outside in is Retry → CircuitBreaker → Timeout: retries
//! never bypass an open breaker, and the timeout bounds each individual
//! attempt. Every inner attempt is a distinct breaker sample, so a retried
//! logical call cannot masquerade as a single outcome.

use sarea_observability::Metrics;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::error::ResilienceResult;
use crate::retry::{RetryConfig, RetryPolicy};
use crate::timeout::{TimeoutConfig, TimeoutPolicy};

/// Retry, circuit breaker and timeout composed in the canonical order.
#[derive(Clone)]
pub struct ResiliencePipeline {
    retry: RetryPolicy,
    breaker: CircuitBreaker,
    timeout: TimeoutPolicy,
}

impl ResiliencePipeline {
    /// Composes three pre-built policies.
    pub fn new(retry: RetryPolicy, breaker: CircuitBreaker, timeout: TimeoutPolicy) -> Self {
        Self {
            retry,
            breaker,
            timeout,
        }
    }

    /// Builds the pipeline from raw configuration, sharing one metrics sink.
    pub fn from_configs(
        name: impl Into<String>,
        retry: RetryConfig,
        breaker: CircuitBreakerConfig,
        timeout: TimeoutConfig,
        metrics: Arc<dyn Metrics>,
    ) -> Self {
        let name = name.into();
        Self {
            retry: RetryPolicy::new(retry)
                .with_operation_name(name.clone())
                .with_metrics(metrics.clone()),
            breaker: CircuitBreaker::new(name, breaker).with_metrics(metrics),
            timeout: TimeoutPolicy::new(timeout),
        }
    }

    /// Returns the circuit breaker for state inspection.
    #[inline]
    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Runs `op` through the full pipeline with the default timeout.
    pub async fn execute<T, F, Fut>(&self, ctx: &CancellationToken, op: F) -> ResilienceResult<T>
    where
        F: Fn(CancellationToken) -> Fut,
        Fut: Future<Output = ResilienceResult<T>>,
    {
        self.execute_with_timeout(ctx, None, op).await
    }

    /// Runs `op` through the full pipeline bounding each attempt by `timeout`.
    pub async fn execute_with_timeout<T, F, Fut>(
        &self,
        ctx: &CancellationToken,
        timeout: Option<Duration>,
        op: F,
    ) -> ResilienceResult<T>
    where
        F: Fn(CancellationToken) -> Fut,
        Fut: Future<Output = ResilienceResult<T>>,
    {
        let op = &op;
        self.retry
            .execute(ctx, |attempt_ctx| async move {
                self.breaker
                    .execute(|| {
                        self.timeout
                            .execute(timeout, &attempt_ctx, |inner_ctx| op(inner_ctx))
                    })
                    .await
            })
            .await
    }
}
