//! Retry policy with exponential backoff and additive jitter
//!
//! The first attempt runs immediately. A transient failure sleeps
//! `base_delay * multiplier^(n-1) + U(0, max_jitter)` and tries again, up to
//! `max_attempts` total attempts. Non-transient failures and cancellation
//! short-circuit with the original error.

use rand::Rng;
use sarea_observability::{Metrics, NoopMetrics};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{ResilienceError, ResilienceResult};

/// Configuration for the retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry
    #[serde(default = "default_base_delay")]
    pub base_delay: Duration,
    /// Grow the delay exponentially between attempts
    #[serde(default = "default_true")]
    pub use_exponential_backoff: bool,
    /// Multiplier applied per attempt when exponential
    #[serde(default = "default_multiplier")]
    pub backoff_multiplier: f64,
    /// Add uniform random jitter to each delay
    #[serde(default = "default_true")]
    pub use_jitter: bool,
    /// Upper bound of the additive jitter
    #[serde(default = "default_max_jitter")]
    pub max_jitter: Duration,
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_base_delay() -> Duration {
    Duration::from_secs(1)
}

const fn default_true() -> bool {
    true
}

const fn default_multiplier() -> f64 {
    2.0
}

const fn default_max_jitter() -> Duration {
    Duration::from_millis(100)
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            use_exponential_backoff: true,
            backoff_multiplier: default_multiplier(),
            use_jitter: true,
            max_jitter: default_max_jitter(),
        }
    }
}

impl RetryConfig {
    /// Sets the total number of attempts.
    #[inline]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Sets the base delay.
    #[inline]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[inline]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables exponential growth.
    #[inline]
    pub fn with_exponential_backoff(mut self, enabled: bool) -> Self {
        self.use_exponential_backoff = enabled;
        self
    }

    /// Sets the jitter bound; zero disables jitter.
    #[inline]
    pub fn with_max_jitter(mut self, jitter: Duration) -> Self {
        self.use_jitter = !jitter.is_zero();
        self.max_jitter = jitter;
        self
    }

    /// Deterministic part of the delay after a failed attempt `n` (1-based).
    pub fn base_delay_for_attempt(&self, attempt: u32) -> Duration {
        if !self.use_exponential_backoff || attempt <= 1 {
            return self.base_delay;
        }
        let scaled =
            self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32 - 1);
        Duration::from_secs_f64(scaled)
    }

    /// Full delay after a failed attempt `n`: base plus fresh uniform jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay_for_attempt(attempt);
        if !self.use_jitter || self.max_jitter.is_zero() {
            return base;
        }
        let jitter_ms = rand::thread_rng().gen_range(0.0..=self.max_jitter.as_secs_f64() * 1000.0);
        base + Duration::from_secs_f64(jitter_ms / 1000.0)
    }
}

/// Decides whether a failure is worth another attempt.
pub type RetryClassifier = Arc<dyn Fn(&ResilienceError) -> bool + Send + Sync>;

/// Retry policy over cancellation-aware async operations.
#[derive(Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    operation: String,
    metrics: Arc<dyn Metrics>,
    classifier: RetryClassifier,
}

impl RetryPolicy {
    /// Creates a policy with the default classifier and no metrics backend.
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            operation: "operation".to_string(),
            metrics: Arc::new(NoopMetrics),
            classifier: Arc::new(ResilienceError::is_transient),
        }
    }

    /// Names the operation for the `retry_attempts_total` samples.
    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation = name.into();
        self
    }

    /// Wires a metrics backend.
    pub fn with_metrics(mut self, metrics: Arc<dyn Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Replaces the transient-failure classifier.
    pub fn with_classifier(
        mut self,
        classifier: impl Fn(&ResilienceError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    /// Returns the configuration.
    #[inline]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Runs `op` until it succeeds, exhausts the attempt budget, fails
    /// non-transiently, or the context is cancelled.
    ///
    /// The operation receives a child token of `ctx` per attempt. Cancellation
    /// is terminal: it is never classified as retryable and interrupts the
    /// backoff sleep.
    pub async fn execute<T, F, Fut>(&self, ctx: &CancellationToken, mut op: F) -> ResilienceResult<T>
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = ResilienceResult<T>>,
    {
        let mut attempt = 1u32;
        loop {
            if ctx.is_cancelled() {
                return Err(ResilienceError::Cancelled);
            }

            match op(ctx.child_token()).await {
                Ok(value) => {
                    if attempt > 1 {
                        self.metrics.record_retry_attempt(&self.operation, attempt, true);
                    }
                    return Ok(value);
                }
                Err(err) => {
                    let retryable = !err.is_cancelled()
                        && (self.classifier)(&err)
                        && attempt < self.config.max_attempts;
                    if !retryable {
                        if attempt > 1 {
                            self.metrics.record_retry_attempt(&self.operation, attempt, false);
                        }
                        return Err(err);
                    }

                    let delay = self.config.delay_for_attempt(attempt);
                    self.metrics.record_retry_attempt(&self.operation, attempt, false);
                    warn!(
                        operation = %self.operation,
                        attempt,
                        max_attempts = self.config.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, scheduling retry"
                    );

                    tokio::select! {
                        _ = ctx.cancelled() => return Err(ResilienceError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }
}
