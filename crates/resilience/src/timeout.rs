//! Timeout policy
//!
//! Bounds an operation with a deadline derived from the caller's context: the
//! wrapped operation is cancelled at `now + timeout` or when the outer context
//! is cancelled, whichever comes first. There is no suspension outside the
//! wrapped operation, so stacked timeouts compose: the shorter remaining
//! budget wins.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::{ResilienceError, ResilienceResult};

/// Configuration for the timeout policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Budget applied when a call does not specify one
    #[serde(default = "default_timeout")]
    pub default_timeout: Duration,
}

const fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default_timeout: default_timeout(),
        }
    }
}

impl TimeoutConfig {
    /// Creates a configuration with the given default budget.
    #[inline]
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }
}

/// Timeout policy over cancellation-aware async operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeoutPolicy {
    config: TimeoutConfig,
}

impl TimeoutPolicy {
    /// Creates a policy from configuration.
    #[inline]
    pub fn new(config: TimeoutConfig) -> Self {
        Self { config }
    }

    /// Returns the configured default budget.
    #[inline]
    pub fn default_timeout(&self) -> Duration {
        self.config.default_timeout
    }

    /// Runs `op` under `timeout` (or the configured default).
    ///
    /// The operation receives a child token that fires on timeout; the
    /// operation's future is dropped on both timeout and outer cancellation,
    /// releasing its resources on every exit path.
    pub async fn execute<T, F, Fut>(
        &self,
        timeout: Option<Duration>,
        ctx: &CancellationToken,
        op: F,
    ) -> ResilienceResult<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ResilienceResult<T>>,
    {
        let budget = timeout.unwrap_or(self.config.default_timeout);
        let child = ctx.child_token();
        let started = Instant::now();

        tokio::select! {
            _ = ctx.cancelled() => {
                child.cancel();
                Err(ResilienceError::Cancelled)
            }
            outcome = tokio::time::timeout(budget, op(child.clone())) => match outcome {
                Ok(result) => result,
                Err(_) => {
                    child.cancel();
                    Err(ResilienceError::Timeout {
                        elapsed: started.elapsed(),
                    })
                }
            }
        }
    }
}
