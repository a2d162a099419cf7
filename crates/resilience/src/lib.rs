//! Composable resilience policies for remote calls.
//!
//! Three policies — [`RetryPolicy`], [`CircuitBreaker`] and [`TimeoutPolicy`]
//! — share one failure taxonomy ([`ResilienceError`]) and compose through
//! [`ResiliencePipeline`] in the canonical Retry → CircuitBreaker → Timeout
//! order. [`ResilientHttpClient`] applies the pipeline to HTTP exchanges.
//!
//! All policies are cancellation-aware: a [`CancellationToken`] propagates
//! through every suspension point, and cancellation is always terminal.
//!
//! [`CancellationToken`]: tokio_util::sync::CancellationToken

pub mod circuit_breaker;
pub mod error;
pub mod http;
pub mod pipeline;
pub mod retry;
pub mod timeout;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState,
};
pub use error::{ResilienceError, ResilienceResult};
pub use http::ResilientHttpClient;
pub use pipeline::ResiliencePipeline;
pub use retry::{RetryConfig, RetryPolicy};
pub use timeout::{TimeoutConfig, TimeoutPolicy};
