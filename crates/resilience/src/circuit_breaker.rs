//! Circuit breaker
//!
//! A state machine that short-circuits calls to a failing dependency.
//!
//! # States
//!
//! - **Closed**: calls pass through; outcomes feed a sliding time window.
//! - **Open**: every call fails immediately with `CircuitOpen` without
//!   invoking the wrapped operation.
//! - **HalfOpen**: after the break duration one probe call is admitted;
//!   success closes the circuit, failure re-opens it and resets the timer.
//!
//! The breaker decides admission synchronously; it never schedules anything.

use sarea_observability::{Metrics, NoopMetrics};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::error::{ResilienceError, ResilienceResult};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation
    Closed,
    /// Calls are rejected without invoking the operation
    Open,
    /// One probe call is admitted to test recovery
    HalfOpen,
}

impl CircuitState {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Failure ratio in (0, 1] that opens the circuit
    #[serde(default = "default_failure_ratio")]
    pub failure_ratio: f64,
    /// Duration of the sliding outcome window
    #[serde(default = "default_sampling_window")]
    pub sampling_window: Duration,
    /// Minimum calls in the window before the ratio is evaluated
    #[serde(default = "default_minimum_throughput")]
    pub minimum_throughput: usize,
    /// Time the circuit stays open before admitting a probe
    #[serde(default = "default_break_duration")]
    pub break_duration: Duration,
}

const fn default_failure_ratio() -> f64 {
    0.5
}

const fn default_sampling_window() -> Duration {
    Duration::from_secs(10)
}

const fn default_minimum_throughput() -> usize {
    3
}

const fn default_break_duration() -> Duration {
    Duration::from_secs(60)
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_ratio: default_failure_ratio(),
            sampling_window: default_sampling_window(),
            minimum_throughput: default_minimum_throughput(),
            break_duration: default_break_duration(),
        }
    }
}

impl CircuitBreakerConfig {
    /// Sets the failure ratio, clamped into (0, 1].
    #[inline]
    pub fn with_failure_ratio(mut self, ratio: f64) -> Self {
        self.failure_ratio = ratio.clamp(f64::EPSILON, 1.0);
        self
    }

    /// Sets the sampling window duration.
    #[inline]
    pub fn with_sampling_window(mut self, window: Duration) -> Self {
        self.sampling_window = window;
        self
    }

    /// Sets the minimum throughput before evaluation.
    #[inline]
    pub fn with_minimum_throughput(mut self, throughput: usize) -> Self {
        self.minimum_throughput = throughput;
        self
    }

    /// Sets the open-state recovery delay.
    #[inline]
    pub fn with_break_duration(mut self, duration: Duration) -> Self {
        self.break_duration = duration;
        self
    }
}

/// Snapshot of breaker internals for diagnostics.
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub window_calls: usize,
    pub window_failures: usize,
    pub failure_ratio: f64,
}

struct BreakerInner {
    state: CircuitState,
    /// Recent call outcomes: (completion instant, success flag)
    window: VecDeque<(Instant, bool)>,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Circuit breaker guarding one named dependency.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<BreakerInner>>,
    metrics: Arc<dyn Metrics>,
}

impl CircuitBreaker {
    /// Creates a breaker with the given name and configuration.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Arc::new(Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                window: VecDeque::new(),
                opened_at: None,
                probe_in_flight: false,
            })),
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Wires a metrics backend for state-change events.
    pub fn with_metrics(mut self, metrics: Arc<dyn Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Returns the breaker name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reports the current state.
    ///
    /// An open circuit whose break duration has elapsed reports `HalfOpen`:
    /// the next call will be admitted as the probe.
    pub fn state(&self) -> CircuitState {
        let inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            CircuitState::Open if self.break_elapsed(&inner) => CircuitState::HalfOpen,
            state => state,
        }
    }

    /// Takes a diagnostic snapshot.
    pub fn stats(&self) -> CircuitBreakerStats {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        Self::prune(&mut inner.window, self.config.sampling_window);
        let window_calls = inner.window.len();
        let window_failures = inner.window.iter().filter(|(_, ok)| !ok).count();
        let failure_ratio = if window_calls == 0 {
            0.0
        } else {
            window_failures as f64 / window_calls as f64
        };
        let state = match inner.state {
            CircuitState::Open if self.break_elapsed(&inner) => CircuitState::HalfOpen,
            state => state,
        };
        CircuitBreakerStats {
            name: self.name.clone(),
            state,
            window_calls,
            window_failures,
            failure_ratio,
        }
    }

    /// Runs `op` under the breaker.
    ///
    /// While the circuit is open the operation is not invoked and the call
    /// fails with [`ResilienceError::CircuitOpen`]. Cancellation of the
    /// operation is not counted as a dependency outcome.
    pub async fn execute<T, F, Fut>(&self, op: F) -> ResilienceResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ResilienceResult<T>>,
    {
        self.try_acquire()?;
        let result = op().await;
        match &result {
            Ok(_) => self.record_outcome(true),
            Err(err) if err.is_cancelled() => self.abandon_probe(),
            Err(_) => self.record_outcome(false),
        }
        result
    }

    /// Admission decision. Claims the probe slot when transitioning to
    /// half-open, so exactly one probe runs per recovery cycle.
    fn try_acquire(&self) -> ResilienceResult<()> {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                if self.break_elapsed(&inner) {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.probe_in_flight = true;
                    Ok(())
                } else {
                    Err(ResilienceError::CircuitOpen {
                        breaker: self.name.clone(),
                    })
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(ResilienceError::CircuitOpen {
                        breaker: self.name.clone(),
                    })
                } else {
                    inner.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    /// Feeds one completed call into the window and applies transitions.
    fn record_outcome(&self, success: bool) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        let now = Instant::now();
        inner.window.push_back((now, success));
        Self::prune(&mut inner.window, self.config.sampling_window);

        match inner.state {
            CircuitState::Closed => {
                if !success && self.should_open(&inner.window) {
                    self.transition(&mut inner, CircuitState::Open);
                    inner.opened_at = Some(now);
                }
            }
            CircuitState::HalfOpen => {
                inner.probe_in_flight = false;
                if success {
                    self.transition(&mut inner, CircuitState::Closed);
                    inner.opened_at = None;
                    inner.window.clear();
                } else {
                    self.transition(&mut inner, CircuitState::Open);
                    inner.opened_at = Some(now);
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Releases the probe slot when the probe was cancelled, not failed.
    fn abandon_probe(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        if inner.state == CircuitState::HalfOpen {
            inner.probe_in_flight = false;
        }
    }

    fn should_open(&self, window: &VecDeque<(Instant, bool)>) -> bool {
        if window.len() < self.config.minimum_throughput {
            return false;
        }
        let failures = window.iter().filter(|(_, ok)| !ok).count();
        failures as f64 / window.len() as f64 >= self.config.failure_ratio
    }

    fn break_elapsed(&self, inner: &BreakerInner) -> bool {
        inner
            .opened_at
            .map(|at| at.elapsed() >= self.config.break_duration)
            .unwrap_or(false)
    }

    fn prune(window: &mut VecDeque<(Instant, bool)>, sampling_window: Duration) {
        let now = Instant::now();
        while let Some((at, _)) = window.front() {
            if now.duration_since(*at) > sampling_window {
                window.pop_front();
            } else {
                break;
            }
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        self.metrics
            .record_circuit_breaker_state_change(&self.name, from.as_str(), to.as_str());
        match to {
            CircuitState::Open => warn!(breaker = %self.name, from = %from, "circuit opened"),
            _ => info!(breaker = %self.name, from = %from, to = %to, "circuit state changed"),
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn snappy_breaker() -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig::default()
                .with_failure_ratio(0.5)
                .with_minimum_throughput(3)
                .with_sampling_window(Duration::from_secs(10))
                .with_break_duration(Duration::from_millis(100)),
        )
    }

    async fn fail(breaker: &CircuitBreaker) -> ResilienceResult<()> {
        breaker
            .execute(|| async { Err(ResilienceError::transient("down")) })
            .await
    }

    async fn succeed(breaker: &CircuitBreaker) -> ResilienceResult<()> {
        breaker.execute(|| async { Ok(()) }).await
    }

    #[test]
    fn test_config_defaults() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_ratio, 0.5);
        assert_eq!(config.sampling_window, Duration::from_secs(10));
        assert_eq!(config.minimum_throughput, 3);
        assert_eq!(config.break_duration, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_starts_closed() {
        let breaker = snappy_breaker();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(succeed(&breaker).await.is_ok());
    }

    #[tokio::test]
    async fn test_opens_after_failure_ratio_reached() {
        let breaker = snappy_breaker();
        for _ in 0..5 {
            let _ = fail(&breaker).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        // The operation must not run while open.
        let calls = AtomicU32::new(0);
        let result = breaker
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, ResilienceError>(()) }
            })
            .await;
        assert!(matches!(result, Err(ResilienceError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_below_minimum_throughput_stays_closed() {
        let breaker = snappy_breaker();
        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_single_probe_after_break_duration() {
        let breaker = snappy_breaker();
        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        // Admit one slow probe, then reject a concurrent second call.
        let probe_breaker = breaker.clone();
        let probe = tokio::spawn(async move {
            probe_breaker
                .execute(|| async {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok::<_, ResilienceError>(())
                })
                .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = succeed(&breaker).await;
        assert!(matches!(second, Err(ResilienceError::CircuitOpen { .. })));

        probe.await.unwrap().unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_probe_failure_reopens() {
        let breaker = snappy_breaker();
        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }
        tokio::time::sleep(Duration::from_millis(120)).await;

        let _ = fail(&breaker).await; // probe fails
        assert_eq!(breaker.state(), CircuitState::Open);

        // Recovery timer restarted: still open right away.
        let result = succeed(&breaker).await;
        assert!(matches!(result, Err(ResilienceError::CircuitOpen { .. })));

        // After another break duration the next probe may close it.
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(succeed(&breaker).await.is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_cancelled_probe_releases_the_slot() {
        let breaker = snappy_breaker();
        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }
        tokio::time::sleep(Duration::from_millis(120)).await;

        let result: ResilienceResult<()> = breaker
            .execute(|| async { Err(ResilienceError::Cancelled) })
            .await;
        assert!(matches!(result, Err(ResilienceError::Cancelled)));

        // Cancellation is not a dependency verdict; the next probe runs.
        assert!(succeed(&breaker).await.is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_stats_snapshot() {
        let breaker = snappy_breaker();
        let _ = succeed(&breaker).await;
        let _ = fail(&breaker).await;
        let stats = breaker.stats();
        assert_eq!(stats.window_calls, 2);
        assert_eq!(stats.window_failures, 1);
        assert!((stats.failure_ratio - 0.5).abs() < f64::EPSILON);
        assert_eq!(stats.state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_successes_keep_ratio_below_threshold() {
        let breaker = snappy_breaker();
        for _ in 0..6 {
            let _ = succeed(&breaker).await;
        }
        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        // 2 failures out of 8 calls: 0.25 < 0.5
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
