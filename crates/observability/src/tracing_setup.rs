//! Subscriber initialization for structured logging
//!
//! Sets up the `tracing-subscriber` fmt layer with an env-filter derived from
//! configuration and installs the W3C trace context propagator.

use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;

use crate::propagation::w3c_trace_context_propagator;

/// Configuration for tracing and log output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracingConfig {
    /// Service name attached to emitted telemetry
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Service version attached to emitted telemetry
    #[serde(default = "default_service_version")]
    pub service_version: String,
    /// Deployment environment (development, staging, production)
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Sampling ratio in [0.0, 1.0]
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
    /// Log filter directive (EnvFilter syntax)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_service_name() -> String {
    "sarea".to_string()
}

fn default_service_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

const fn default_sampling_ratio() -> f64 {
    1.0
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            service_version: default_service_version(),
            environment: default_environment(),
            sampling_ratio: default_sampling_ratio(),
            log_level: default_log_level(),
        }
    }
}

impl TracingConfig {
    /// Returns the sampling ratio clamped into [0.0, 1.0].
    #[inline]
    pub fn effective_sampling_ratio(&self) -> f64 {
        self.sampling_ratio.clamp(0.0, 1.0)
    }
}

/// Initializes the global subscriber and the W3C propagator.
///
/// Returns false when a subscriber was already installed (tests install their
/// own); the propagator is set either way.
pub fn init_tracing(config: &TracingConfig) -> bool {
    let env_filter = EnvFilter::new(&config.log_level);

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_filter(env_filter);

    let subscriber = tracing_subscriber::Registry::default().with(fmt_layer);
    let installed = tracing::subscriber::set_global_default(subscriber).is_ok();

    opentelemetry::global::set_text_map_propagator(w3c_trace_context_propagator());

    if installed {
        info!(
            service = %config.service_name,
            version = %config.service_version,
            environment = %config.environment,
            sampling_ratio = config.effective_sampling_ratio(),
            "tracing initialized"
        );
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = TracingConfig::default();
        assert_eq!(config.service_name, "sarea");
        assert_eq!(config.environment, "development");
        assert_eq!(config.sampling_ratio, 1.0);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_sampling_ratio_is_clamped() {
        let config = TracingConfig {
            sampling_ratio: 3.5,
            ..Default::default()
        };
        assert_eq!(config.effective_sampling_ratio(), 1.0);

        let config = TracingConfig {
            sampling_ratio: -0.1,
            ..Default::default()
        };
        assert_eq!(config.effective_sampling_ratio(), 0.0);
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: TracingConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.service_name, "sarea");

        let config: TracingConfig =
            serde_json::from_str(r#"{"service_name":"orders","sampling_ratio":0.25}"#).unwrap();
        assert_eq!(config.service_name, "orders");
        assert_eq!(config.sampling_ratio, 0.25);
    }
}
