//! Bus configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the message bus connection and topology.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Broker host
    #[serde(default = "default_host")]
    pub host: String,
    /// Broker port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Optional user for authentication
    #[serde(default)]
    pub user: Option<String>,
    /// Optional password for authentication
    #[serde(default)]
    pub password: Option<String>,
    /// Logical exchange: the subject prefix all messages are routed under
    #[serde(default = "default_exchange")]
    pub exchange: String,
    /// Name of this service; prefixes durable consumer names
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Connection name reported to the broker
    #[serde(default)]
    pub connection_name: Option<String>,
    /// Default budget for request/reply calls
    #[serde(default = "default_request_timeout")]
    pub request_timeout: Duration,
}

fn default_host() -> String {
    "localhost".to_string()
}

const fn default_port() -> u16 {
    4222
}

fn default_exchange() -> String {
    "microservices.events".to_string()
}

fn default_service_name() -> String {
    "sarea".to_string()
}

const fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            user: None,
            password: None,
            exchange: default_exchange(),
            service_name: default_service_name(),
            connection_name: None,
            request_timeout: default_request_timeout(),
        }
    }
}

impl BusConfig {
    /// Connection URL assembled from host and port.
    #[inline]
    pub fn url(&self) -> String {
        format!("nats://{}:{}", self.host, self.port)
    }

    /// Stream name derived from the exchange name.
    #[inline]
    pub fn stream_name(&self) -> String {
        self.exchange.to_uppercase().replace(['.', '-', ' '], "_")
    }

    /// Sets the broker host.
    #[inline]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the broker port.
    #[inline]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets user and password.
    #[inline]
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    /// Sets the exchange (subject prefix).
    #[inline]
    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = exchange.into();
        self
    }

    /// Sets the service name.
    #[inline]
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    /// Sets the connection name.
    #[inline]
    pub fn with_connection_name(mut self, name: impl Into<String>) -> Self {
        self.connection_name = Some(name.into());
        self
    }

    /// Sets the default request timeout.
    #[inline]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}
