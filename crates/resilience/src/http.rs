//! Resilient HTTP client
//!
//! A façade over `reqwest` that wraps every request in the timeout policy and
//! then in retry. Status ≥ 400 surfaces as a typed failure before retry
//! classification: 5xx is transient, 4xx is permanent. Deserialization of the
//! body applies only after a successful exchange.

use reqwest::Method;
use sarea_observability::{Metrics, NoopMetrics};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ResilienceError, ResilienceResult};
use crate::retry::{RetryConfig, RetryPolicy};
use crate::timeout::{TimeoutConfig, TimeoutPolicy};

/// Maps an HTTP status to the failure taxonomy. 2xx/3xx pass through.
pub(crate) fn classify_status(status: reqwest::StatusCode, url: &str) -> ResilienceResult<()> {
    if status.is_client_error() {
        Err(ResilienceError::permanent(format!(
            "HTTP {} from {}",
            status.as_u16(),
            url
        )))
    } else if status.is_server_error() {
        Err(ResilienceError::transient(format!(
            "HTTP {} from {}",
            status.as_u16(),
            url
        )))
    } else {
        Ok(())
    }
}

/// Request/response client with the resilience pipeline applied per call.
#[derive(Clone)]
pub struct ResilientHttpClient {
    client: reqwest::Client,
    retry: RetryPolicy,
    timeout: TimeoutPolicy,
    metrics: Arc<dyn Metrics>,
}

impl ResilientHttpClient {
    /// Creates a client from retry and timeout configuration.
    pub fn new(retry: RetryConfig, timeout: TimeoutConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            retry: RetryPolicy::new(retry).with_operation_name("http"),
            timeout: TimeoutPolicy::new(timeout),
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Wires a metrics backend; retry attempts are also relabeled onto it.
    pub fn with_metrics(mut self, metrics: Arc<dyn Metrics>) -> Self {
        self.retry = self.retry.with_metrics(metrics.clone());
        self.metrics = metrics;
        self
    }

    /// Uses a pre-built `reqwest` client (custom pool, TLS, proxy).
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// GET returning a deserialized JSON body.
    pub async fn get_json<R: DeserializeOwned>(
        &self,
        url: &str,
        ctx: &CancellationToken,
    ) -> ResilienceResult<R> {
        let body = self.send(Method::GET, url, None, ctx).await?;
        decode_json(&body)
    }

    /// POST with a JSON body, returning a deserialized JSON body.
    pub async fn post_json<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
        ctx: &CancellationToken,
    ) -> ResilienceResult<R> {
        let payload = serde_json::to_value(body).map_err(|e| {
            ResilienceError::permanent_with_source("request body serialization failed", e)
        })?;
        let body = self.send(Method::POST, url, Some(payload), ctx).await?;
        decode_json(&body)
    }

    /// PUT with a JSON body, discarding the response body.
    pub async fn put_json<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
        ctx: &CancellationToken,
    ) -> ResilienceResult<()> {
        let payload = serde_json::to_value(body).map_err(|e| {
            ResilienceError::permanent_with_source("request body serialization failed", e)
        })?;
        self.send(Method::PUT, url, Some(payload), ctx).await?;
        Ok(())
    }

    /// DELETE, discarding the response body.
    pub async fn delete(&self, url: &str, ctx: &CancellationToken) -> ResilienceResult<()> {
        self.send(Method::DELETE, url, None, ctx).await?;
        Ok(())
    }

    /// One resilient exchange: timeout innermost, retry outermost.
    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<serde_json::Value>,
        ctx: &CancellationToken,
    ) -> ResilienceResult<Vec<u8>> {
        let endpoint_path = endpoint_of(url);
        let endpoint: &str = endpoint_path.as_str();
        let body = &body;
        let method_ref = &method;

        self.retry
            .execute(ctx, |attempt_ctx| async move {
                self.timeout
                    .execute(None, &attempt_ctx, |_inner| async move {
                        let started = Instant::now();
                        let mut request = self.client.request(method_ref.clone(), url);
                        if let Some(payload) = body {
                            request = request.json(payload);
                        }

                        let response = match request.send().await {
                            Ok(response) => response,
                            Err(err) => {
                                self.metrics.record_http_request(
                                    method_ref.as_str(),
                                    endpoint,
                                    0,
                                    started.elapsed(),
                                );
                                return Err(ResilienceError::transient_with_source(
                                    format!("request to {} failed", url),
                                    err,
                                ));
                            }
                        };

                        let status = response.status();
                        self.metrics.record_http_request(
                            method_ref.as_str(),
                            endpoint,
                            status.as_u16(),
                            started.elapsed(),
                        );
                        debug!(method = %method_ref, url, status = status.as_u16(), "http exchange");
                        classify_status(status, url)?;

                        response
                            .bytes()
                            .await
                            .map(|bytes| bytes.to_vec())
                            .map_err(|err| {
                                ResilienceError::transient_with_source(
                                    format!("reading body from {} failed", url),
                                    err,
                                )
                            })
                    })
                    .await
            })
            .await
    }
}

fn decode_json<R: DeserializeOwned>(body: &[u8]) -> ResilienceResult<R> {
    serde_json::from_slice(body)
        .map_err(|e| ResilienceError::permanent_with_source("response deserialization failed", e))
}

/// Reduces a URL to its path for the `endpoint` metric tag.
fn endpoint_of(url: &str) -> String {
    reqwest::Url::parse(url)
        .map(|parsed| parsed.path().to_string())
        .unwrap_or_else(|_| url.to_string())
}
