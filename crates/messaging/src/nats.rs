//! NATS JetStream message bus
//!
//! Production implementation of [`MessageBus`]. Topology:
//!
//! - one stream named from the configured exchange, capturing
//!   `<exchange>.>`, file storage, publish acks (at-least-once);
//! - per subscription, a durable pull consumer `<serviceName>-<typeName>`
//!   filtered to `<exchange>.<routing-key>`, explicit acks, `max_deliver = 2`
//!   so a failed handler gets exactly one redelivery;
//! - one core-NATS inbox subscription per process serving as the exclusive,
//!   auto-deleting reply queue for request/reply.
//!
//! The client reconnects automatically (60 s ping interval); streams,
//! durable consumers and the inbox subscription survive reconnection.
//! Publishes that fail while the connection is down surface as
//! [`MessagingError::Publish`]; retrying is the caller's decision.

use async_nats::jetstream::consumer::pull::Config as PullConsumerConfig;
use async_nats::jetstream::consumer::{AckPolicy, PullConsumer};
use async_nats::jetstream::stream::{Config as StreamConfig, StorageType};
use async_nats::jetstream::{AckKind, Context as JetStreamContext};
use async_nats::{Client, ConnectOptions, HeaderMap};
use async_trait::async_trait;
use futures::StreamExt;
use sarea_observability::propagation::CORRELATION_ID_HEADER;
use sarea_observability::{Metrics, NoopMetrics};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bus::{MessageBus, MessageHandler, SubscriptionHandle};
use crate::config::BusConfig;
use crate::envelope::{MessageEnvelope, routing_key_for_type};
use crate::error::{MessagingError, MessagingResult};
use crate::pending::PendingRequests;

/// Header carrying the envelope id.
const MESSAGE_ID_HEADER: &str = "message-id";
/// Header carrying the publication timestamp.
const TIMESTAMP_HEADER: &str = "timestamp";
/// Header carrying the fully-qualified payload type.
const MESSAGE_TYPE_HEADER: &str = "message-type";
/// Header carrying the reply subject for request/reply.
const REPLY_TO_HEADER: &str = "reply-to";

/// Message bus over NATS JetStream.
#[derive(Clone)]
pub struct NatsMessageBus {
    client: Client,
    jetstream: JetStreamContext,
    config: Arc<BusConfig>,
    stream_name: String,
    reply_subject: String,
    pending: Arc<PendingRequests>,
    metrics: Arc<dyn Metrics>,
}

impl NatsMessageBus {
    /// Connects, declares the stream and starts the reply dispatcher.
    pub async fn connect(config: BusConfig) -> MessagingResult<Self> {
        Self::connect_with_metrics(config, Arc::new(NoopMetrics)).await
    }

    /// Same as [`NatsMessageBus::connect`] with a metrics backend wired in.
    pub async fn connect_with_metrics(
        config: BusConfig,
        metrics: Arc<dyn Metrics>,
    ) -> MessagingResult<Self> {
        let mut options = ConnectOptions::new()
            .ping_interval(Duration::from_secs(60))
            .retry_on_initial_connect()
            .event_callback(|event| async move {
                match event {
                    async_nats::Event::Disconnected => {
                        warn!("nats connection lost, client is reconnecting")
                    }
                    async_nats::Event::Connected => info!("nats connection established"),
                    other => debug!(event = %other, "nats client event"),
                }
            });
        if let Some(name) = &config.connection_name {
            options = options.name(name);
        }
        if let (Some(user), Some(password)) = (&config.user, &config.password) {
            options = options.user_and_password(user.clone(), password.clone());
        }

        let client = async_nats::connect_with_options(config.url(), options)
            .await
            .map_err(|e| MessagingError::Connection(e.to_string()))?;
        let jetstream = async_nats::jetstream::new(client.clone());

        let stream_name = config.stream_name();
        ensure_stream(&jetstream, &stream_name, &config.exchange).await?;

        // Exclusive per-process reply queue: a core-NATS inbox subscription
        // that disappears with the client.
        let reply_subject = client.new_inbox();
        let pending = Arc::new(PendingRequests::new());
        let mut reply_sub = client
            .subscribe(reply_subject.clone())
            .await
            .map_err(|e| MessagingError::Connection(e.to_string()))?;
        let dispatcher_pending = pending.clone();
        tokio::spawn(async move {
            while let Some(message) = reply_sub.next().await {
                match serde_json::from_slice::<MessageEnvelope>(&message.payload) {
                    Ok(envelope) => dispatcher_pending.dispatch(envelope),
                    Err(err) => warn!(error = %err, "unparseable reply dropped"),
                }
            }
        });

        metrics.set_active_connections(1);
        info!(
            url = %config.url(),
            stream = %stream_name,
            service = %config.service_name,
            "message bus connected"
        );

        Ok(Self {
            client,
            jetstream,
            config: Arc::new(config),
            stream_name,
            reply_subject,
            pending,
            metrics,
        })
    }

    /// Subject for a message type / routing key under the exchange prefix.
    fn subject_for(&self, message_type: &str, routing_key: Option<&str>) -> String {
        let key = routing_key
            .map(str::to_string)
            .unwrap_or_else(|| routing_key_for_type(message_type));
        format!("{}.{}", self.config.exchange, key)
    }

    async fn publish_envelope(
        &self,
        envelope: &MessageEnvelope,
        subject: String,
        operation: &str,
    ) -> MessagingResult<()> {
        let started = Instant::now();
        let payload = serde_json::to_vec(envelope)?;
        let result = async {
            let ack = self
                .jetstream
                .publish_with_headers(subject.clone(), envelope_headers(envelope), payload.into())
                .await
                .map_err(|e| MessagingError::Publish(e.to_string()))?;
            // The ack confirms the broker stored the message.
            ack.await
                .map_err(|e| MessagingError::Publish(e.to_string()))?;
            Ok(())
        }
        .await;

        let status = if result.is_ok() { "success" } else { "failure" };
        self.metrics.record_message_operation(
            operation,
            &envelope.message_type,
            status,
            started.elapsed(),
        );
        if result.is_ok() {
            debug!(subject = %subject, message_id = %envelope.id, "published");
        }
        result
    }
}

#[async_trait]
impl MessageBus for NatsMessageBus {
    async fn publish(
        &self,
        envelope: MessageEnvelope,
        routing_key: Option<&str>,
    ) -> MessagingResult<()> {
        let subject = self.subject_for(&envelope.message_type, routing_key);
        self.publish_envelope(&envelope, subject, "publish").await
    }

    async fn subscribe(
        &self,
        message_type: &str,
        routing_key: Option<&str>,
        handler: MessageHandler,
    ) -> MessagingResult<SubscriptionHandle> {
        let subject = self.subject_for(message_type, routing_key);
        let consumer_name = consumer_name(&self.config.service_name, message_type);

        let mut stream = self
            .jetstream
            .get_stream(&self.stream_name)
            .await
            .map_err(|e| MessagingError::Subscribe(e.to_string()))?;

        let consumer: PullConsumer = match stream.get_consumer(&consumer_name).await {
            Ok(consumer) => consumer,
            Err(_) => {
                info!(consumer = %consumer_name, subject = %subject, "creating durable consumer");
                stream
                    .create_consumer(PullConsumerConfig {
                        durable_name: Some(consumer_name.clone()),
                        filter_subject: subject.clone(),
                        ack_policy: AckPolicy::Explicit,
                        ack_wait: Duration::from_secs(30),
                        // Initial delivery plus one requeue after a handler failure.
                        max_deliver: 2,
                        max_ack_pending: 1024,
                        ..Default::default()
                    })
                    .await
                    .map_err(|e| MessagingError::Subscribe(e.to_string()))?
            }
        };

        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();
        let loop_subject = subject.clone();
        let metrics = self.metrics.clone();

        let task = tokio::spawn(async move {
            let mut messages = match consumer.messages().await {
                Ok(messages) => messages,
                Err(err) => {
                    error!(subject = %loop_subject, error = %err, "failed to open consumer stream");
                    return;
                }
            };
            loop {
                tokio::select! {
                    _ = loop_cancel.cancelled() => break,
                    next = messages.next() => match next {
                        Some(Ok(message)) => {
                            handle_delivery(&handler, metrics.as_ref(), message).await;
                        }
                        Some(Err(err)) => {
                            warn!(subject = %loop_subject, error = %err, "consumer stream error");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                        None => {
                            warn!(subject = %loop_subject, "consumer stream ended");
                            break;
                        }
                    }
                }
            }
        });

        Ok(SubscriptionHandle::new(subject, cancel, task))
    }

    async fn request(
        &self,
        envelope: MessageEnvelope,
        routing_key: Option<&str>,
        timeout: Option<Duration>,
        ctx: &CancellationToken,
    ) -> MessagingResult<MessageEnvelope> {
        let correlation_id = Uuid::new_v4().to_string();
        let mut envelope = envelope;
        envelope.correlation_id = Some(correlation_id.clone());
        envelope.reply_to = Some(self.reply_subject.clone());
        let subject = self.subject_for(&envelope.message_type, routing_key);

        // Registration happens-before publish so a fast reply cannot race the slot.
        let rx = self.pending.register(&correlation_id);
        if let Err(err) = self.publish_envelope(&envelope, subject, "request").await {
            self.pending.remove(&correlation_id);
            return Err(err);
        }

        let budget = timeout.unwrap_or(self.config.request_timeout);
        self.pending
            .await_reply(&correlation_id, rx, budget, ctx)
            .await
    }

    async fn respond(
        &self,
        request: &MessageEnvelope,
        reply: MessageEnvelope,
    ) -> MessagingResult<()> {
        let reply_to = request.reply_to.clone().ok_or_else(|| {
            MessagingError::Publish("request carries no reply_to address".to_string())
        })?;
        let mut reply = reply;
        reply.correlation_id = request.correlation_id.clone();

        let started = Instant::now();
        let payload = serde_json::to_vec(&reply)?;
        let result = self
            .client
            .publish_with_headers(reply_to, envelope_headers(&reply), payload.into())
            .await
            .map_err(|e| MessagingError::Publish(e.to_string()));
        let status = if result.is_ok() { "success" } else { "failure" };
        self.metrics
            .record_message_operation("reply", &reply.message_type, status, started.elapsed());
        result
    }

    fn pending_requests(&self) -> usize {
        self.pending.len()
    }
}

/// Declares the exchange stream when it does not exist yet.
async fn ensure_stream(
    jetstream: &JetStreamContext,
    stream_name: &str,
    exchange: &str,
) -> MessagingResult<()> {
    if jetstream.get_stream(stream_name).await.is_ok() {
        debug!(stream = %stream_name, "stream already exists");
        return Ok(());
    }

    info!(stream = %stream_name, exchange = %exchange, "creating stream");
    jetstream
        .create_stream(StreamConfig {
            name: stream_name.to_string(),
            subjects: vec![format!("{}.>", exchange)],
            storage: StorageType::File,
            max_age: Duration::from_secs(24 * 60 * 60),
            num_replicas: 1,
            ..Default::default()
        })
        .await
        .map_err(|e| MessagingError::Connection(e.to_string()))?;
    Ok(())
}

/// Applies the delivery contract to one JetStream message.
async fn handle_delivery(
    handler: &MessageHandler,
    metrics: &dyn Metrics,
    message: async_nats::jetstream::Message,
) {
    let started = Instant::now();

    let envelope: MessageEnvelope = match serde_json::from_slice(&message.payload) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(error = %err, "unparseable message, rejecting without requeue");
            if let Err(ack_err) = message.ack_with(AckKind::Term).await {
                warn!(error = %ack_err, "failed to term message");
            }
            metrics.record_message_operation("consume", "unknown", "malformed", started.elapsed());
            return;
        }
    };

    let message_type = envelope.message_type.clone();
    let message_id = envelope.id;
    match handler(envelope).await {
        Ok(()) => {
            if let Err(ack_err) = message.ack().await {
                warn!(message_id = %message_id, error = %ack_err, "failed to ack message");
            }
            metrics.record_message_operation("consume", &message_type, "success", started.elapsed());
        }
        Err(err) if err.is_malformed() => {
            warn!(message_id = %message_id, error = %err, "malformed payload, rejecting without requeue");
            if let Err(ack_err) = message.ack_with(AckKind::Term).await {
                warn!(error = %ack_err, "failed to term message");
            }
            metrics.record_message_operation("consume", &message_type, "malformed", started.elapsed());
        }
        Err(err) => {
            // max_deliver on the consumer caps this at a single requeue.
            warn!(message_id = %message_id, error = %err, "handler failed, rejecting with requeue");
            if let Err(ack_err) = message.ack_with(AckKind::Nak(None)).await {
                warn!(error = %ack_err, "failed to nak message");
            }
            metrics.record_message_operation("consume", &message_type, "requeued", started.elapsed());
        }
    }
}

/// Durable consumer name `<serviceName>-<typeName>`, broker-safe.
fn consumer_name(service_name: &str, message_type: &str) -> String {
    let type_part = routing_key_for_type(message_type);
    format!("{}-{}", sanitize(service_name), sanitize(&type_part))
}

fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '-' })
        .collect()
}

/// Maps envelope metadata onto broker message properties.
fn envelope_headers(envelope: &MessageEnvelope) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(MESSAGE_ID_HEADER, envelope.id.to_string().as_str());
    headers.insert(TIMESTAMP_HEADER, envelope.timestamp.to_rfc3339().as_str());
    headers.insert(MESSAGE_TYPE_HEADER, envelope.message_type.as_str());
    if let Some(correlation_id) = &envelope.correlation_id {
        headers.insert(CORRELATION_ID_HEADER, correlation_id.as_str());
    }
    if let Some(reply_to) = &envelope.reply_to {
        headers.insert(REPLY_TO_HEADER, reply_to.as_str());
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consumer_name_is_broker_safe() {
        assert_eq!(
            consumer_name("order-service", "my_crate::events::OrderPlaced"),
            "order-service-orderplaced"
        );
        assert_eq!(consumer_name("a.b", "Pay ment"), "a-b-pay-ment");
    }

    #[test]
    fn test_envelope_headers_carry_metadata() {
        let envelope = MessageEnvelope::new(&"payload")
            .unwrap()
            .with_correlation_id("corr-1");
        let headers = envelope_headers(&envelope);
        assert_eq!(
            headers.get(MESSAGE_ID_HEADER).map(|v| v.as_str().to_string()),
            Some(envelope.id.to_string())
        );
        assert!(headers.get(TIMESTAMP_HEADER).is_some());
        assert!(headers.get(MESSAGE_TYPE_HEADER).is_some());
        assert_eq!(
            headers.get(CORRELATION_ID_HEADER).map(|v| v.as_str().to_string()),
            Some("corr-1".to_string())
        );
        assert!(headers.get(REPLY_TO_HEADER).is_none());
    }
}
