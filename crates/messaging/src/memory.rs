//! In-memory message bus
//!
//! Broker-free implementation of [`MessageBus`] over a `tokio` broadcast
//! channel, honoring the same delivery contract as the NATS bus: topic-style
//! subject matching, requeue-once on handler failure, drop on malformed
//! payloads, correlation-id request/reply. Serves tests and local
//! development.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bus::{MessageBus, MessageHandler, SubscriptionHandle, subject_matches};
use crate::config::BusConfig;
use crate::envelope::{MessageEnvelope, routing_key_for_type};
use crate::error::{MessagingError, MessagingResult};
use crate::pending::PendingRequests;

/// One delivery on the process-local wire: full subject plus envelope.
type Delivery = (String, MessageEnvelope);

const CHANNEL_CAPACITY: usize = 4096;

/// Process-local bus with the same semantics as the broker-backed one.
#[derive(Clone)]
pub struct InMemoryMessageBus {
    exchange: String,
    request_timeout: Duration,
    tx: broadcast::Sender<Delivery>,
    reply_subject: String,
    pending: Arc<PendingRequests>,
}

impl InMemoryMessageBus {
    /// Creates the bus and starts its reply dispatcher.
    pub fn new(config: BusConfig) -> Self {
        let (tx, reply_rx) = broadcast::channel(CHANNEL_CAPACITY);
        let reply_subject = format!("_inbox.{}", Uuid::new_v4().simple());
        let pending = Arc::new(PendingRequests::new());

        let bus = Self {
            exchange: config.exchange.clone(),
            request_timeout: config.request_timeout,
            tx,
            reply_subject: reply_subject.clone(),
            pending: pending.clone(),
        };

        // The dispatcher lives while any clone of the bus holds the sender.
        tokio::spawn(async move {
            let mut rx = reply_rx;
            loop {
                match rx.recv().await {
                    Ok((subject, envelope)) => {
                        if subject == reply_subject {
                            pending.dispatch(envelope);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "reply dispatcher lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        bus
    }

    fn subject_for(&self, message_type: &str, routing_key: Option<&str>) -> String {
        let key = routing_key
            .map(str::to_string)
            .unwrap_or_else(|| routing_key_for_type(message_type));
        format!("{}.{}", self.exchange, key)
    }

    fn send(&self, subject: String, envelope: MessageEnvelope) {
        // No receivers bound is not an error: publishes are fire-and-forget.
        let _ = self.tx.send((subject, envelope));
    }
}

impl Default for InMemoryMessageBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

#[async_trait]
impl MessageBus for InMemoryMessageBus {
    async fn publish(
        &self,
        envelope: MessageEnvelope,
        routing_key: Option<&str>,
    ) -> MessagingResult<()> {
        let subject = self.subject_for(&envelope.message_type, routing_key);
        debug!(subject = %subject, message_id = %envelope.id, "publishing");
        self.send(subject, envelope);
        Ok(())
    }

    async fn subscribe(
        &self,
        message_type: &str,
        routing_key: Option<&str>,
        handler: MessageHandler,
    ) -> MessagingResult<SubscriptionHandle> {
        let pattern = self.subject_for(message_type, routing_key);
        let mut rx = self.tx.subscribe();
        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();
        let loop_pattern = pattern.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = loop_cancel.cancelled() => break,
                    received = rx.recv() => match received {
                        Ok((subject, envelope)) => {
                            if !subject_matches(&loop_pattern, &subject) {
                                continue;
                            }
                            deliver(&handler, envelope).await;
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(pattern = %loop_pattern, skipped, "subscriber lagged, messages dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });

        Ok(SubscriptionHandle::new(pattern, cancel, task))
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

        // Registration happens-before publish so a fast reply cannot race the slot.
        let rx = self.pending.register(&correlation_id);
        let subject = self.subject_for(&envelope.message_type, routing_key);
        self.send(subject, envelope);

        let budget = timeout.unwrap_or(self.request_timeout);
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
        self.send(reply_to, reply);
        Ok(())
    }

    fn pending_requests(&self) -> usize {
        self.pending.len()
    }
}

/// Applies the delivery contract to one message.
async fn deliver(handler: &MessageHandler, envelope: MessageEnvelope) {
    let message_id = envelope.id;
    match handler(envelope.clone()).await {
        Ok(()) => {}
        Err(err) if err.is_malformed() => {
            warn!(message_id = %message_id, error = %err, "malformed message dropped");
        }
        Err(err) => {
            warn!(message_id = %message_id, error = %err, "handler failed, redelivering once");
            if let Err(err) = handler(envelope).await {
                warn!(message_id = %message_id, error = %err, "redelivery failed, message dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MessageBusExt;
    use serde::{Deserialize, Serialize};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct InventoryReserved {
        sku: String,
        quantity: u32,
    }

    #[tokio::test]
    async fn test_publish_subscribe_roundtrip() {
        let bus = InMemoryMessageBus::default();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();

        let _sub = bus
            .subscribe_message::<InventoryReserved, _, _>(move |payload, _envelope| {
                let sink = sink.clone();
                async move {
                    sink.lock().unwrap().push(payload);
                    Ok(())
                }
            })
            .await
            .unwrap();

        bus.publish_message(&InventoryReserved {
            sku: "A-1".into(),
            quantity: 3,
        })
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let seen = received.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].sku, "A-1");
    }

    #[tokio::test]
    async fn test_routing_key_isolation() {
        let bus = InMemoryMessageBus::default();
        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();

        let handler: MessageHandler = Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        });
        let _sub = bus
            .subscribe("ignored", Some("inventory.reserved"), handler)
            .await
            .unwrap();

        let envelope = MessageEnvelope::new(&"payload").unwrap();
        bus.publish(envelope.clone(), Some("inventory.reserved")).await.unwrap();
        bus.publish(envelope, Some("payment.processed")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handler_failure_redelivers_exactly_once() {
        let bus = InMemoryMessageBus::default();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let handler: MessageHandler = Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Err(MessagingError::Publish("handler exploded".into())) })
        });
        let _sub = bus.subscribe("t", Some("orders.failed"), handler).await.unwrap();

        bus.publish(MessageEnvelope::new(&"x").unwrap(), Some("orders.failed"))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_not_redelivered() {
        let bus = InMemoryMessageBus::default();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let _sub = bus
            .subscribe_message::<InventoryReserved, _, _>(move |_payload, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await
            .unwrap();

        // A string payload cannot decode into InventoryReserved.
        let envelope = MessageEnvelope::new(&"garbage").unwrap();
        bus.publish(envelope, Some("inventoryreserved")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let bus = InMemoryMessageBus::default();
        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();

        let handler: MessageHandler = Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        });
        let sub = bus.subscribe("t", Some("stock.checked"), handler).await.unwrap();
        sub.unsubscribe().await;

        bus.publish(MessageEnvelope::new(&"x").unwrap(), Some("stock.checked"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_request_reply() {
        let bus = InMemoryMessageBus::default();
        let responder = bus.clone();

        let _sub = bus
            .subscribe_message::<InventoryReserved, _, _>(move |payload, envelope| {
                let responder = responder.clone();
                async move {
                    let reply = envelope.reply_with(&payload.quantity)?;
                    responder.respond(&envelope, reply).await
                }
            })
            .await
            .unwrap();

        let quantity: u32 = bus
            .request_message(
                &InventoryReserved {
                    sku: "B-2".into(),
                    quantity: 9,
                },
                Some(Duration::from_secs(1)),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(quantity, 9);
        assert_eq!(bus.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_request_without_consumer_times_out() {
        let bus = InMemoryMessageBus::default();
        let started = std::time::Instant::now();
        let result = bus
            .request(
                MessageEnvelope::new(&"ping").unwrap(),
                None,
                Some(Duration::from_millis(50)),
                &CancellationToken::new(),
            )
            .await;
        let elapsed = started.elapsed();
        assert!(matches!(result, Err(MessagingError::Timeout { .. })));
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(500), "elapsed {elapsed:?}");
        assert_eq!(bus.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_request_cancellation_cleans_up() {
        let bus = InMemoryMessageBus::default();
        let ctx = CancellationToken::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let result = bus
            .request(
                MessageEnvelope::new(&"ping").unwrap(),
                None,
                Some(Duration::from_secs(30)),
                &ctx,
            )
            .await;
        assert!(matches!(result, Err(MessagingError::Cancelled)));
        assert_eq!(bus.pending_requests(), 0);
    }
}
