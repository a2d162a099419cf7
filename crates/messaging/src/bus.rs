//! Message bus capability
//!
//! [`MessageBus`] is the object-safe wire-level surface (JSON-value
//! envelopes); [`MessageBusExt`] layers typed publish/subscribe/request on
//! top. Both broker-backed and in-memory implementations satisfy the same
//! delivery contract: at-least-once, requeue-once on handler failure, drop on
//! malformed payloads.

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::envelope::{MessageEnvelope, type_name_of};
use crate::error::MessagingResult;

/// Async delivery handler over wire envelopes.
pub type MessageHandler =
    Arc<dyn Fn(MessageEnvelope) -> BoxFuture<'static, MessagingResult<()>> + Send + Sync>;

/// Owns one consumer binding.
///
/// Dropping the handle (or calling [`SubscriptionHandle::unsubscribe`]) stops
/// delivery to the handler.
#[derive(Debug)]
pub struct SubscriptionHandle {
    subject: String,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    pub(crate) fn new(subject: String, cancel: CancellationToken, task: JoinHandle<()>) -> Self {
        Self {
            subject,
            cancel,
            task: Some(task),
        }
    }

    /// Subject this subscription is bound to.
    #[inline]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// True while the delivery loop is still wanted.
    #[inline]
    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Stops delivery and waits for the loop to wind down.
    pub async fn unsubscribe(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        debug!(subject = %self.subject, "subscription released");
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Wire-level bus operations.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publishes an envelope. The routing key defaults to the lowercased
    /// payload type name.
    async fn publish(
        &self,
        envelope: MessageEnvelope,
        routing_key: Option<&str>,
    ) -> MessagingResult<()>;

    /// Binds a handler to a message type (or explicit routing key).
    async fn subscribe(
        &self,
        message_type: &str,
        routing_key: Option<&str>,
        handler: MessageHandler,
    ) -> MessagingResult<SubscriptionHandle>;

    /// Publishes a request and awaits the correlated reply.
    ///
    /// A fresh correlation id and the process reply subject are stamped onto
    /// the envelope. Fails with a timeout when the budget (default from
    /// configuration) elapses, and with a cancellation when `ctx` fires; both
    /// paths drop the pending entry, so a late reply is discarded.
    async fn request(
        &self,
        envelope: MessageEnvelope,
        routing_key: Option<&str>,
        timeout: Option<Duration>,
        ctx: &CancellationToken,
    ) -> MessagingResult<MessageEnvelope>;

    /// Sends a reply to a request envelope's reply address, carrying its
    /// correlation id.
    async fn respond(
        &self,
        request: &MessageEnvelope,
        reply: MessageEnvelope,
    ) -> MessagingResult<()>;

    /// Number of requests currently awaiting a reply.
    fn pending_requests(&self) -> usize;
}

/// Typed convenience layer over [`MessageBus`].
#[async_trait]
pub trait MessageBusExt: MessageBus {
    /// Publishes a typed payload under its default routing key.
    async fn publish_message<T>(&self, payload: &T) -> MessagingResult<()>
    where
        T: Serialize + Send + Sync,
    {
        self.publish(MessageEnvelope::new(payload)?, None).await
    }

    /// Sends a typed request and decodes the typed reply.
    async fn request_message<T, R>(
        &self,
        payload: &T,
        timeout: Option<Duration>,
        ctx: &CancellationToken,
    ) -> MessagingResult<R>
    where
        T: Serialize + Send + Sync,
        R: DeserializeOwned,
    {
        let reply = self
            .request(MessageEnvelope::new(payload)?, None, timeout, ctx)
            .await?;
        reply.decode()
    }

    /// Binds a typed handler under the payload type's default routing key.
    ///
    /// The handler receives the decoded payload and the raw envelope (for
    /// correlation and replying). A payload that fails to decode counts as
    /// malformed and is dropped without redelivery.
    async fn subscribe_message<T, F, Fut>(&self, handler: F) -> MessagingResult<SubscriptionHandle>
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(T, MessageEnvelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MessagingResult<()>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let wire_handler: MessageHandler = Arc::new(move |envelope: MessageEnvelope| {
            let handler = handler.clone();
            Box::pin(async move {
                let payload: T = envelope.decode()?;
                handler(payload, envelope).await
            })
        });
        self.subscribe(&type_name_of::<T>(), None, wire_handler)
            .await
    }
}

impl<B: MessageBus + ?Sized> MessageBusExt for B {}

/// NATS-style subject matching: `*` matches one token, `>` the rest.
pub(crate) fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), _) => return true,
            (Some("*"), Some(_)) => continue,
            (Some(p), Some(s)) if p == s => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
