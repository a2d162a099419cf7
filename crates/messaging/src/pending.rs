//! Correlation-id keyed pending-request map
//!
//! Shared by every bus implementation. Registration happens before the
//! request is published; cleanup runs on timeout and cancellation alike, so a
//! late reply finds no entry and is dropped.

use dashmap::DashMap;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::envelope::MessageEnvelope;
use crate::error::{MessagingError, MessagingResult};

/// In-flight request completions keyed by correlation id.
#[derive(Debug, Default)]
pub(crate) struct PendingRequests {
    map: DashMap<String, oneshot::Sender<MessageEnvelope>>,
}

impl PendingRequests {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers a completion slot for a correlation id.
    pub(crate) fn register(&self, correlation_id: &str) -> oneshot::Receiver<MessageEnvelope> {
        let (tx, rx) = oneshot::channel();
        self.map.insert(correlation_id.to_string(), tx);
        rx
    }

    /// Removes a slot without completing it.
    pub(crate) fn remove(&self, correlation_id: &str) {
        self.map.remove(correlation_id);
    }

    /// Completes the slot matching the reply's correlation id, if any.
    /// Replies for unknown ids are dropped.
    pub(crate) fn dispatch(&self, reply: MessageEnvelope) {
        let Some(correlation_id) = reply.correlation_id.clone() else {
            debug!(message_id = %reply.id, "reply without correlation id dropped");
            return;
        };
        match self.map.remove(&correlation_id) {
            Some((_, slot)) => {
                // The requester may have timed out between remove and send.
                let _ = slot.send(reply);
            }
            None => {
                debug!(correlation_id = %correlation_id, "late reply dropped");
            }
        }
    }

    /// Number of requests currently awaiting a reply.
    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }

    /// Awaits one registered completion under a budget and the caller's
    /// context, cleaning up the slot on every failure path.
    pub(crate) async fn await_reply(
        &self,
        correlation_id: &str,
        rx: oneshot::Receiver<MessageEnvelope>,
        budget: Duration,
        ctx: &CancellationToken,
    ) -> MessagingResult<MessageEnvelope> {
        let started = Instant::now();
        tokio::select! {
            _ = ctx.cancelled() => {
                self.remove(correlation_id);
                Err(MessagingError::Cancelled)
            }
            outcome = tokio::time::timeout(budget, rx) => match outcome {
                Ok(Ok(reply)) => Ok(reply),
                Ok(Err(_)) => {
                    self.remove(correlation_id);
                    Err(MessagingError::Connection("reply channel closed".to_string()))
                }
                Err(_) => {
                    self.remove(correlation_id);
                    Err(MessagingError::Timeout {
                        elapsed: started.elapsed(),
                    })
                }
            }
        }
    }
}
