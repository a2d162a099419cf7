//! Message envelope
//!
//! The metadata-bearing wrapper around every payload on the wire. The `id`
//! identifies one physical message; the `correlation_id` ties a request to
//! its reply and propagates across logical operations.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MessagingResult;

/// Wire envelope. Payloads travel as UTF-8 JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageEnvelope {
    /// Unique id of this physical message
    pub id: Uuid,
    /// Publication timestamp
    pub timestamp: DateTime<Utc>,
    /// Fully-qualified payload type name
    #[serde(rename = "type")]
    pub message_type: String,
    /// Ties a request to its reply; propagated across operations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Subject the reply should be published to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// The JSON payload
    pub payload: serde_json::Value,
}

impl MessageEnvelope {
    /// Wraps a payload in a fresh envelope.
    pub fn new<T: Serialize>(payload: &T) -> MessagingResult<Self> {
        Ok(Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            message_type: type_name_of::<T>(),
            correlation_id: None,
            reply_to: None,
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Sets the correlation id.
    #[inline]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Builds a reply envelope: fresh id, the request's correlation id,
    /// no further reply address.
    pub fn reply_with<T: Serialize>(&self, payload: &T) -> MessagingResult<Self> {
        let mut reply = Self::new(payload)?;
        reply.correlation_id = self.correlation_id.clone();
        Ok(reply)
    }

    /// Deserializes the payload into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> MessagingResult<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    /// Routing key derived from the payload type when none is given.
    #[inline]
    pub fn default_routing_key(&self) -> String {
        routing_key_for_type(&self.message_type)
    }
}

/// Fully-qualified type name used as the envelope `type`.
#[inline]
pub fn type_name_of<T>() -> String {
    std::any::type_name::<T>().to_string()
}

/// Default routing key: the lowercased unqualified payload type name.
pub fn routing_key_for_type(message_type: &str) -> String {
    message_type
        .rsplit("::")
        .next()
        .unwrap_or(message_type)
        .to_lowercase()
}
