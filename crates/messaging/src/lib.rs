//! Asynchronous message bus for event propagation and request/reply.
//!
//! Messages travel as JSON [`MessageEnvelope`]s routed by dot-separated
//! lowercase keys under a configured exchange prefix. Delivery is
//! at-least-once: handlers must be idempotent or deduplicate by message id.
//! A failed handler gets exactly one redelivery; malformed messages are
//! dropped without requeue.
//!
//! [`NatsMessageBus`] is the broker-backed implementation over NATS
//! JetStream; [`InMemoryMessageBus`] honors the same contract in-process for
//! tests and local development.

pub mod bus;
pub mod config;
pub mod envelope;
pub mod error;
pub mod memory;
pub mod nats;
mod pending;

pub use bus::{MessageBus, MessageBusExt, MessageHandler, SubscriptionHandle};
pub use config::BusConfig;
pub use envelope::{MessageEnvelope, routing_key_for_type, type_name_of};
pub use error::{MessagingError, MessagingResult};
pub use memory::InMemoryMessageBus;
pub use nats::NatsMessageBus;
