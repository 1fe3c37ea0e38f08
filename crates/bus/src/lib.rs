//! Durable, prioritized, at-least-once message bus
//!
//! Features:
//! - Point-to-point and broadcast messaging with per-recipient rows
//! - Message Type Registry with JSON Schema payload validation
//! - Priority-ordered delivery via a bounded worker pool
//! - Exponential backoff with bounded retries and dead-lettering
//! - TTL expiry via a single-instance sweeper
//! - Store-backed claims so worker crashes never lose messages

pub mod backoff;
pub mod bus;
pub mod memory;
pub mod registry;
pub mod stats;
pub mod worker;

pub use backoff::backoff_delay;
pub use bus::{MessageBus, MessageHandler};
pub use memory::InMemoryMessageStore;
pub use registry::{system_types, MessageTypeRegistry};
pub use stats::BusStats;
pub use worker::BusRunner;

use thiserror::Error;

/// Message bus errors.
#[derive(Error, Debug)]
pub enum BusError {
    #[error("unknown message type: {0}")]
    UnknownType(String),

    #[error("payload schema violation: {0}")]
    SchemaViolation(String),

    #[error("queue capacity {0} exceeded")]
    Overflow(usize),

    #[error("message not found: {0}")]
    MessageNotFound(uuid::Uuid),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("store error: {0}")]
    Store(String),
}

impl From<BusError> for sentinel_core::Error {
    fn from(err: BusError) -> Self {
        match err {
            BusError::UnknownType(t) => sentinel_core::Error::InvalidType(t),
            BusError::SchemaViolation(msg) => sentinel_core::Error::InvalidInput(msg),
            BusError::Overflow(cap) => {
                sentinel_core::Error::Backpressure(format!("queue capacity {cap} exceeded"))
            }
            BusError::MessageNotFound(id) => sentinel_core::Error::NotFound(id.to_string()),
            BusError::InvalidTransition(msg) => sentinel_core::Error::StateConflict(msg),
            BusError::Store(msg) => sentinel_core::Error::Unavailable(msg),
        }
    }
}
