//! ScyllaDB persistence layer
//!
//! Provides durable implementations of the message, conversation and
//! consensus store seams. Disabled by default (the in-memory stores are
//! the default substrate) and enabled through
//! `PersistenceConfig.enabled`.
//!
//! Knowledge entities are not persisted here: the knowledge store's
//! backends (Qdrant vector index, keyword index) own that data, and the
//! `EntityStore` seam accepts any durable implementation.

pub mod client;
pub mod consensus;
pub mod conversations;
pub mod messages;
pub mod schema;

pub use client::{ScyllaClient, ScyllaConfig};
pub use consensus::ScyllaConsensusStore;
pub use conversations::ScyllaConversationStore;
pub use messages::ScyllaMessageStore;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("row decode error: {0}")]
    Decode(String),
}

impl From<PersistenceError> for sentinel_core::Error {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::Connection(msg) | PersistenceError::Query(msg) => {
                sentinel_core::Error::Unavailable(msg)
            }
            PersistenceError::Schema(msg) => sentinel_core::Error::Fatal(msg),
            PersistenceError::Decode(msg) => sentinel_core::Error::Fatal(msg),
        }
    }
}

/// Combined persistence layer with all durable stores.
pub struct PersistenceLayer {
    pub messages: ScyllaMessageStore,
    pub conversations: ScyllaConversationStore,
    pub consensus: ScyllaConsensusStore,
}

/// Connect, ensure the schema, and build the store set.
pub async fn init(config: ScyllaConfig) -> Result<PersistenceLayer, PersistenceError> {
    let client = ScyllaClient::connect(config).await?;
    client.ensure_schema().await?;

    Ok(PersistenceLayer {
        messages: ScyllaMessageStore::new(client.clone()),
        conversations: ScyllaConversationStore::new(client.clone()),
        consensus: ScyllaConsensusStore::new(client),
    })
}
