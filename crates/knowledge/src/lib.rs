//! Vector-backed knowledge store
//!
//! Features:
//! - Entity storage with fixed-dimension embeddings
//! - Semantic search over four similarity metrics
//! - Hybrid fusion of vector and keyword passes
//! - Relationship graph with bounded BFS
//! - Retention policies with a sweep that never purges archival entities
//! - Feedback-driven confidence learning
//! - Deterministic feature-hash embedding fallback
//! - LRU embedding cache for repeated queries
//! - Transactional export/import

pub mod cache;
pub mod embeddings;
pub mod graph;
pub mod keyword;
pub mod knowledge;
pub mod qdrant;
pub mod search;
pub mod similarity;
pub mod store;

pub use cache::{CacheStats, CachedEmbedder, EmbeddingCache};
pub use embeddings::{Embedder, EmbeddingMode, FeatureHashEmbedder};
pub use graph::{KnowledgeGraph, RelatedEntity};
pub use keyword::KeywordIndex;
pub use knowledge::{DecisionContextBundle, EntityPatch, KnowledgeStore, LearningInteraction, RetentionSweeper};
pub use qdrant::{QdrantBackend, QdrantBackendConfig};
pub use search::{Explanation, HybridConfig, QueryResult, SemanticQuery};
pub use store::{EntityStore, InMemoryEntityStore, VectorBackend, InProcessVectorBackend};

use thiserror::Error;

/// Knowledge store errors.
#[derive(Error, Debug)]
pub enum KnowledgeError {
    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("embedding length {actual} does not match store dimensionality {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("entity not found: {0}")]
    EntityNotFound(uuid::Uuid),

    #[error("relationship endpoint missing: {0}")]
    EndpointMissing(uuid::Uuid),

    #[error("vector backend error: {0}")]
    VectorBackend(String),

    #[error("keyword index error: {0}")]
    Index(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("import rejected: {0}")]
    Import(String),

    #[error("connection error: {0}")]
    Connection(String),
}

impl From<KnowledgeError> for sentinel_core::Error {
    fn from(err: KnowledgeError) -> Self {
        match err {
            KnowledgeError::EntityNotFound(id) => sentinel_core::Error::NotFound(id.to_string()),
            KnowledgeError::DimensionMismatch { .. }
            | KnowledgeError::InvalidQuery(_)
            | KnowledgeError::Import(_)
            | KnowledgeError::EndpointMissing(_) => {
                sentinel_core::Error::InvalidInput(err.to_string())
            }
            KnowledgeError::Connection(msg) => sentinel_core::Error::Unavailable(msg),
            KnowledgeError::Embedding(msg)
            | KnowledgeError::VectorBackend(msg)
            | KnowledgeError::Index(msg) => sentinel_core::Error::Transient(msg),
        }
    }
}
