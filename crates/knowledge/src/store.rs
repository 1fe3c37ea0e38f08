//! Entity and vector storage seams
//!
//! The entity store owns rows and relationships; the vector backend owns
//! the embedding index. The in-memory pair is the default substrate; a
//! Qdrant backend (`qdrant.rs`) swaps in behind the same seam.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use sentinel_config::SimilarityMetric;
use sentinel_core::{KnowledgeEntity, KnowledgeRelationship, Result, RetentionPolicy};

use crate::similarity::similarity;
use crate::KnowledgeError;

/// Durable entity rows and relationship edges.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Insert or replace one entity.
    async fn put(&self, entity: &KnowledgeEntity) -> Result<()>;

    /// All-or-nothing batch insert.
    async fn put_batch(&self, entities: &[KnowledgeEntity]) -> Result<()>;

    async fn get(&self, entity_id: Uuid) -> Result<Option<KnowledgeEntity>>;

    /// Returns whether the entity existed. Removes its relationships.
    async fn delete(&self, entity_id: Uuid) -> Result<bool>;

    /// Full scan; export, import validation and candidate filtering.
    async fn all(&self) -> Result<Vec<KnowledgeEntity>>;

    async fn contains(&self, entity_id: Uuid) -> Result<bool>;

    /// Batched access accounting: bump `access_count` and refresh
    /// `last_accessed` exactly once per listed entity.
    async fn apply_access(&self, entity_ids: &[Uuid], at: DateTime<Utc>) -> Result<()>;

    /// Apply a bounded confidence delta; returns the new score.
    async fn nudge_confidence(&self, entity_id: Uuid, delta: f64) -> Result<f64>;

    async fn set_retention(
        &self,
        entity_id: Uuid,
        policy: RetentionPolicy,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Delete expired entities matching the policy filter. Archival
    /// entities are never deleted here (move-not-purge tier).
    async fn sweep_expired(
        &self,
        now: DateTime<Utc>,
        policy: Option<RetentionPolicy>,
    ) -> Result<Vec<Uuid>>;

    /// Upsert on `(source, target, relationship_type)`.
    async fn upsert_relationship(&self, relationship: &KnowledgeRelationship) -> Result<()>;

    async fn relationships_from(&self, entity_id: Uuid) -> Result<Vec<KnowledgeRelationship>>;

    async fn relationships_of(&self, entity_id: Uuid) -> Result<Vec<KnowledgeRelationship>>;

    async fn all_relationships(&self) -> Result<Vec<KnowledgeRelationship>>;
}

/// Embedding index seam.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    async fn upsert(&self, entity_id: Uuid, embedding: &[f32]) -> Result<()>;

    async fn remove(&self, entity_id: Uuid) -> Result<()>;

    /// Rank `candidates` (or everything, when `None`) against the query,
    /// descending score in [0, 1].
    async fn search(
        &self,
        query: &[f32],
        limit: usize,
        candidates: Option<&HashSet<Uuid>>,
    ) -> Result<Vec<(Uuid, f64)>>;
}

#[derive(Default)]
struct EntityInner {
    entities: HashMap<Uuid, KnowledgeEntity>,
    relationships: Vec<KnowledgeRelationship>,
}

/// Lock-guarded in-memory implementation of [`EntityStore`].
#[derive(Default)]
pub struct InMemoryEntityStore {
    inner: RwLock<EntityInner>,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn put(&self, entity: &KnowledgeEntity) -> Result<()> {
        self.inner
            .write()
            .entities
            .insert(entity.entity_id, entity.clone());
        Ok(())
    }

    async fn put_batch(&self, entities: &[KnowledgeEntity]) -> Result<()> {
        let mut inner = self.inner.write();
        for entity in entities {
            inner.entities.insert(entity.entity_id, entity.clone());
        }
        Ok(())
    }

    async fn get(&self, entity_id: Uuid) -> Result<Option<KnowledgeEntity>> {
        Ok(self.inner.read().entities.get(&entity_id).cloned())
    }

    async fn delete(&self, entity_id: Uuid) -> Result<bool> {
        let mut inner = self.inner.write();
        let existed = inner.entities.remove(&entity_id).is_some();
        inner
            .relationships
            .retain(|r| r.source_id != entity_id && r.target_id != entity_id);
        Ok(existed)
    }

    async fn all(&self) -> Result<Vec<KnowledgeEntity>> {
        Ok(self.inner.read().entities.values().cloned().collect())
    }

    async fn contains(&self, entity_id: Uuid) -> Result<bool> {
        Ok(self.inner.read().entities.contains_key(&entity_id))
    }

    async fn apply_access(&self, entity_ids: &[Uuid], at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.write();
        for entity_id in entity_ids {
            if let Some(entity) = inner.entities.get_mut(entity_id) {
                entity.access_count += 1;
                entity.last_accessed = at;
            }
        }
        Ok(())
    }

    async fn nudge_confidence(&self, entity_id: Uuid, delta: f64) -> Result<f64> {
        let mut inner = self.inner.write();
        let entity = inner
            .entities
            .get_mut(&entity_id)
            .ok_or(KnowledgeError::EntityNotFound(entity_id))?;
        entity.nudge_confidence(delta);
        Ok(entity.confidence_score)
    }

    async fn set_retention(
        &self,
        entity_id: Uuid,
        policy: RetentionPolicy,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        let entity = inner
            .entities
            .get_mut(&entity_id)
            .ok_or(KnowledgeError::EntityNotFound(entity_id))?;
        entity.retention_policy = policy;
        entity.expires_at = expires_at.map(|at| at.max(entity.created_at));
        Ok(())
    }

    async fn sweep_expired(
        &self,
        now: DateTime<Utc>,
        policy: Option<RetentionPolicy>,
    ) -> Result<Vec<Uuid>> {
        let mut inner = self.inner.write();
        let doomed: Vec<Uuid> = inner
            .entities
            .values()
            .filter(|e| {
                e.is_expired(now)
                    && e.retention_policy != RetentionPolicy::Archival
                    && policy.map(|p| e.retention_policy == p).unwrap_or(true)
            })
            .map(|e| e.entity_id)
            .collect();
        for entity_id in &doomed {
            inner.entities.remove(entity_id);
        }
        inner
            .relationships
            .retain(|r| !doomed.contains(&r.source_id) && !doomed.contains(&r.target_id));
        Ok(doomed)
    }

    async fn upsert_relationship(&self, relationship: &KnowledgeRelationship) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.entities.contains_key(&relationship.source_id) {
            return Err(KnowledgeError::EndpointMissing(relationship.source_id).into());
        }
        if !inner.entities.contains_key(&relationship.target_id) {
            return Err(KnowledgeError::EndpointMissing(relationship.target_id).into());
        }
        if let Some(existing) = inner.relationships.iter_mut().find(|r| {
            r.source_id == relationship.source_id
                && r.target_id == relationship.target_id
                && r.relationship_type == relationship.relationship_type
        }) {
            existing.properties = relationship.properties.clone();
        } else {
            inner.relationships.push(relationship.clone());
        }
        Ok(())
    }

    async fn relationships_from(&self, entity_id: Uuid) -> Result<Vec<KnowledgeRelationship>> {
        Ok(self
            .inner
            .read()
            .relationships
            .iter()
            .filter(|r| r.source_id == entity_id)
            .cloned()
            .collect())
    }

    async fn relationships_of(&self, entity_id: Uuid) -> Result<Vec<KnowledgeRelationship>> {
        Ok(self
            .inner
            .read()
            .relationships
            .iter()
            .filter(|r| r.source_id == entity_id || r.target_id == entity_id)
            .cloned()
            .collect())
    }

    async fn all_relationships(&self) -> Result<Vec<KnowledgeRelationship>> {
        Ok(self.inner.read().relationships.clone())
    }
}

/// In-process vector index computing the configured similarity metric
/// directly over stored embeddings.
pub struct InProcessVectorBackend {
    metric: SimilarityMetric,
    vectors: RwLock<HashMap<Uuid, Vec<f32>>>,
}

impl InProcessVectorBackend {
    pub fn new(metric: SimilarityMetric) -> Self {
        Self {
            metric,
            vectors: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl VectorBackend for InProcessVectorBackend {
    async fn upsert(&self, entity_id: Uuid, embedding: &[f32]) -> Result<()> {
        self.vectors.write().insert(entity_id, embedding.to_vec());
        Ok(())
    }

    async fn remove(&self, entity_id: Uuid) -> Result<()> {
        self.vectors.write().remove(&entity_id);
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        limit: usize,
        candidates: Option<&HashSet<Uuid>>,
    ) -> Result<Vec<(Uuid, f64)>> {
        let vectors = self.vectors.read();
        let mut scored: Vec<(Uuid, f64)> = vectors
            .iter()
            .filter(|(id, _)| candidates.map(|c| c.contains(id)).unwrap_or(true))
            .map(|(id, embedding)| (*id, similarity(self.metric, query, embedding)))
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(limit);
        Ok(scored)
    }
}
