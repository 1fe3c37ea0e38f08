//! Knowledge store facade
//!
//! Binds the entity store, vector backend, keyword index and embedder
//! into the public knowledge API: CRUD, semantic/hybrid search,
//! relationships, retention, feedback learning and export/import.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use sentinel_config::KnowledgeConfig;
use sentinel_core::{
    CancelSource, CancelToken, KnowledgeDomain, KnowledgeEntity, KnowledgeRelationship,
    KnowledgeType, LearningFeedback, Result, RetentionPolicy,
};

use crate::cache::{CacheStats, CachedEmbedder};
use crate::embeddings::{Embedder, FeatureHashEmbedder};
use crate::graph::{self, KnowledgeGraph, RelatedEntity};
use crate::keyword::KeywordIndex;
use crate::search::{matched_terms, rank_results, Explanation, HybridConfig, QueryResult, SemanticQuery};
use crate::store::{EntityStore, InMemoryEntityStore, InProcessVectorBackend, VectorBackend};
use crate::KnowledgeError;

/// Bounded confidence delta applied per feedback signal.
const MAX_CONFIDENCE_DELTA: f64 = 0.2;

/// Partial update for `update_entity`.
#[derive(Debug, Clone, Default)]
pub struct EntityPatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub metadata: Option<Value>,
    pub tags: Option<Vec<String>>,
    pub confidence_score: Option<f64>,
    pub retention_policy: Option<RetentionPolicy>,
    pub embedding: Option<Vec<f32>>,
}

/// Recorded retrieval feedback row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningInteraction {
    pub interaction_id: Uuid,
    pub query: String,
    pub selected_id: Uuid,
    pub reward: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Curated context for a decision, with an analysis block over the
/// retrieved decision history.
#[derive(Debug, Clone)]
pub struct DecisionContextBundle {
    pub items: Vec<QueryResult>,
    pub decision_patterns: Value,
}

/// The vector knowledge store.
pub struct KnowledgeStore {
    entities: Arc<dyn EntityStore>,
    vectors: Arc<dyn VectorBackend>,
    keywords: Arc<KeywordIndex>,
    embedder: Arc<CachedEmbedder>,
    config: KnowledgeConfig,
    interactions: RwLock<Vec<LearningInteraction>>,
}

impl KnowledgeStore {
    /// Fully in-process store: in-memory entities, in-process vector
    /// math, in-RAM keyword index, feature-hash embeddings.
    pub fn new_in_memory(config: KnowledgeConfig) -> Result<Self> {
        let embedder: Arc<dyn Embedder> = Arc::new(FeatureHashEmbedder::new(config.embedding_dim));
        let keywords =
            Arc::new(KeywordIndex::new(config.keyword_index.index_path.as_deref())
                .map_err(sentinel_core::Error::from)?);
        Ok(Self {
            entities: Arc::new(InMemoryEntityStore::new()),
            vectors: Arc::new(InProcessVectorBackend::new(config.similarity)),
            keywords,
            embedder: Arc::new(CachedEmbedder::new(embedder, config.embedding_cache_size)),
            config,
            interactions: RwLock::new(Vec::new()),
        })
    }

    /// Custom backends (e.g. the Qdrant vector backend).
    pub fn with_backends(
        entities: Arc<dyn EntityStore>,
        vectors: Arc<dyn VectorBackend>,
        keywords: Arc<KeywordIndex>,
        embedder: Arc<dyn Embedder>,
        config: KnowledgeConfig,
    ) -> Self {
        let embedder = Arc::new(CachedEmbedder::new(embedder, config.embedding_cache_size));
        Self {
            entities,
            vectors,
            keywords,
            embedder,
            config,
            interactions: RwLock::new(Vec::new()),
        }
    }

    pub fn embedding_dim(&self) -> usize {
        self.config.embedding_dim
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.embedder.stats()
    }

    /// Store one entity; embeds title+content when no embedding is set.
    pub async fn store_entity(&self, entity: KnowledgeEntity) -> Result<Uuid> {
        let entity = self.prepare(entity)?;
        let entity_id = entity.entity_id;
        self.entities.put(&entity).await?;
        self.vectors.upsert(entity_id, &entity.embedding).await?;
        self.keywords
            .upsert(&entity)
            .map_err(sentinel_core::Error::from)?;
        metrics::counter!("sentinel_knowledge_entities_stored_total").increment(1);
        tracing::debug!(entity_id = %entity_id, domain = %entity.domain.as_str(), "entity stored");
        Ok(entity_id)
    }

    /// All-or-nothing batch store: every entity is validated and embedded
    /// before the first write.
    pub async fn store_batch(&self, entities: Vec<KnowledgeEntity>) -> Result<Vec<Uuid>> {
        let prepared: Vec<KnowledgeEntity> = entities
            .into_iter()
            .map(|e| self.prepare(e))
            .collect::<Result<_>>()?;

        self.entities.put_batch(&prepared).await?;
        for entity in &prepared {
            self.vectors.upsert(entity.entity_id, &entity.embedding).await?;
            self.keywords
                .upsert(entity)
                .map_err(sentinel_core::Error::from)?;
        }
        Ok(prepared.iter().map(|e| e.entity_id).collect())
    }

    pub async fn get_entity(&self, entity_id: Uuid) -> Result<Option<KnowledgeEntity>> {
        self.entities.get(entity_id).await
    }

    /// Apply a partial update; content/title changes re-embed unless an
    /// explicit embedding is part of the patch.
    pub async fn update_entity(&self, entity_id: Uuid, patch: EntityPatch) -> Result<KnowledgeEntity> {
        let mut entity = self
            .entities
            .get(entity_id)
            .await?
            .ok_or(KnowledgeError::EntityNotFound(entity_id))?;

        let text_changed = patch.title.is_some() || patch.content.is_some();
        if let Some(title) = patch.title {
            entity.title = title;
        }
        if let Some(content) = patch.content {
            entity.content = content;
        }
        if let Some(metadata) = patch.metadata {
            entity.metadata = metadata;
        }
        if let Some(tags) = patch.tags {
            entity.tags = tags.into_iter().map(|t| t.to_lowercase()).collect();
            entity.tags.sort();
            entity.tags.dedup();
        }
        if let Some(confidence) = patch.confidence_score {
            entity.confidence_score = confidence.clamp(0.0, 1.0);
        }
        if let Some(policy) = patch.retention_policy {
            entity.retention_policy = policy;
        }
        match patch.embedding {
            Some(embedding) => entity.embedding = embedding,
            None if text_changed => {
                entity.embedding = self.embed(&format!("{} {}", entity.title, entity.content))?;
            }
            None => {}
        }
        let entity = self.prepare(entity)?;

        self.entities.put(&entity).await?;
        self.vectors.upsert(entity_id, &entity.embedding).await?;
        self.keywords
            .upsert(&entity)
            .map_err(sentinel_core::Error::from)?;
        Ok(entity)
    }

    pub async fn delete_entity(&self, entity_id: Uuid) -> Result<()> {
        if !self.entities.delete(entity_id).await? {
            return Err(KnowledgeError::EntityNotFound(entity_id).into());
        }
        self.vectors.remove(entity_id).await?;
        self.keywords
            .remove(entity_id)
            .map_err(sentinel_core::Error::from)?;
        Ok(())
    }

    /// Rank entities by embedding similarity to the query text.
    pub async fn semantic_search(&self, query: SemanticQuery) -> Result<Vec<QueryResult>> {
        self.semantic_search_cancellable(query, &CancelToken::never())
            .await
    }

    pub async fn semantic_search_cancellable(
        &self,
        query: SemanticQuery,
        cancel: &CancelToken,
    ) -> Result<Vec<QueryResult>> {
        cancel.check()?;
        let results = self.semantic_core(&query, cancel).await?;
        self.account_access(results).await
    }

    /// Weighted fusion of the vector and keyword passes:
    /// `score = w_v * vector + w_k * keyword`. A zero weight skips the
    /// corresponding pass entirely.
    pub async fn hybrid_search(
        &self,
        text: &str,
        embedding: Option<Vec<f32>>,
        config: HybridConfig,
    ) -> Result<Vec<QueryResult>> {
        self.hybrid_search_cancellable(text, embedding, config, &CancelToken::never())
            .await
    }

    pub async fn hybrid_search_cancellable(
        &self,
        text: &str,
        embedding: Option<Vec<f32>>,
        config: HybridConfig,
        cancel: &CancelToken,
    ) -> Result<Vec<QueryResult>> {
        cancel.check()?;
        let w_v = config.vector_weight;
        let w_k = config.keyword_weight;
        if w_v + w_k <= 0.0 {
            return Err(KnowledgeError::InvalidQuery(
                "hybrid weights must sum to a positive value".into(),
            )
            .into());
        }

        let mut filters = Vec::new();
        let candidates = self
            .candidate_entities(config.domain, &[], &[], None, &mut filters)
            .await?;
        let candidate_ids: HashSet<Uuid> = candidates.keys().copied().collect();
        let fetch = self.fetch_limit(config.max_results);

        let mut vector_scores: HashMap<Uuid, f64> = HashMap::new();
        if w_v > 0.0 {
            let query_embedding = match embedding {
                Some(embedding) => {
                    self.validate_dim(&embedding)?;
                    embedding
                }
                None => self.embed(text)?,
            };
            cancel.check()?;
            for (entity_id, score) in self
                .vectors
                .search(&query_embedding, fetch, Some(&candidate_ids))
                .await?
            {
                vector_scores.insert(entity_id, score);
            }
        }

        cancel.check()?;
        let mut keyword_scores: HashMap<Uuid, f64> = HashMap::new();
        if w_k > 0.0 {
            for (entity_id, score) in self
                .keywords
                .search(text, fetch)
                .map_err(sentinel_core::Error::from)?
            {
                if candidate_ids.contains(&entity_id) {
                    keyword_scores.insert(entity_id, score);
                }
            }
        }

        let ids: HashSet<Uuid> = vector_scores
            .keys()
            .chain(keyword_scores.keys())
            .copied()
            .collect();

        let mut results: Vec<QueryResult> = Vec::with_capacity(ids.len());
        for entity_id in ids {
            let Some(entity) = candidates.get(&entity_id).cloned() else {
                continue;
            };
            let vector_score = vector_scores.get(&entity_id).copied().unwrap_or(0.0);
            let keyword_score = keyword_scores.get(&entity_id).copied().unwrap_or(0.0);
            let score = w_v * vector_score + w_k * keyword_score;
            if let Some(threshold) = config.similarity_threshold {
                if score < threshold {
                    continue;
                }
            }
            results.push(QueryResult {
                matched_terms: matched_terms(text, &entity),
                explanation: Explanation {
                    vector_score,
                    keyword_score,
                    vector_weight: w_v,
                    keyword_weight: w_k,
                    metric: format!("{:?}", self.config.similarity).to_lowercase(),
                    embedding_mode: self.embedder.mode().as_str().to_string(),
                    filters_applied: filters.clone(),
                },
                similarity_score: score,
                entity,
            });
        }

        rank_results(&mut results);
        results.truncate(config.max_results.unwrap_or(self.config.max_results));
        self.account_access(results).await
    }

    /// Nearest neighbours of a stored entity, seeded by its own
    /// embedding.
    pub async fn similar_entities(&self, entity_id: Uuid, max: usize) -> Result<Vec<QueryResult>> {
        let entity = self
            .entities
            .get(entity_id)
            .await?
            .ok_or(KnowledgeError::EntityNotFound(entity_id))?;

        let mut query = SemanticQuery::new(format!("{} {}", entity.title, entity.content))
            .limit(max + 1);
        query.similarity_threshold = Some(0.0);
        let mut results = self.semantic_core(&query, &CancelToken::never()).await?;
        results.retain(|r| r.entity.entity_id != entity_id);
        results.truncate(max);
        self.account_access(results).await
    }

    pub async fn create_relationship(&self, relationship: KnowledgeRelationship) -> Result<()> {
        self.entities.upsert_relationship(&relationship).await
    }

    pub async fn related_entities(
        &self,
        entity_id: Uuid,
        relationship_type: Option<&str>,
        max_depth: usize,
    ) -> Result<Vec<RelatedEntity>> {
        let depth = max_depth.min(self.config.max_graph_depth.max(1));
        graph::related_entities(self.entities.as_ref(), entity_id, relationship_type, depth).await
    }

    pub async fn graph(&self, entity_id: Uuid, radius: usize) -> Result<KnowledgeGraph> {
        let radius = radius.min(self.config.max_graph_depth.max(1));
        graph::graph(self.entities.as_ref(), entity_id, radius).await
    }

    /// Re-tier an entity; its expiry becomes `now + retention_duration`.
    /// Archival entities never expire automatically.
    pub async fn set_retention(&self, entity_id: Uuid, policy: RetentionPolicy) -> Result<()> {
        let expires_at = self
            .retention_duration(policy)
            .map(|ttl| Utc::now() + ttl);
        self.entities.set_retention(entity_id, policy, expires_at).await
    }

    /// Delete expired entities (optionally one tier) from every index.
    /// Returns the removed ids. Archival entities are left for an
    /// external mover.
    pub async fn cleanup_expired(&self, policy: Option<RetentionPolicy>) -> Result<Vec<Uuid>> {
        let swept = self.entities.sweep_expired(Utc::now(), policy).await?;
        for entity_id in &swept {
            self.vectors.remove(*entity_id).await?;
            self.keywords
                .remove(*entity_id)
                .map_err(sentinel_core::Error::from)?;
        }
        if !swept.is_empty() {
            metrics::counter!("sentinel_knowledge_expired_total").increment(swept.len() as u64);
            tracing::debug!(count = swept.len(), "expired entities swept");
        }
        Ok(swept)
    }

    /// Record a retrieval outcome and nudge the selected entity's
    /// confidence by `reward * feedback_rate`, bounded.
    pub async fn learn_from_interaction(
        &self,
        query: &str,
        selected_id: Uuid,
        reward: f64,
    ) -> Result<f64> {
        let interaction = LearningInteraction {
            interaction_id: Uuid::new_v4(),
            query: query.to_string(),
            selected_id,
            reward,
            recorded_at: Utc::now(),
        };
        self.interactions.write().push(interaction);

        let delta = (reward * self.config.feedback_rate)
            .clamp(-MAX_CONFIDENCE_DELTA, MAX_CONFIDENCE_DELTA);
        self.entities.nudge_confidence(selected_id, delta).await
    }

    /// Apply decision feedback to every referenced entity:
    /// `confidence_delta = score * feedback_rate`, bounded.
    pub async fn update_knowledge_from_feedback(&self, feedback: &LearningFeedback) -> Result<()> {
        let delta = (feedback.score * self.config.feedback_rate)
            .clamp(-MAX_CONFIDENCE_DELTA, MAX_CONFIDENCE_DELTA);
        for entity_id in &feedback.applied_entity_ids {
            match self.entities.nudge_confidence(*entity_id, delta).await {
                Ok(_) => {}
                // Referenced entities may have expired since the decision.
                Err(sentinel_core::Error::NotFound(_)) => {
                    tracing::debug!(entity_id = %entity_id, "feedback target no longer exists");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    pub fn interactions(&self) -> Vec<LearningInteraction> {
        self.interactions.read().clone()
    }

    /// Export entities (optionally filtered by domain) and every
    /// relationship whose endpoints are both included.
    pub async fn export(&self, domains: Option<&[KnowledgeDomain]>) -> Result<Value> {
        let entities: Vec<KnowledgeEntity> = self
            .entities
            .all()
            .await?
            .into_iter()
            .filter(|e| domains.map(|d| d.contains(&e.domain)).unwrap_or(true))
            .collect();
        let included: HashSet<Uuid> = entities.iter().map(|e| e.entity_id).collect();
        let relationships: Vec<KnowledgeRelationship> = self
            .entities
            .all_relationships()
            .await?
            .into_iter()
            .filter(|r| included.contains(&r.source_id) && included.contains(&r.target_id))
            .collect();

        Ok(json!({
            "version": 1,
            "exported_at": Utc::now(),
            "embedding_dim": self.config.embedding_dim,
            "entities": serde_json::to_value(&entities)
                .map_err(|e| KnowledgeError::Import(e.to_string()))?,
            "relationships": serde_json::to_value(&relationships)
                .map_err(|e| KnowledgeError::Import(e.to_string()))?,
        }))
    }

    /// Transactional import: the whole document is validated before the
    /// first write. Returns (entities, relationships) imported.
    pub async fn import(&self, document: &Value) -> Result<(usize, usize)> {
        let entities: Vec<KnowledgeEntity> = serde_json::from_value(
            document
                .get("entities")
                .cloned()
                .ok_or_else(|| KnowledgeError::Import("missing entities".into()))?,
        )
        .map_err(|e| KnowledgeError::Import(e.to_string()))?;
        let relationships: Vec<KnowledgeRelationship> = serde_json::from_value(
            document
                .get("relationships")
                .cloned()
                .unwrap_or_else(|| json!([])),
        )
        .map_err(|e| KnowledgeError::Import(e.to_string()))?;

        let prepared: Vec<KnowledgeEntity> = entities
            .into_iter()
            .map(|e| self.prepare(e))
            .collect::<Result<_>>()?;

        let mut known: HashSet<Uuid> = self
            .entities
            .all()
            .await?
            .into_iter()
            .map(|e| e.entity_id)
            .collect();
        known.extend(prepared.iter().map(|e| e.entity_id));
        for relationship in &relationships {
            if !known.contains(&relationship.source_id) {
                return Err(KnowledgeError::EndpointMissing(relationship.source_id).into());
            }
            if !known.contains(&relationship.target_id) {
                return Err(KnowledgeError::EndpointMissing(relationship.target_id).into());
            }
        }

        self.entities.put_batch(&prepared).await?;
        for entity in &prepared {
            self.vectors.upsert(entity.entity_id, &entity.embedding).await?;
            self.keywords
                .upsert(entity)
                .map_err(sentinel_core::Error::from)?;
        }
        for relationship in &relationships {
            self.entities.upsert_relationship(relationship).await?;
        }
        tracing::info!(
            entities = prepared.len(),
            relationships = relationships.len(),
            "knowledge import applied"
        );
        Ok((prepared.len(), relationships.len()))
    }

    /// Curated context for a decision, biased toward rules, patterns and
    /// experiences, with an analysis block over prior decisions.
    pub async fn get_context_for_decision(
        &self,
        context: &str,
        domain: KnowledgeDomain,
        max_items: usize,
    ) -> Result<DecisionContextBundle> {
        let query = SemanticQuery::new(context)
            .in_domain(domain)
            .with_threshold(0.0)
            .limit(max_items.saturating_mul(3).max(max_items));
        let mut considered = self.semantic_core(&query, &CancelToken::never()).await?;
        let total_considered = considered.len();

        // Bias the curation toward actionable knowledge.
        considered.sort_by(|a, b| {
            let bias = |r: &QueryResult| {
                let boost = match r.entity.knowledge_type {
                    KnowledgeType::Rule | KnowledgeType::Pattern | KnowledgeType::Experience => 0.1,
                    _ => 0.0,
                };
                r.similarity_score + boost
            };
            bias(b)
                .partial_cmp(&bias(a))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        considered.truncate(max_items);

        let mut by_type: BTreeMap<&'static str, usize> = BTreeMap::new();
        let mut tag_counts: HashMap<String, usize> = HashMap::new();
        let mut confidence_sum = 0.0;
        let mut decision_count = 0usize;
        for result in &considered {
            *by_type.entry(result.entity.knowledge_type.as_str()).or_insert(0) += 1;
            confidence_sum += result.entity.confidence_score;
            if result.entity.knowledge_type == KnowledgeType::Decision {
                decision_count += 1;
            }
            for tag in &result.entity.tags {
                *tag_counts.entry(tag.clone()).or_insert(0) += 1;
            }
        }
        let mut top_tags: Vec<(String, usize)> = tag_counts.into_iter().collect();
        top_tags.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top_tags.truncate(5);

        let decision_patterns = json!({
            "domain": domain.as_str(),
            "total_considered": total_considered,
            "selected": considered.len(),
            "by_type": by_type,
            "prior_decisions": decision_count,
            "avg_confidence": if considered.is_empty() {
                0.0
            } else {
                confidence_sum / considered.len() as f64
            },
            "top_tags": top_tags.into_iter().map(|(tag, _)| tag).collect::<Vec<_>>(),
        });

        let items = self.account_access(considered).await?;
        Ok(DecisionContextBundle {
            items,
            decision_patterns,
        })
    }

    // ---- internals ----

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embedder.embed(text).map_err(sentinel_core::Error::from)?)
    }

    fn validate_dim(&self, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.config.embedding_dim {
            return Err(KnowledgeError::DimensionMismatch {
                expected: self.config.embedding_dim,
                actual: embedding.len(),
            }
            .into());
        }
        Ok(())
    }

    /// Embed when needed, clamp, and enforce the dimension invariant.
    fn prepare(&self, mut entity: KnowledgeEntity) -> Result<KnowledgeEntity> {
        if entity.embedding.is_empty() {
            entity.embedding = self.embed(&format!("{} {}", entity.title, entity.content))?;
        }
        self.validate_dim(&entity.embedding)?;
        entity.confidence_score = entity.confidence_score.clamp(0.0, 1.0);
        if let Some(expires_at) = entity.expires_at {
            entity.expires_at = Some(expires_at.max(entity.created_at));
        }
        Ok(entity)
    }

    fn retention_duration(&self, policy: RetentionPolicy) -> Option<Duration> {
        let retention = &self.config.retention;
        match policy {
            RetentionPolicy::Ephemeral => Some(Duration::seconds(retention.ephemeral_secs as i64)),
            RetentionPolicy::Session => Some(Duration::seconds(retention.session_secs as i64)),
            RetentionPolicy::Persistent => {
                Some(Duration::seconds(retention.persistent_secs as i64))
            }
            RetentionPolicy::Archival => None,
        }
    }

    fn fetch_limit(&self, max_results: Option<usize>) -> usize {
        max_results.unwrap_or(self.config.max_results).saturating_mul(4).max(64)
    }

    /// Metadata pre-filter producing the candidate set for ranking.
    async fn candidate_entities(
        &self,
        domain: Option<KnowledgeDomain>,
        knowledge_types: &[KnowledgeType],
        tags: &[String],
        max_age: Option<Duration>,
        filters: &mut Vec<String>,
    ) -> Result<HashMap<Uuid, KnowledgeEntity>> {
        if let Some(domain) = domain {
            filters.push(format!("domain:{}", domain.as_str()));
        }
        for knowledge_type in knowledge_types {
            filters.push(format!("type:{}", knowledge_type.as_str()));
        }
        for tag in tags {
            filters.push(format!("tag:{tag}"));
        }
        if max_age.is_some() {
            filters.push("max_age".to_string());
        }

        let now = Utc::now();
        let candidates = self
            .entities
            .all()
            .await?
            .into_iter()
            .filter(|e| !e.is_expired(now))
            .filter(|e| domain.map(|d| e.domain == d).unwrap_or(true))
            .filter(|e| {
                knowledge_types.is_empty() || knowledge_types.contains(&e.knowledge_type)
            })
            .filter(|e| tags.iter().all(|t| e.tags.contains(t)))
            .filter(|e| {
                max_age
                    .map(|age| now - e.created_at <= age)
                    .unwrap_or(true)
            })
            .map(|e| (e.entity_id, e))
            .collect();
        Ok(candidates)
    }

    /// Search without access accounting; public wrappers account once.
    async fn semantic_core(
        &self,
        query: &SemanticQuery,
        cancel: &CancelToken,
    ) -> Result<Vec<QueryResult>> {
        let query_embedding = self.embed(&query.text)?;
        cancel.check()?;

        let mut filters = Vec::new();
        let candidates = self
            .candidate_entities(
                query.domain,
                &query.knowledge_types,
                &query.tags,
                query.max_age,
                &mut filters,
            )
            .await?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let candidate_ids: HashSet<Uuid> = candidates.keys().copied().collect();

        let threshold = query
            .similarity_threshold
            .unwrap_or(self.config.similarity_threshold);
        let fetch = self.fetch_limit(query.max_results);

        cancel.check()?;
        let scored = self
            .vectors
            .search(&query_embedding, fetch, Some(&candidate_ids))
            .await?;

        let mut results: Vec<QueryResult> = Vec::new();
        for (entity_id, score) in scored {
            if score < threshold {
                continue;
            }
            let Some(entity) = candidates.get(&entity_id).cloned() else {
                continue;
            };
            results.push(QueryResult {
                matched_terms: matched_terms(&query.text, &entity),
                explanation: Explanation {
                    vector_score: score,
                    keyword_score: 0.0,
                    vector_weight: 1.0,
                    keyword_weight: 0.0,
                    metric: format!("{:?}", self.config.similarity).to_lowercase(),
                    embedding_mode: self.embedder.mode().as_str().to_string(),
                    filters_applied: filters.clone(),
                },
                similarity_score: score,
                entity,
            });
        }

        rank_results(&mut results);
        results.truncate(query.max_results.unwrap_or(self.config.max_results));
        Ok(results)
    }

    /// Batched access accounting, exactly once per returned entity; the
    /// returned snapshots reflect the update.
    async fn account_access(&self, mut results: Vec<QueryResult>) -> Result<Vec<QueryResult>> {
        if results.is_empty() {
            return Ok(results);
        }
        let now = Utc::now();
        let mut ids: Vec<Uuid> = results.iter().map(|r| r.entity.entity_id).collect();
        ids.sort();
        ids.dedup();
        self.entities.apply_access(&ids, now).await?;
        for result in &mut results {
            result.entity.access_count += 1;
            result.entity.last_accessed = now;
        }
        Ok(results)
    }
}

/// Periodic retention sweep across every tier.
pub struct RetentionSweeper {
    cancel: CancelSource,
    task: tokio::task::JoinHandle<()>,
}

impl RetentionSweeper {
    pub fn start(store: Arc<KnowledgeStore>) -> Self {
        let cancel = CancelSource::new();
        let token = cancel.token();
        let interval =
            std::time::Duration::from_secs(store.config.retention.sweep_interval_secs.max(1));
        let task = tokio::spawn(async move {
            tracing::debug!("retention sweeper started");
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                if let Err(e) = store.cleanup_expired(None).await {
                    tracing::warn!(error = %e, "retention sweep failed");
                }
            }
            tracing::debug!("retention sweeper stopped");
        });
        Self { cancel, task }
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}
