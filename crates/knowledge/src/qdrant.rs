//! Qdrant vector backend
//!
//! Swaps in behind the [`VectorBackend`](crate::store::VectorBackend)
//! seam when a Qdrant deployment is configured; the in-process backend
//! remains the default substrate.

use async_trait::async_trait;
use qdrant_client::{
    qdrant::{
        point_id::PointIdOptions, Condition, CreateCollectionBuilder, DeletePointsBuilder,
        Distance, Filter, HasIdCondition, PointId, PointStruct, PointsIdsList,
        SearchPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder,
    },
    Qdrant,
};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use sentinel_config::{QdrantConfig, SimilarityMetric};
use sentinel_core::Result;

use crate::store::VectorBackend;
use crate::KnowledgeError;

/// Connection settings for the Qdrant backend.
#[derive(Debug, Clone)]
pub struct QdrantBackendConfig {
    pub endpoint: String,
    pub collection: String,
    pub vector_dim: usize,
    pub metric: SimilarityMetric,
    pub api_key: Option<String>,
}

impl QdrantBackendConfig {
    pub fn from_settings(config: &QdrantConfig, vector_dim: usize, metric: SimilarityMetric) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            collection: config.collection.clone(),
            vector_dim,
            metric,
            api_key: config.api_key.clone(),
        }
    }
}

fn distance_for(metric: SimilarityMetric) -> Distance {
    match metric {
        SimilarityMetric::Cosine => Distance::Cosine,
        SimilarityMetric::Euclidean => Distance::Euclid,
        SimilarityMetric::Dot => Distance::Dot,
        SimilarityMetric::Manhattan => Distance::Manhattan,
    }
}

/// Normalize a Qdrant score into [0, 1] to stay comparable with the
/// in-process backend and configured thresholds.
fn normalize_score(metric: SimilarityMetric, score: f32) -> f64 {
    match metric {
        SimilarityMetric::Cosine | SimilarityMetric::Dot => {
            (((score as f64) + 1.0) / 2.0).clamp(0.0, 1.0)
        }
        SimilarityMetric::Euclidean | SimilarityMetric::Manhattan => {
            1.0 / (1.0 + (score as f64).abs())
        }
    }
}

/// Qdrant-backed embedding index.
pub struct QdrantBackend {
    client: Qdrant,
    config: QdrantBackendConfig,
}

impl QdrantBackend {
    pub async fn connect(config: QdrantBackendConfig) -> Result<Self> {
        let mut builder = Qdrant::from_url(&config.endpoint);
        if let Some(api_key) = &config.api_key {
            builder = builder.api_key(api_key.clone());
            tracing::info!("qdrant connection using api key authentication");
        }
        let client = builder
            .build()
            .map_err(|e| KnowledgeError::Connection(e.to_string()))?;

        let backend = Self { client, config };
        backend.ensure_collection().await?;
        Ok(backend)
    }

    async fn ensure_collection(&self) -> Result<()> {
        let exists = self
            .client
            .collection_exists(&self.config.collection)
            .await
            .map_err(|e| KnowledgeError::VectorBackend(e.to_string()))?;
        if !exists {
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(&self.config.collection).vectors_config(
                        VectorParamsBuilder::new(
                            self.config.vector_dim as u64,
                            distance_for(self.config.metric),
                        ),
                    ),
                )
                .await
                .map_err(|e| KnowledgeError::VectorBackend(e.to_string()))?;
            tracing::info!(collection = %self.config.collection, "qdrant collection created");
        }
        Ok(())
    }
}

#[async_trait]
impl VectorBackend for QdrantBackend {
    async fn upsert(&self, entity_id: Uuid, embedding: &[f32]) -> Result<()> {
        let point = PointStruct::new(
            entity_id.to_string(),
            embedding.to_vec(),
            HashMap::<String, qdrant_client::qdrant::Value>::new(),
        );
        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.config.collection, vec![point]))
            .await
            .map_err(|e| KnowledgeError::VectorBackend(e.to_string()))?;
        Ok(())
    }

    async fn remove(&self, entity_id: Uuid) -> Result<()> {
        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.config.collection).points(PointsIdsList {
                    ids: vec![PointId::from(entity_id.to_string())],
                }),
            )
            .await
            .map_err(|e| KnowledgeError::VectorBackend(e.to_string()))?;
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        limit: usize,
        candidates: Option<&HashSet<Uuid>>,
    ) -> Result<Vec<(Uuid, f64)>> {
        let mut builder = SearchPointsBuilder::new(
            &self.config.collection,
            query.to_vec(),
            limit as u64,
        );

        if let Some(candidates) = candidates {
            if candidates.is_empty() {
                return Ok(Vec::new());
            }
            let ids: Vec<PointId> = candidates
                .iter()
                .map(|id| PointId::from(id.to_string()))
                .collect();
            builder = builder.filter(Filter {
                must: vec![Condition {
                    condition_one_of: Some(
                        qdrant_client::qdrant::condition::ConditionOneOf::HasId(HasIdCondition {
                            has_id: ids,
                        }),
                    ),
                }],
                ..Default::default()
            });
        }

        let response = self
            .client
            .search_points(builder)
            .await
            .map_err(|e| KnowledgeError::VectorBackend(e.to_string()))?;

        let mut results = Vec::with_capacity(response.result.len());
        for point in response.result {
            let Some(point_id) = point.id.and_then(|id| id.point_id_options) else {
                continue;
            };
            let entity_id = match point_id {
                PointIdOptions::Uuid(uuid) => match Uuid::parse_str(&uuid) {
                    Ok(entity_id) => entity_id,
                    Err(_) => continue,
                },
                PointIdOptions::Num(_) => continue,
            };
            results.push((entity_id, normalize_score(self.config.metric, point.score)));
        }
        results.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_mapping() {
        assert_eq!(distance_for(SimilarityMetric::Cosine), Distance::Cosine);
        assert_eq!(distance_for(SimilarityMetric::Euclidean), Distance::Euclid);
        assert_eq!(distance_for(SimilarityMetric::Dot), Distance::Dot);
        assert_eq!(distance_for(SimilarityMetric::Manhattan), Distance::Manhattan);
    }

    #[test]
    fn test_score_normalization_bounds() {
        for metric in [
            SimilarityMetric::Cosine,
            SimilarityMetric::Dot,
            SimilarityMetric::Euclidean,
            SimilarityMetric::Manhattan,
        ] {
            for raw in [-2.0f32, -1.0, 0.0, 0.5, 1.0, 10.0] {
                let score = normalize_score(metric, raw);
                assert!((0.0..=1.0).contains(&score), "{metric:?}/{raw} -> {score}");
            }
        }
    }
}
