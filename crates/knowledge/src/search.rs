//! Query and result types
//!
//! Ranking invariants: results are strictly descending in
//! `similarity_score`; ties break on confidence, then access count, then
//! entity id. Scores are comparable with thresholds in [0, 1].

use chrono::Duration;
use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

use sentinel_core::{KnowledgeDomain, KnowledgeEntity, KnowledgeType};

/// Semantic search request.
#[derive(Debug, Clone)]
pub struct SemanticQuery {
    pub text: String,
    pub domain: Option<KnowledgeDomain>,
    pub knowledge_types: Vec<KnowledgeType>,
    /// All listed tags must be present.
    pub tags: Vec<String>,
    /// Only entities created within this window.
    pub max_age: Option<Duration>,
    /// Overrides the configured threshold.
    pub similarity_threshold: Option<f64>,
    /// Overrides the configured limit.
    pub max_results: Option<usize>,
}

impl SemanticQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            domain: None,
            knowledge_types: Vec::new(),
            tags: Vec::new(),
            max_age: None,
            similarity_threshold: None,
            max_results: None,
        }
    }

    pub fn in_domain(mut self, domain: KnowledgeDomain) -> Self {
        self.domain = Some(domain);
        self
    }

    pub fn of_types<I: IntoIterator<Item = KnowledgeType>>(mut self, types: I) -> Self {
        self.knowledge_types = types.into_iter().collect();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(|t| t.into().to_lowercase()).collect();
        self
    }

    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = Some(threshold.clamp(0.0, 1.0));
        self
    }

    pub fn limit(mut self, max_results: usize) -> Self {
        self.max_results = Some(max_results);
        self
    }
}

/// Hybrid search fusion settings.
#[derive(Debug, Clone)]
pub struct HybridConfig {
    pub vector_weight: f64,
    pub keyword_weight: f64,
    pub similarity_threshold: Option<f64>,
    pub max_results: Option<usize>,
    pub domain: Option<KnowledgeDomain>,
}

impl HybridConfig {
    pub fn new(vector_weight: f64, keyword_weight: f64) -> Self {
        Self {
            vector_weight: vector_weight.max(0.0),
            keyword_weight: keyword_weight.max(0.0),
            similarity_threshold: None,
            max_results: None,
            domain: None,
        }
    }

    pub fn in_domain(mut self, domain: KnowledgeDomain) -> Self {
        self.domain = Some(domain);
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = Some(threshold.clamp(0.0, 1.0));
        self
    }

    pub fn limit(mut self, max_results: usize) -> Self {
        self.max_results = Some(max_results);
        self
    }
}

/// Why a result scored the way it did.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Explanation {
    pub vector_score: f64,
    pub keyword_score: f64,
    pub vector_weight: f64,
    pub keyword_weight: f64,
    pub metric: String,
    pub embedding_mode: String,
    pub filters_applied: Vec<String>,
}

/// One ranked search result.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub entity: KnowledgeEntity,
    pub similarity_score: f64,
    /// Query terms appearing in the entity's text.
    pub matched_terms: Vec<String>,
    pub explanation: Explanation,
}

/// Ranking comparator: descending score, then confidence, then access
/// count, then ascending entity id.
pub(crate) fn rank_results(results: &mut [QueryResult]) {
    results.sort_by(|a, b| {
        b.similarity_score
            .partial_cmp(&a.similarity_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.entity
                    .confidence_score
                    .partial_cmp(&a.entity.confidence_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| b.entity.access_count.cmp(&a.entity.access_count))
            .then_with(|| {
                a.entity
                    .entity_id
                    .to_string()
                    .cmp(&b.entity.entity_id.to_string())
            })
    });
}

/// Lowercased word set intersection between a query and entity text.
pub(crate) fn matched_terms(query: &str, entity: &KnowledgeEntity) -> Vec<String> {
    let entity_text = format!("{} {} {}", entity.title, entity.content, entity.tags.join(" "));
    let entity_words: std::collections::HashSet<String> = entity_text
        .unicode_words()
        .map(|w| w.to_lowercase())
        .collect();

    let mut matched: Vec<String> = query
        .unicode_words()
        .map(|w| w.to_lowercase())
        .filter(|w| entity_words.contains(w))
        .collect();
    matched.sort();
    matched.dedup();
    matched
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_core::{KnowledgeDomain, KnowledgeType};

    fn result(score: f64, confidence: f64, access: u64) -> QueryResult {
        let mut entity = KnowledgeEntity::new(
            KnowledgeDomain::RiskManagement,
            KnowledgeType::Fact,
            "t",
            "c",
        )
        .with_confidence(confidence);
        entity.access_count = access;
        QueryResult {
            entity,
            similarity_score: score,
            matched_terms: Vec::new(),
            explanation: Explanation {
                vector_score: score,
                keyword_score: 0.0,
                vector_weight: 1.0,
                keyword_weight: 0.0,
                metric: "cosine".to_string(),
                embedding_mode: "feature_hash".to_string(),
                filters_applied: Vec::new(),
            },
        }
    }

    #[test]
    fn test_rank_descending_with_tie_chain() {
        let mut results = vec![
            result(0.8, 0.5, 3),
            result(0.9, 0.1, 0),
            result(0.8, 0.9, 1),
            result(0.8, 0.5, 7),
        ];
        rank_results(&mut results);

        assert_eq!(results[0].similarity_score, 0.9);
        // Equal scores: higher confidence first.
        assert_eq!(results[1].entity.confidence_score, 0.9);
        // Then higher access count.
        assert_eq!(results[2].entity.access_count, 7);
        assert_eq!(results[3].entity.access_count, 3);
    }

    #[test]
    fn test_matched_terms_intersection() {
        let entity = KnowledgeEntity::new(
            KnowledgeDomain::RegulatoryCompliance,
            KnowledgeType::Rule,
            "OFAC sanctions update",
            "screening against the latest list",
        )
        .with_tags(["sanctions"]);
        let matched = matched_terms("OFAC sanctions screening deadline", &entity);
        assert_eq!(matched, vec!["ofac", "sanctions", "screening"]);
    }
}
