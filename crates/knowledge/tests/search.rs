//! Knowledge store search and lifecycle scenarios.

use serde_json::json;
use uuid::Uuid;

use sentinel_config::KnowledgeConfig;
use sentinel_core::{
    Error, KnowledgeDomain, KnowledgeEntity, KnowledgeRelationship, KnowledgeType,
    LearningFeedback, FeedbackType, RetentionPolicy,
};
use sentinel_knowledge::{EntityPatch, HybridConfig, KnowledgeStore, SemanticQuery};

fn store() -> KnowledgeStore {
    KnowledgeStore::new_in_memory(KnowledgeConfig::default()).unwrap()
}

fn entity(
    domain: KnowledgeDomain,
    knowledge_type: KnowledgeType,
    title: &str,
    content: &str,
    tags: &[&str],
) -> KnowledgeEntity {
    KnowledgeEntity::new(domain, knowledge_type, title, content)
        .with_tags(tags.iter().copied())
        .with_confidence(0.7)
}

async fn seed_sanctions(store: &KnowledgeStore) -> (Uuid, Uuid, Uuid) {
    let e1 = store
        .store_entity(entity(
            KnowledgeDomain::RegulatoryCompliance,
            KnowledgeType::Rule,
            "OFAC sanctions update",
            "OFAC sanctions list update requires rescreening all counterparties",
            &["sanctions", "ofac"],
        ))
        .await
        .unwrap();
    let e2 = store
        .store_entity(entity(
            KnowledgeDomain::RegulatoryCompliance,
            KnowledgeType::Fact,
            "Sanctions screening cadence",
            "Counterparty sanctions screening runs daily against updated lists",
            &["sanctions"],
        ))
        .await
        .unwrap();
    let e3 = store
        .store_entity(entity(
            KnowledgeDomain::RegulatoryCompliance,
            KnowledgeType::Context,
            "Quarterly office budget",
            "The quarterly office budget covers catering and travel",
            &["finance"],
        ))
        .await
        .unwrap();
    (e1, e2, e3)
}

#[tokio::test]
async fn test_semantic_search_ordering_and_access_accounting() {
    let store = store();
    let (e1, _e2, e3) = seed_sanctions(&store).await;

    let results = store
        .semantic_search(
            SemanticQuery::new("OFAC sanctions")
                .in_domain(KnowledgeDomain::RegulatoryCompliance)
                .with_threshold(0.5)
                .limit(2),
        )
        .await
        .unwrap();

    assert!(!results.is_empty());
    assert!(results.len() <= 2);
    assert_eq!(results[0].entity.entity_id, e1);
    // Strictly descending similarity.
    for pair in results.windows(2) {
        assert!(pair[0].similarity_score >= pair[1].similarity_score);
    }
    // Thresholds and limits keep the off-topic entity out.
    assert!(results.iter().all(|r| r.entity.entity_id != e3));
    assert!(results.iter().all(|r| r.similarity_score >= 0.5));
    // Matched terms and explanation carry the fallback embedding mode.
    assert!(results[0].matched_terms.contains(&"ofac".to_string()));
    assert_eq!(results[0].explanation.embedding_mode, "feature_hash");

    // Access accounting: exactly once for the returned entity.
    let row = store.get_entity(e1).await.unwrap().unwrap();
    assert_eq!(row.access_count, 1);
    assert_eq!(results[0].entity.access_count, 1);
}

#[tokio::test]
async fn test_hybrid_degenerates_to_pure_passes() {
    let store = store();
    seed_sanctions(&store).await;

    // w_v = 0: pure keyword.
    let keyword_only = store
        .hybrid_search("sanctions screening", None, HybridConfig::new(0.0, 1.0))
        .await
        .unwrap();
    assert!(!keyword_only.is_empty());
    assert!(keyword_only
        .iter()
        .all(|r| r.explanation.vector_score == 0.0));

    // w_k = 0: pure vector.
    let vector_only = store
        .hybrid_search("sanctions screening", None, HybridConfig::new(1.0, 0.0))
        .await
        .unwrap();
    assert!(!vector_only.is_empty());
    assert!(vector_only
        .iter()
        .all(|r| r.explanation.keyword_score == 0.0));

    // Both zero is rejected.
    let err = store
        .hybrid_search("sanctions", None, HybridConfig::new(0.0, 0.0))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[tokio::test]
async fn test_hybrid_fuses_weighted_sum() {
    let store = store();
    seed_sanctions(&store).await;

    let results = store
        .hybrid_search(
            "OFAC sanctions update",
            None,
            HybridConfig::new(0.6, 0.4).limit(3),
        )
        .await
        .unwrap();
    for result in &results {
        let expected = 0.6 * result.explanation.vector_score + 0.4 * result.explanation.keyword_score;
        assert!((result.similarity_score - expected).abs() < 1e-9);
    }
}

#[tokio::test]
async fn test_embedding_dimension_enforced() {
    let store = store();
    let bad = entity(
        KnowledgeDomain::RiskManagement,
        KnowledgeType::Fact,
        "bad",
        "bad",
        &[],
    )
    .with_embedding(vec![0.1, 0.2, 0.3]);
    let err = store.store_entity(bad).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[tokio::test]
async fn test_update_entity_reembeds_on_content_change() {
    let store = store();
    let (e1, _, _) = seed_sanctions(&store).await;
    let before = store.get_entity(e1).await.unwrap().unwrap();

    let after = store
        .update_entity(
            e1,
            EntityPatch {
                content: Some("completely different subject matter".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_ne!(before.embedding, after.embedding);
    assert_eq!(after.embedding.len(), store.embedding_dim());
}

#[tokio::test]
async fn test_retention_and_cleanup() {
    let store = store();
    let (e1, e2, _) = seed_sanctions(&store).await;

    store
        .set_retention(e1, RetentionPolicy::Ephemeral)
        .await
        .unwrap();
    // Force the expiry into the past through a patch-level update.
    let mut patched = store.get_entity(e1).await.unwrap().unwrap();
    patched.expires_at = Some(chrono::Utc::now() - chrono::Duration::seconds(1));
    // Re-store with the forced expiry; created_at is older so it sticks.
    store.store_entity(patched).await.unwrap();

    store
        .set_retention(e2, RetentionPolicy::Archival)
        .await
        .unwrap();

    let swept = store.cleanup_expired(None).await.unwrap();
    assert_eq!(swept, vec![e1]);
    assert!(store.get_entity(e1).await.unwrap().is_none());
    // Archival never expires automatically.
    assert!(store.get_entity(e2).await.unwrap().is_some());

    // The swept entity no longer surfaces in search.
    let results = store
        .semantic_search(SemanticQuery::new("OFAC sanctions update").with_threshold(0.0))
        .await
        .unwrap();
    assert!(results.iter().all(|r| r.entity.entity_id != e1));
}

#[tokio::test]
async fn test_feedback_nudges_confidence_bounded() {
    let store = store();
    let (e1, _, _) = seed_sanctions(&store).await;

    let score = store
        .learn_from_interaction("ofac query", e1, 1.0)
        .await
        .unwrap();
    let baseline = 0.7 + 1.0 * KnowledgeConfig::default().feedback_rate;
    assert!((score - baseline).abs() < 1e-9);

    // A huge signal stays bounded and clamped to [0, 1].
    for _ in 0..100 {
        store
            .learn_from_interaction("ofac query", e1, 1_000.0)
            .await
            .unwrap();
    }
    let row = store.get_entity(e1).await.unwrap().unwrap();
    assert!(row.confidence_score <= 1.0);

    let feedback = LearningFeedback::new(Uuid::new_v4(), -1_000.0, FeedbackType::Outcome)
        .with_entities(vec![e1]);
    store.update_knowledge_from_feedback(&feedback).await.unwrap();
    let row = store.get_entity(e1).await.unwrap().unwrap();
    assert!(row.confidence_score >= 0.0);
}

#[tokio::test]
async fn test_export_import_round_trip() {
    let source = store();
    let (e1, e2, e3) = seed_sanctions(&source).await;
    source
        .create_relationship(KnowledgeRelationship::new(e1, e2, "refines"))
        .await
        .unwrap();

    let document = source.export(None).await.unwrap();

    let target = store();
    let (entities, relationships) = target.import(&document).await.unwrap();
    assert_eq!(entities, 3);
    assert_eq!(relationships, 1);

    for entity_id in [e1, e2, e3] {
        let original = source.get_entity(entity_id).await.unwrap().unwrap();
        let imported = target.get_entity(entity_id).await.unwrap().unwrap();
        assert_eq!(original.title, imported.title);
        assert_eq!(original.embedding, imported.embedding);
        assert_eq!(original.tags, imported.tags);
    }

    let related = target.related_entities(e1, None, 2).await.unwrap();
    assert_eq!(related.len(), 1);
    assert_eq!(related[0].entity.entity_id, e2);
}

#[tokio::test]
async fn test_import_rejects_dangling_relationship() {
    let target = store();
    let document = json!({
        "entities": [],
        "relationships": [{
            "source_id": Uuid::new_v4(),
            "target_id": Uuid::new_v4(),
            "relationship_type": "cites",
            "properties": null,
            "created_at": chrono::Utc::now(),
        }],
    });
    let err = target.import(&document).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[tokio::test]
async fn test_decision_context_biases_actionable_types() {
    let store = store();
    seed_sanctions(&store).await;
    store
        .store_entity(entity(
            KnowledgeDomain::RegulatoryCompliance,
            KnowledgeType::Decision,
            "Prior screening decision",
            "Approved counterparty after sanctions screening cleared",
            &["sanctions"],
        ))
        .await
        .unwrap();

    let bundle = store
        .get_context_for_decision(
            "counterparty sanctions screening",
            KnowledgeDomain::RegulatoryCompliance,
            3,
        )
        .await
        .unwrap();

    assert!(!bundle.items.is_empty());
    assert!(bundle.items.len() <= 3);
    let patterns = &bundle.decision_patterns;
    assert_eq!(patterns["domain"], "regulatory_compliance");
    assert!(patterns["selected"].as_u64().unwrap() >= 1);
    assert!(patterns["avg_confidence"].as_f64().unwrap() > 0.0);
}

#[tokio::test]
async fn test_similar_entities_excludes_self() {
    let store = store();
    let (e1, _, _) = seed_sanctions(&store).await;

    let similar = store.similar_entities(e1, 2).await.unwrap();
    assert!(!similar.is_empty());
    assert!(similar.iter().all(|r| r.entity.entity_id != e1));
}
