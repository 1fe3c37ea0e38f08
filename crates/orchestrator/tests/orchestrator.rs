//! Orchestrator routing, feedback and health scenarios.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use sentinel_bus::{InMemoryMessageStore, MessageBus, MessageHandler, MessageTypeRegistry};
use sentinel_config::{InitStrategy, OrchestratorConfig, Settings};
use sentinel_consensus::{ConsensusEngine, InMemoryConsensusStore};
use sentinel_core::{
    ComponentStatus, Error, FeedbackType, KnowledgeDomain, KnowledgeEntity, KnowledgeType,
    LearningFeedback, Message, Result,
};
use sentinel_knowledge::KnowledgeStore;
use sentinel_mediator::{ConversationMediator, InMemoryConversationStore};
use sentinel_orchestrator::{AgentDeps, AgentOrchestrator};

struct NullHandler;

#[async_trait]
impl MessageHandler for NullHandler {
    async fn handle(&self, _message: &Message) -> Result<()> {
        Ok(())
    }
}

fn deps() -> AgentDeps {
    let settings = Settings::default();
    let bus = Arc::new(MessageBus::new(
        Arc::new(InMemoryMessageStore::new()),
        Arc::new(MessageTypeRegistry::with_system_types()),
        settings.bus.clone(),
    ));
    let consensus = ConsensusEngine::new(
        Arc::new(InMemoryConsensusStore::new()),
        settings.consensus.clone(),
    );
    let mediator = ConversationMediator::new(
        Arc::new(InMemoryConversationStore::new()),
        bus.clone(),
        consensus.clone(),
        settings.mediator.clone(),
    );
    let knowledge = Arc::new(KnowledgeStore::new_in_memory(settings.knowledge.clone()).unwrap());
    AgentDeps {
        bus,
        mediator,
        consensus,
        knowledge,
    }
}

#[tokio::test]
async fn test_lazy_routing_instantiates_on_first_use() {
    let orchestrator = AgentOrchestrator::new(deps(), OrchestratorConfig::default());
    orchestrator.initialize().await.unwrap();

    let decision = orchestrator
        .make_decision(
            "transaction_guardian",
            json!({"transaction": {"amount": 100.0, "counterparty": "Acme"}}),
        )
        .await
        .unwrap();
    assert_eq!(decision.decision_type, "transaction_assessment");
    assert!(decision.agent_id.starts_with("transaction_guardian:"));
}

#[tokio::test]
async fn test_unknown_type_yields_degraded_fallback() {
    let orchestrator = AgentOrchestrator::new(deps(), OrchestratorConfig::default());
    let decision = orchestrator
        .make_decision("fraud_oracle", json!({}))
        .await
        .unwrap();
    assert_eq!(decision.confidence, 0.0);
    assert!(decision.requires_human_review);
    assert_eq!(decision.decision_type, "degraded_fallback");
}

#[tokio::test]
async fn test_fail_fast_surfaces_unavailable() {
    let config = OrchestratorConfig {
        init_strategy: InitStrategy::Lazy,
        fail_fast: true,
    };
    let orchestrator = AgentOrchestrator::new(deps(), config);
    let err = orchestrator
        .make_decision("fraud_oracle", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unavailable(_)));
}

#[tokio::test]
async fn test_eager_init_instantiates_all_builtins() {
    let config = OrchestratorConfig {
        init_strategy: InitStrategy::Eager,
        fail_fast: true,
    };
    let orchestrator = AgentOrchestrator::new(deps(), config);
    orchestrator.initialize().await.unwrap();

    let health = orchestrator.get_system_health().await.unwrap();
    assert!(health.components.contains_key("agent:transaction_guardian"));
    assert!(health.components.contains_key("agent:regulatory_assessor"));
    assert!(health.components.contains_key("agent:audit_intelligence"));
    assert_eq!(health.status, ComponentStatus::Ready);
}

#[tokio::test]
async fn test_feedback_adjusts_knowledge_and_emits_event() {
    let deps = deps();
    // A listener that will receive the decision_feedback broadcast.
    deps.bus.register_agent("compliance_dashboard", Arc::new(NullHandler));

    let entity_id = deps
        .knowledge
        .store_entity(
            KnowledgeEntity::new(
                KnowledgeDomain::TransactionMonitoring,
                KnowledgeType::Rule,
                "Sanctioned parties",
                "Transactions involving Volga Trading LLC are prohibited",
            )
            .with_tags(["sanctions"])
            .with_confidence(0.6),
        )
        .await
        .unwrap();

    let orchestrator = AgentOrchestrator::new(deps.clone(), OrchestratorConfig::default());
    let decision = orchestrator
        .make_decision(
            "transaction_guardian",
            json!({"transaction": {"amount": 500.0, "counterparty": "Volga Trading LLC"}}),
        )
        .await
        .unwrap();
    assert_eq!(decision.output["verdict"], "block");

    let before = deps.knowledge.get_entity(entity_id).await.unwrap().unwrap();
    let accepted = orchestrator
        .incorporate_feedback(LearningFeedback::new(
            decision.decision_id,
            1.0,
            FeedbackType::HumanReview,
        ))
        .await
        .unwrap();
    assert!(accepted);

    // Confidence moved by score * feedback_rate on the entity that
    // informed the decision.
    let after = deps.knowledge.get_entity(entity_id).await.unwrap().unwrap();
    assert!(after.confidence_score > before.confidence_score);

    // The decision_feedback event was fanned out on the bus.
    let stats = deps.bus.stats().await.unwrap();
    assert!(stats.sent >= 1);
}

#[tokio::test]
async fn test_health_reports_degraded_agents() {
    let orchestrator = AgentOrchestrator::new(deps(), OrchestratorConfig::default());
    // Force a degraded fallback so the decision log is non-empty, then
    // check the metrics block is present.
    orchestrator.make_decision("missing_agent", json!({})).await.unwrap();

    let health = orchestrator.get_system_health().await.unwrap();
    assert!(health.components.contains_key("message_bus"));
    assert!(health.metrics["decisions_issued"].as_u64().unwrap() >= 1);
}

#[tokio::test]
async fn test_shutdown_drops_agents() {
    let config = OrchestratorConfig {
        init_strategy: InitStrategy::Eager,
        fail_fast: false,
    };
    let orchestrator = AgentOrchestrator::new(deps(), config);
    orchestrator.initialize().await.unwrap();
    orchestrator.shutdown().await.unwrap();

    let health = orchestrator.get_system_health().await.unwrap();
    assert!(!health.components.contains_key("agent:transaction_guardian"));
}
