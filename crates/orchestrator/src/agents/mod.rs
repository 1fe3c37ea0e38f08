//! Built-in agent variants
//!
//! Tag-and-dispatch implementations of the platform's core agents. The
//! heavy domain logic lives outside the coordination core; these
//! variants make deterministic rule-based calls over knowledge-store
//! context so the routing, learning and health paths are exercised
//! end to end.

mod audit_intelligence;
mod regulatory_assessor;
mod transaction_guardian;

pub use audit_intelligence::AuditIntelligenceAgent;
pub use regulatory_assessor::RegulatoryAssessorAgent;
pub use transaction_guardian::TransactionGuardianAgent;

use serde_json::Value;

/// Confidence derived from retrieved context: a base for the rule call
/// plus a bounded contribution from the evidence behind it.
pub(crate) fn evidence_confidence(context_items: &[sentinel_knowledge::QueryResult]) -> f64 {
    if context_items.is_empty() {
        return 0.5;
    }
    let avg: f64 = context_items
        .iter()
        .map(|r| r.entity.confidence_score * r.similarity_score)
        .sum::<f64>()
        / context_items.len() as f64;
    (0.5 + avg / 2.0).clamp(0.0, 1.0)
}

/// Entity ids backing a decision, recorded in the output so feedback can
/// reference them.
pub(crate) fn context_entity_ids(context_items: &[sentinel_knowledge::QueryResult]) -> Vec<Value> {
    context_items
        .iter()
        .map(|r| Value::String(r.entity.entity_id.to_string()))
        .collect()
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::sync::Arc;

    use sentinel_bus::{InMemoryMessageStore, MessageBus, MessageTypeRegistry};
    use sentinel_config::Settings;
    use sentinel_consensus::{ConsensusEngine, InMemoryConsensusStore};
    use sentinel_knowledge::KnowledgeStore;
    use sentinel_mediator::{ConversationMediator, InMemoryConversationStore};

    use crate::agent::AgentDeps;

    pub fn deps() -> AgentDeps {
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
        let knowledge =
            Arc::new(KnowledgeStore::new_in_memory(settings.knowledge.clone()).unwrap());
        AgentDeps {
            bus,
            mediator,
            consensus,
            knowledge,
        }
    }
}
