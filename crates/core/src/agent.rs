//! Agent decision and feedback types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::knowledge::KnowledgeDomain;

/// Built-in agent variants. The orchestrator registry is keyed by the
/// string tag, so deployments can register additional variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    TransactionGuardian,
    RegulatoryAssessor,
    AuditIntelligence,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransactionGuardian => "transaction_guardian",
            Self::RegulatoryAssessor => "regulatory_assessor",
            Self::AuditIntelligence => "audit_intelligence",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "transaction_guardian" => Some(Self::TransactionGuardian),
            "regulatory_assessor" => Some(Self::RegulatoryAssessor),
            "audit_intelligence" => Some(Self::AuditIntelligence),
            _ => None,
        }
    }

    pub fn all() -> [AgentKind; 3] {
        [
            Self::TransactionGuardian,
            Self::RegulatoryAssessor,
            Self::AuditIntelligence,
        ]
    }
}

/// How urgently a decision should be acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// Input to `Agent::handle_decision`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionContext {
    pub context_id: Uuid,
    pub agent_type: String,
    pub payload: Value,
    pub domain: Option<KnowledgeDomain>,
    pub conversation_id: Option<Uuid>,
    pub received_at: DateTime<Utc>,
}

impl DecisionContext {
    pub fn new(agent_type: impl Into<String>, payload: Value) -> Self {
        Self {
            context_id: Uuid::new_v4(),
            agent_type: agent_type.into(),
            payload,
            domain: None,
            conversation_id: None,
            received_at: Utc::now(),
        }
    }

    pub fn with_domain(mut self, domain: KnowledgeDomain) -> Self {
        self.domain = Some(domain);
        self
    }

    pub fn with_conversation(mut self, conversation_id: Uuid) -> Self {
        self.conversation_id = Some(conversation_id);
        self
    }
}

/// Output of `Agent::handle_decision`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDecision {
    pub decision_id: Uuid,
    pub agent_id: String,
    pub decision_type: String,
    pub urgency: Urgency,
    /// Confidence in [0, 1].
    pub confidence: f64,
    pub reasoning: String,
    pub recommended_actions: Vec<String>,
    pub input_context: Value,
    pub output: Value,
    pub timestamp: DateTime<Utc>,
    pub requires_human_review: bool,
}

impl AgentDecision {
    pub fn new(agent_id: impl Into<String>, decision_type: impl Into<String>) -> Self {
        Self {
            decision_id: Uuid::new_v4(),
            agent_id: agent_id.into(),
            decision_type: decision_type.into(),
            urgency: Urgency::Medium,
            confidence: 0.0,
            reasoning: String::new(),
            recommended_actions: Vec::new(),
            input_context: Value::Null,
            output: Value::Null,
            timestamp: Utc::now(),
            requires_human_review: false,
        }
    }

    /// Best-effort fallback used when no agent can serve the request.
    /// Zero confidence, always routed to a human.
    pub fn degraded(agent_type: &str, reason: impl Into<String>) -> Self {
        let mut decision = Self::new(agent_type, "degraded_fallback");
        decision.confidence = 0.0;
        decision.urgency = Urgency::High;
        decision.reasoning = reason.into();
        decision.requires_human_review = true;
        decision
    }
}

/// Source of a feedback signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackType {
    HumanReview,
    Outcome,
    Automated,
}

impl FeedbackType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HumanReview => "human_review",
            Self::Outcome => "outcome",
            Self::Automated => "automated",
        }
    }
}

/// Post-hoc signal about a completed decision, used to adjust the
/// confidence of the knowledge entities that informed it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningFeedback {
    pub decision_id: Uuid,
    /// Signed score; positive reinforces, negative penalizes.
    pub score: f64,
    pub feedback_type: FeedbackType,
    pub applied_entity_ids: Vec<Uuid>,
    pub observed_at: DateTime<Utc>,
}

impl LearningFeedback {
    pub fn new(decision_id: Uuid, score: f64, feedback_type: FeedbackType) -> Self {
        Self {
            decision_id,
            score,
            feedback_type,
            applied_entity_ids: Vec::new(),
            observed_at: Utc::now(),
        }
    }

    pub fn with_entities(mut self, entity_ids: Vec<Uuid>) -> Self {
        self.applied_entity_ids = entity_ids;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degraded_decision_contract() {
        let decision = AgentDecision::degraded("transaction_guardian", "agent unavailable");
        assert_eq!(decision.confidence, 0.0);
        assert!(decision.requires_human_review);
    }

    #[test]
    fn test_urgency_ordering() {
        assert!(Urgency::Low < Urgency::Critical);
    }

    #[test]
    fn test_agent_kind_round_trip() {
        for kind in AgentKind::all() {
            assert_eq!(AgentKind::parse(kind.as_str()), Some(kind));
        }
    }
}
