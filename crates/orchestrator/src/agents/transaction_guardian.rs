//! Transaction guardian agent
//!
//! Screens transactions against retrieved monitoring knowledge:
//! sanctioned counterparties block, large amounts go to review.

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use sentinel_core::{
    AgentDecision, AgentKind, DecisionContext, Error, KnowledgeDomain, Result, Urgency,
};

use crate::agent::{Agent, AgentDeps};
use crate::agents::{context_entity_ids, evidence_confidence};

/// Review threshold for single-transaction amounts.
const AMOUNT_REVIEW_THRESHOLD: f64 = 10_000.0;

pub struct TransactionGuardianAgent {
    agent_id: String,
    deps: AgentDeps,
}

impl TransactionGuardianAgent {
    pub fn new(deps: AgentDeps) -> Self {
        Self {
            agent_id: format!("{}:{}", AgentKind::TransactionGuardian.as_str(), Uuid::new_v4()),
            deps,
        }
    }
}

#[async_trait]
impl Agent for TransactionGuardianAgent {
    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    fn agent_type(&self) -> &str {
        AgentKind::TransactionGuardian.as_str()
    }

    async fn initialize(&self) -> Result<()> {
        tracing::debug!(agent_id = %self.agent_id, "transaction guardian initialized");
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    async fn handle_decision(&self, context: DecisionContext) -> Result<AgentDecision> {
        let transaction = context
            .payload
            .get("transaction")
            .ok_or_else(|| Error::InvalidInput("missing transaction".into()))?;
        let amount = transaction
            .get("amount")
            .and_then(Value::as_f64)
            .ok_or_else(|| Error::InvalidInput("missing transaction.amount".into()))?;
        let counterparty = transaction
            .get("counterparty")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let currency = transaction
            .get("currency")
            .and_then(Value::as_str)
            .unwrap_or("USD");

        let bundle = self
            .deps
            .knowledge
            .get_context_for_decision(
                &format!("transaction {counterparty} {currency} monitoring"),
                KnowledgeDomain::TransactionMonitoring,
                5,
            )
            .await?;

        let mut risk: f64 = 0.0;
        let mut reasons: Vec<String> = Vec::new();

        if amount >= AMOUNT_REVIEW_THRESHOLD {
            risk += 0.4;
            reasons.push(format!("amount {amount} exceeds review threshold"));
        }
        let sanctioned = !counterparty.is_empty()
            && bundle.items.iter().any(|r| {
                r.entity.tags.iter().any(|t| t == "sanctions")
                    && r.entity
                        .content
                        .to_lowercase()
                        .contains(&counterparty.to_lowercase())
            });
        if sanctioned {
            risk += 0.6;
            reasons.push(format!("counterparty {counterparty} matches sanctions knowledge"));
        }
        if reasons.is_empty() {
            reasons.push("no monitoring rule triggered".to_string());
        }

        let verdict = if sanctioned {
            "block"
        } else if risk >= 0.4 {
            "review"
        } else {
            "allow"
        };
        let urgency = if risk >= 0.8 {
            Urgency::Critical
        } else if risk >= 0.5 {
            Urgency::High
        } else if risk >= 0.3 {
            Urgency::Medium
        } else {
            Urgency::Low
        };

        let mut decision = AgentDecision::new(&self.agent_id, "transaction_assessment");
        decision.urgency = urgency;
        decision.confidence = evidence_confidence(&bundle.items);
        decision.reasoning = reasons.join("; ");
        decision.recommended_actions = match verdict {
            "block" => vec![
                "freeze transaction".to_string(),
                "file sanctions alert".to_string(),
            ],
            "review" => vec!["queue for analyst review".to_string()],
            _ => vec!["release transaction".to_string()],
        };
        decision.input_context = context.payload.clone();
        decision.output = json!({
            "verdict": verdict,
            "risk_score": risk,
            "context_entity_ids": context_entity_ids(&bundle.items),
            "decision_patterns": bundle.decision_patterns,
        });
        decision.requires_human_review = verdict != "allow";
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testutil;
    use sentinel_core::{KnowledgeEntity, KnowledgeType};

    #[tokio::test]
    async fn test_small_clean_transaction_allowed() {
        let agent = TransactionGuardianAgent::new(testutil::deps());
        let decision = agent
            .handle_decision(DecisionContext::new(
                agent.agent_type(),
                json!({"transaction": {"amount": 250.0, "counterparty": "Acme GmbH"}}),
            ))
            .await
            .unwrap();
        assert_eq!(decision.output["verdict"], "allow");
        assert!(!decision.requires_human_review);
        assert_eq!(decision.urgency, Urgency::Low);
    }

    #[tokio::test]
    async fn test_large_amount_goes_to_review() {
        let agent = TransactionGuardianAgent::new(testutil::deps());
        let decision = agent
            .handle_decision(DecisionContext::new(
                agent.agent_type(),
                json!({"transaction": {"amount": 50_000.0, "counterparty": "Acme GmbH"}}),
            ))
            .await
            .unwrap();
        assert_eq!(decision.output["verdict"], "review");
        assert!(decision.requires_human_review);
    }

    #[tokio::test]
    async fn test_sanctioned_counterparty_blocks() {
        let deps = testutil::deps();
        deps.knowledge
            .store_entity(
                KnowledgeEntity::new(
                    KnowledgeDomain::TransactionMonitoring,
                    KnowledgeType::Rule,
                    "Sanctioned parties",
                    "Transactions involving Volga Trading LLC are prohibited",
                )
                .with_tags(["sanctions"])
                .with_confidence(0.95),
            )
            .await
            .unwrap();

        let agent = TransactionGuardianAgent::new(deps);
        let decision = agent
            .handle_decision(DecisionContext::new(
                agent.agent_type(),
                json!({"transaction": {"amount": 900.0, "counterparty": "Volga Trading LLC"}}),
            ))
            .await
            .unwrap();
        assert_eq!(decision.output["verdict"], "block");
        assert!(decision.requires_human_review);
        assert!(decision.urgency >= Urgency::High);
        assert!(!decision.output["context_entity_ids"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_amount_is_invalid() {
        let agent = TransactionGuardianAgent::new(testutil::deps());
        let err = agent
            .handle_decision(DecisionContext::new(
                agent.agent_type(),
                json!({"transaction": {"counterparty": "Acme"}}),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
