//! Regulatory assessor agent
//!
//! Gauges the impact of a regulatory change by how strongly it overlaps
//! the stored rule base.

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use sentinel_core::{
    AgentDecision, AgentKind, DecisionContext, Error, KnowledgeDomain, Result, Urgency,
};
use sentinel_knowledge::SemanticQuery;

use crate::agent::{Agent, AgentDeps};
use crate::agents::{context_entity_ids, evidence_confidence};

pub struct RegulatoryAssessorAgent {
    agent_id: String,
    deps: AgentDeps,
}

impl RegulatoryAssessorAgent {
    pub fn new(deps: AgentDeps) -> Self {
        Self {
            agent_id: format!("{}:{}", AgentKind::RegulatoryAssessor.as_str(), Uuid::new_v4()),
            deps,
        }
    }
}

#[async_trait]
impl Agent for RegulatoryAssessorAgent {
    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    fn agent_type(&self) -> &str {
        AgentKind::RegulatoryAssessor.as_str()
    }

    async fn initialize(&self) -> Result<()> {
        tracing::debug!(agent_id = %self.agent_id, "regulatory assessor initialized");
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    async fn handle_decision(&self, context: DecisionContext) -> Result<AgentDecision> {
        let regulation = context
            .payload
            .get("regulation")
            .ok_or_else(|| Error::InvalidInput("missing regulation".into()))?;
        let title = regulation
            .get("title")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidInput("missing regulation.title".into()))?;
        let summary = regulation
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or("");

        let affected = self
            .deps
            .knowledge
            .semantic_search(
                SemanticQuery::new(format!("{title} {summary}"))
                    .in_domain(KnowledgeDomain::RegulatoryCompliance)
                    .with_threshold(0.55)
                    .limit(10),
            )
            .await?;

        let strong_overlap = affected
            .iter()
            .filter(|r| r.similarity_score >= 0.7)
            .count();
        let impact = if strong_overlap >= 3 {
            "high"
        } else if !affected.is_empty() {
            "medium"
        } else {
            "low"
        };

        let mut decision = AgentDecision::new(&self.agent_id, "regulatory_impact_assessment");
        decision.urgency = match impact {
            "high" => Urgency::High,
            "medium" => Urgency::Medium,
            _ => Urgency::Low,
        };
        decision.confidence = evidence_confidence(&affected);
        decision.reasoning = format!(
            "{} stored rules overlap the change, {} strongly",
            affected.len(),
            strong_overlap
        );
        decision.recommended_actions = match impact {
            "high" => vec![
                "open remediation workstream".to_string(),
                "notify compliance officers".to_string(),
            ],
            "medium" => vec!["schedule gap analysis".to_string()],
            _ => vec!["archive for monitoring".to_string()],
        };
        decision.input_context = context.payload.clone();
        decision.output = json!({
            "impact": impact,
            "affected_rules": affected.len(),
            "context_entity_ids": context_entity_ids(&affected),
        });
        decision.requires_human_review = impact == "high";
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testutil;
    use sentinel_core::{KnowledgeEntity, KnowledgeType};

    #[tokio::test]
    async fn test_unmatched_regulation_is_low_impact() {
        let agent = RegulatoryAssessorAgent::new(testutil::deps());
        let decision = agent
            .handle_decision(DecisionContext::new(
                agent.agent_type(),
                json!({"regulation": {"title": "Maritime fuel levy", "summary": "port fees"}}),
            ))
            .await
            .unwrap();
        assert_eq!(decision.output["impact"], "low");
        assert!(!decision.requires_human_review);
    }

    #[tokio::test]
    async fn test_overlapping_rules_raise_impact() {
        let deps = testutil::deps();
        for i in 0..3 {
            deps.knowledge
                .store_entity(
                    KnowledgeEntity::new(
                        KnowledgeDomain::RegulatoryCompliance,
                        KnowledgeType::Rule,
                        format!("Customer due diligence rule {i}"),
                        "customer due diligence verification requirements for onboarding",
                    )
                    .with_confidence(0.9),
                )
                .await
                .unwrap();
        }

        let agent = RegulatoryAssessorAgent::new(deps);
        let decision = agent
            .handle_decision(DecisionContext::new(
                agent.agent_type(),
                json!({"regulation": {
                    "title": "Customer due diligence amendment",
                    "summary": "expanded verification requirements for customer onboarding",
                }}),
            ))
            .await
            .unwrap();
        assert_ne!(decision.output["impact"], "low");
        assert!(decision.output["affected_rules"].as_u64().unwrap() >= 1);
    }

    #[tokio::test]
    async fn test_missing_title_is_invalid() {
        let agent = RegulatoryAssessorAgent::new(testutil::deps());
        let err = agent
            .handle_decision(DecisionContext::new(
                agent.agent_type(),
                json!({"regulation": {"summary": "no title"}}),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
