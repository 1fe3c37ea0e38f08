//! Audit intelligence agent
//!
//! Scores an event batch for anomalies: severity mix and per-actor
//! concentration, weighed against stored audit patterns.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use uuid::Uuid;

use sentinel_core::{
    AgentDecision, AgentKind, DecisionContext, Error, KnowledgeDomain, Result, Urgency,
};

use crate::agent::{Agent, AgentDeps};
use crate::agents::{context_entity_ids, evidence_confidence};

/// Events by one actor in a batch before they count as concentration.
const ACTOR_CONCENTRATION_THRESHOLD: usize = 3;

pub struct AuditIntelligenceAgent {
    agent_id: String,
    deps: AgentDeps,
}

impl AuditIntelligenceAgent {
    pub fn new(deps: AgentDeps) -> Self {
        Self {
            agent_id: format!("{}:{}", AgentKind::AuditIntelligence.as_str(), Uuid::new_v4()),
            deps,
        }
    }
}

#[async_trait]
impl Agent for AuditIntelligenceAgent {
    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    fn agent_type(&self) -> &str {
        AgentKind::AuditIntelligence.as_str()
    }

    async fn initialize(&self) -> Result<()> {
        tracing::debug!(agent_id = %self.agent_id, "audit intelligence initialized");
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    async fn handle_decision(&self, context: DecisionContext) -> Result<AgentDecision> {
        let events = context
            .payload
            .get("events")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::InvalidInput("missing events array".into()))?;
        if events.is_empty() {
            return Err(Error::InvalidInput("events array is empty".into()));
        }

        let mut high_severity = 0usize;
        let mut by_actor: HashMap<&str, usize> = HashMap::new();
        let mut actions: Vec<&str> = Vec::new();
        for event in events {
            if event.get("severity").and_then(Value::as_str) == Some("high") {
                high_severity += 1;
            }
            if let Some(actor) = event.get("actor").and_then(Value::as_str) {
                *by_actor.entry(actor).or_insert(0) += 1;
            }
            if let Some(action) = event.get("action").and_then(Value::as_str) {
                actions.push(action);
            }
        }

        let mut flagged_actors: Vec<String> = by_actor
            .iter()
            .filter(|(_, count)| **count >= ACTOR_CONCENTRATION_THRESHOLD)
            .map(|(actor, _)| actor.to_string())
            .collect();
        flagged_actors.sort();

        let severity_ratio = high_severity as f64 / events.len() as f64;
        let concentration = if by_actor.is_empty() {
            0.0
        } else {
            flagged_actors.len() as f64 / by_actor.len() as f64
        };
        let anomaly_score = (0.6 * severity_ratio + 0.4 * concentration).clamp(0.0, 1.0);

        let bundle = self
            .deps
            .knowledge
            .get_context_for_decision(
                &format!("audit anomaly {}", actions.join(" ")),
                KnowledgeDomain::AuditIntelligence,
                5,
            )
            .await?;

        let mut decision = AgentDecision::new(&self.agent_id, "audit_anomaly_report");
        decision.urgency = if anomaly_score >= 0.7 {
            Urgency::Critical
        } else if anomaly_score >= 0.4 {
            Urgency::High
        } else if anomaly_score > 0.0 {
            Urgency::Medium
        } else {
            Urgency::Low
        };
        decision.confidence = evidence_confidence(&bundle.items);
        decision.reasoning = format!(
            "{high_severity}/{} high-severity events, {} concentrated actors",
            events.len(),
            flagged_actors.len()
        );
        decision.recommended_actions = if anomaly_score >= 0.4 {
            vec![
                "open audit case".to_string(),
                "preserve event evidence".to_string(),
            ]
        } else {
            vec!["log batch in audit trail".to_string()]
        };
        decision.input_context = context.payload.clone();
        decision.output = json!({
            "anomaly_score": anomaly_score,
            "flagged_actors": flagged_actors,
            "context_entity_ids": context_entity_ids(&bundle.items),
        });
        decision.requires_human_review = anomaly_score >= 0.4;
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testutil;

    #[tokio::test]
    async fn test_quiet_batch_scores_low() {
        let agent = AuditIntelligenceAgent::new(testutil::deps());
        let decision = agent
            .handle_decision(DecisionContext::new(
                agent.agent_type(),
                json!({"events": [
                    {"actor": "a", "action": "login", "severity": "low"},
                    {"actor": "b", "action": "export", "severity": "low"},
                ]}),
            ))
            .await
            .unwrap();
        assert_eq!(decision.output["anomaly_score"], 0.0);
        assert!(!decision.requires_human_review);
    }

    #[tokio::test]
    async fn test_concentrated_high_severity_flags() {
        let agent = AuditIntelligenceAgent::new(testutil::deps());
        let decision = agent
            .handle_decision(DecisionContext::new(
                agent.agent_type(),
                json!({"events": [
                    {"actor": "mallory", "action": "export", "severity": "high"},
                    {"actor": "mallory", "action": "export", "severity": "high"},
                    {"actor": "mallory", "action": "delete", "severity": "high"},
                ]}),
            ))
            .await
            .unwrap();
        let score = decision.output["anomaly_score"].as_f64().unwrap();
        assert!(score >= 0.7);
        assert_eq!(decision.output["flagged_actors"][0], "mallory");
        assert!(decision.requires_human_review);
        assert_eq!(decision.urgency, Urgency::Critical);
    }

    #[tokio::test]
    async fn test_empty_events_rejected() {
        let agent = AuditIntelligenceAgent::new(testutil::deps());
        let err = agent
            .handle_decision(DecisionContext::new(
                agent.agent_type(),
                json!({"events": []}),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
