//! Agent orchestrator
//!
//! Binds the bus, mediator, consensus engine and knowledge store, owns
//! agent instances, routes decision requests by type tag, and feeds
//! decision feedback back into the learning paths.

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use sentinel_config::{InitStrategy, OrchestratorConfig};
use sentinel_core::{
    AgentDecision, ComponentHealth, DecisionContext, LearningFeedback, OutboundMessage, Result,
    SystemHealth,
};

use crate::agent::{Agent, AgentDeps, AgentFactory};
use crate::agents::{AuditIntelligenceAgent, RegulatoryAssessorAgent, TransactionGuardianAgent};
use crate::OrchestratorError;

/// The agent orchestrator.
pub struct AgentOrchestrator {
    deps: AgentDeps,
    config: OrchestratorConfig,
    factories: DashMap<String, AgentFactory>,
    /// Instantiated agents keyed by type tag.
    agents: DashMap<String, Arc<dyn Agent>>,
    /// Decisions issued this process, for feedback routing.
    decisions: DashMap<Uuid, AgentDecision>,
    /// Components that failed initialization in non-fail-fast mode.
    degraded: RwLock<Vec<(String, String)>>,
}

impl AgentOrchestrator {
    pub fn new(deps: AgentDeps, config: OrchestratorConfig) -> Self {
        let orchestrator = Self {
            deps,
            config,
            factories: DashMap::new(),
            agents: DashMap::new(),
            decisions: DashMap::new(),
            degraded: RwLock::new(Vec::new()),
        };
        orchestrator.register_builtin_factories();
        orchestrator
    }

    fn register_builtin_factories(&self) {
        self.register_factory(
            sentinel_core::AgentKind::TransactionGuardian.as_str(),
            Arc::new(|deps| Arc::new(TransactionGuardianAgent::new(deps))),
        );
        self.register_factory(
            sentinel_core::AgentKind::RegulatoryAssessor.as_str(),
            Arc::new(|deps| Arc::new(RegulatoryAssessorAgent::new(deps))),
        );
        self.register_factory(
            sentinel_core::AgentKind::AuditIntelligence.as_str(),
            Arc::new(|deps| Arc::new(AuditIntelligenceAgent::new(deps))),
        );
    }

    /// Register a factory for a type tag; used by lazy and eager init.
    pub fn register_factory(&self, agent_type: impl Into<String>, factory: AgentFactory) {
        self.factories.insert(agent_type.into(), factory);
    }

    /// Inject a ready agent instance (the `custom` init strategy).
    pub fn register_agent(&self, agent: Arc<dyn Agent>) {
        self.agents.insert(agent.agent_type().to_string(), agent);
    }

    /// Initialize per the configured strategy.
    pub async fn initialize(&self) -> Result<()> {
        match self.config.init_strategy {
            InitStrategy::Lazy => Ok(()),
            InitStrategy::Eager => {
                let types: Vec<String> =
                    self.factories.iter().map(|e| e.key().clone()).collect();
                for agent_type in types {
                    if let Err(e) = self.instantiate(&agent_type).await {
                        if self.config.fail_fast {
                            return Err(OrchestratorError::InitFailed(format!(
                                "{agent_type}: {e}"
                            ))
                            .into());
                        }
                        tracing::warn!(agent_type = %agent_type, error = %e, "agent init failed, continuing degraded");
                        self.degraded
                            .write()
                            .push((agent_type.clone(), e.to_string()));
                    }
                }
                Ok(())
            }
            InitStrategy::Custom => {
                for agent in self.agents.iter() {
                    if let Err(e) = agent.value().initialize().await {
                        if self.config.fail_fast {
                            return Err(OrchestratorError::InitFailed(format!(
                                "{}: {e}",
                                agent.key()
                            ))
                            .into());
                        }
                        self.degraded
                            .write()
                            .push((agent.key().clone(), e.to_string()));
                    }
                }
                Ok(())
            }
        }
    }

    async fn instantiate(&self, agent_type: &str) -> Result<Arc<dyn Agent>> {
        let factory = self
            .factories
            .get(agent_type)
            .map(|f| f.value().clone())
            .ok_or_else(|| OrchestratorError::UnknownAgentType(agent_type.to_string()))?;
        let agent = factory(self.deps.clone());
        agent.initialize().await?;
        self.agents.insert(agent_type.to_string(), agent.clone());
        tracing::info!(agent_type = %agent_type, agent_id = %agent.agent_id(), "agent instantiated");
        Ok(agent)
    }

    async fn agent_for(&self, agent_type: &str) -> Result<Arc<dyn Agent>> {
        if let Some(agent) = self.agents.get(agent_type) {
            return Ok(agent.value().clone());
        }
        if self.config.init_strategy == InitStrategy::Lazy && self.factories.contains_key(agent_type)
        {
            return self.instantiate(agent_type).await;
        }
        Err(OrchestratorError::AgentUnavailable(agent_type.to_string()).into())
    }

    /// Route a decision request to the agent keyed by `agent_type`.
    ///
    /// With `fail_fast` unset, an unavailable agent yields a best-effort
    /// fallback decision (`confidence = 0`, human review required)
    /// instead of an error.
    pub async fn make_decision(&self, agent_type: &str, payload: Value) -> Result<AgentDecision> {
        let agent = match self.agent_for(agent_type).await {
            Ok(agent) => agent,
            Err(e) => {
                if self.config.fail_fast {
                    return Err(e);
                }
                tracing::warn!(agent_type = %agent_type, error = %e, "serving degraded fallback decision");
                let decision =
                    AgentDecision::degraded(agent_type, format!("agent unavailable: {e}"));
                self.decisions.insert(decision.decision_id, decision.clone());
                return Ok(decision);
            }
        };

        let context = DecisionContext::new(agent_type, payload);
        let decision = agent.handle_decision(context).await?;
        self.decisions.insert(decision.decision_id, decision.clone());
        metrics::counter!("sentinel_orchestrator_decisions_total").increment(1);
        tracing::info!(
            agent_type = %agent_type,
            decision_id = %decision.decision_id,
            decision_type = %decision.decision_type,
            confidence = decision.confidence,
            human_review = decision.requires_human_review,
            "decision issued"
        );
        Ok(decision)
    }

    /// Look up an issued decision.
    pub fn decision(&self, decision_id: Uuid) -> Option<AgentDecision> {
        self.decisions.get(&decision_id).map(|d| d.value().clone())
    }

    /// Propagate feedback on a completed decision: adjust the knowledge
    /// entities that informed it, notify the deciding agent, and emit a
    /// `decision_feedback` bus event.
    pub async fn incorporate_feedback(&self, feedback: LearningFeedback) -> Result<bool> {
        let mut feedback = feedback;
        let decision = self.decisions.get(&feedback.decision_id).map(|d| d.value().clone());

        // Fall back to the entity ids the decision recorded.
        if feedback.applied_entity_ids.is_empty() {
            if let Some(decision) = &decision {
                if let Some(ids) = decision.output.get("context_entity_ids").and_then(Value::as_array)
                {
                    feedback.applied_entity_ids = ids
                        .iter()
                        .filter_map(Value::as_str)
                        .filter_map(|s| Uuid::parse_str(s).ok())
                        .collect();
                }
            }
        }

        self.deps
            .knowledge
            .update_knowledge_from_feedback(&feedback)
            .await?;

        if let Some(decision) = &decision {
            let agent_type = decision.agent_id.split(':').next().unwrap_or("");
            if let Some(agent) = self.agents.get(agent_type) {
                agent.value().receive_feedback(&feedback).await?;
            }
        }

        self.deps
            .bus
            .broadcast(
                OutboundMessage::broadcast(
                    "orchestrator",
                    "decision_feedback",
                    json!({
                        "decision_id": feedback.decision_id.to_string(),
                        "score": feedback.score,
                        "feedback_type": feedback.feedback_type.as_str(),
                    }),
                ),
                &[],
            )
            .await?;

        tracing::info!(
            decision_id = %feedback.decision_id,
            score = feedback.score,
            entities = feedback.applied_entity_ids.len(),
            "feedback incorporated"
        );
        Ok(true)
    }

    /// Aggregate component and per-agent health.
    pub async fn get_system_health(&self) -> Result<SystemHealth> {
        let mut components: BTreeMap<String, ComponentHealth> = BTreeMap::new();

        let bus_stats = match self.deps.bus.stats().await {
            Ok(stats) => {
                components.insert("message_bus".to_string(), ComponentHealth::ready());
                Some(stats)
            }
            Err(e) => {
                components.insert("message_bus".to_string(), ComponentHealth::failed(e.to_string()));
                None
            }
        };
        components.insert("conversation_mediator".to_string(), ComponentHealth::ready());
        components.insert("consensus_engine".to_string(), ComponentHealth::ready());
        components.insert("knowledge_store".to_string(), ComponentHealth::ready());

        for agent in self.agents.iter() {
            components.insert(
                format!("agent:{}", agent.key()),
                ComponentHealth::ready(),
            );
        }
        for (agent_type, error) in self.degraded.read().iter() {
            components.insert(
                format!("agent:{agent_type}"),
                ComponentHealth::degraded(error.clone()),
            );
        }

        let cache = self.deps.knowledge.cache_stats();
        let metrics = json!({
            "bus": bus_stats,
            "embedding_cache": {
                "hits": cache.hits,
                "misses": cache.misses,
                "entries": cache.entries,
            },
            "conversations_active": self.deps.mediator.active_conversations().len(),
            "decisions_issued": self.decisions.len(),
            "checked_at": Utc::now(),
        });

        Ok(SystemHealth::aggregate(components, metrics))
    }

    /// Shut every instantiated agent down and drop it.
    pub async fn shutdown(&self) -> Result<()> {
        let types: Vec<String> = self.agents.iter().map(|e| e.key().clone()).collect();
        for agent_type in types {
            if let Some((_, agent)) = self.agents.remove(&agent_type) {
                if let Err(e) = agent.shutdown().await {
                    tracing::warn!(agent_type = %agent_type, error = %e, "agent shutdown failed");
                }
            }
        }
        tracing::info!("orchestrator shut down");
        Ok(())
    }

    pub fn deps(&self) -> &AgentDeps {
        &self.deps
    }
}
