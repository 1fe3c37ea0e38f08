//! Agent capability seam
//!
//! An agent is an autonomous decision component. Implementations receive
//! their collaborators (`AgentDeps`) at construction, never a handle back
//! to the orchestrator; anything an agent wants the platform to know
//! goes out as a bus event.

use async_trait::async_trait;
use std::sync::Arc;

use sentinel_bus::MessageBus;
use sentinel_consensus::ConsensusEngine;
use sentinel_core::{AgentDecision, DecisionContext, LearningFeedback, Result};
use sentinel_knowledge::KnowledgeStore;
use sentinel_mediator::ConversationMediator;

/// Capability-bound references handed to agents at construction.
#[derive(Clone)]
pub struct AgentDeps {
    pub bus: Arc<MessageBus>,
    pub mediator: ConversationMediator,
    pub consensus: ConsensusEngine,
    pub knowledge: Arc<KnowledgeStore>,
}

/// Core agent capability set.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Stable identity, unique per instance.
    fn agent_id(&self) -> &str;

    /// Dispatch tag this agent serves (`transaction_guardian`, ...).
    fn agent_type(&self) -> &str;

    /// Warm caches, verify dependencies. Called once before first use.
    async fn initialize(&self) -> Result<()>;

    async fn shutdown(&self) -> Result<()>;

    /// Produce a decision for the given context.
    async fn handle_decision(&self, context: DecisionContext) -> Result<AgentDecision>;

    /// Optional learning hook; default drops the signal.
    async fn receive_feedback(&self, _feedback: &LearningFeedback) -> Result<()> {
        Ok(())
    }
}

/// Constructor used by lazy and eager initialization.
pub type AgentFactory = Arc<dyn Fn(AgentDeps) -> Arc<dyn Agent> + Send + Sync>;
