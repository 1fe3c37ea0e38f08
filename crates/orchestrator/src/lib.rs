//! Agent orchestration
//!
//! Owns agent lifecycles, routes decision requests to the agent keyed by
//! type, threads the bus/mediator/consensus/knowledge handles to agents,
//! and propagates decision feedback into the learning paths.

pub mod agent;
pub mod agents;
pub mod orchestrator;

pub use agent::{Agent, AgentDeps, AgentFactory};
pub use agents::{AuditIntelligenceAgent, RegulatoryAssessorAgent, TransactionGuardianAgent};
pub use orchestrator::AgentOrchestrator;

use thiserror::Error;

/// Orchestrator errors.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("no agent registered for type {0}")]
    UnknownAgentType(String),

    #[error("agent {0} unavailable")]
    AgentUnavailable(String),

    #[error("decision not found: {0}")]
    DecisionNotFound(uuid::Uuid),

    #[error("initialization failed: {0}")]
    InitFailed(String),
}

impl From<OrchestratorError> for sentinel_core::Error {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::UnknownAgentType(t) => sentinel_core::Error::InvalidType(t),
            OrchestratorError::AgentUnavailable(_) | OrchestratorError::InitFailed(_) => {
                sentinel_core::Error::Unavailable(err.to_string())
            }
            OrchestratorError::DecisionNotFound(id) => {
                sentinel_core::Error::NotFound(id.to_string())
            }
        }
    }
}
