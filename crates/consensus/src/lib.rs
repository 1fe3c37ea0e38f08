//! Multi-round weighted voting engine
//!
//! A consensus session collects one opinion per participant per round and
//! evaluates the configured algorithm when the round ends. Sessions
//! auto-advance on round timeout and terminate in `completed` or
//! `deadlock` once `max_rounds` is exhausted.

pub mod algorithms;
pub mod engine;
pub mod memory;

pub use algorithms::{evaluate_round, RoundEvaluation};
pub use engine::ConsensusEngine;
pub use memory::InMemoryConsensusStore;

use thiserror::Error;

/// Consensus engine errors.
#[derive(Error, Debug)]
pub enum ConsensusError {
    #[error("consensus session not found: {0}")]
    SessionNotFound(uuid::Uuid),

    #[error("opinion submitted for round {submitted} but round {current} is current")]
    StaleRound { submitted: u32, current: u32 },

    #[error("no round is open")]
    RoundNotOpen,

    #[error("{0} already voted in this round")]
    AlreadyVoted(String),

    #[error("{0} is not a session participant")]
    NotParticipant(String),

    #[error("justification required but reasoning is empty")]
    JustificationRequired,

    #[error("invalid session config: {0}")]
    InvalidConfig(String),

    #[error("session is terminal")]
    Terminal,
}

impl From<ConsensusError> for sentinel_core::Error {
    fn from(err: ConsensusError) -> Self {
        match err {
            ConsensusError::SessionNotFound(id) => sentinel_core::Error::NotFound(id.to_string()),
            ConsensusError::StaleRound { .. }
            | ConsensusError::RoundNotOpen
            | ConsensusError::AlreadyVoted(_)
            | ConsensusError::Terminal => sentinel_core::Error::StateConflict(err.to_string()),
            ConsensusError::NotParticipant(_)
            | ConsensusError::JustificationRequired
            | ConsensusError::InvalidConfig(_) => {
                sentinel_core::Error::InvalidInput(err.to_string())
            }
        }
    }
}
