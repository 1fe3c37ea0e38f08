//! Multi-agent conversation mediation
//!
//! The mediator owns conversation lifecycles: it drives the state
//! machine, enforces turn-taking, derives message history from bus rows
//! carrying a `conversation_id`, detects conflicts among responses, and
//! applies resolution strategies, routing the voting strategies through
//! the consensus engine.

pub mod conflict;
pub mod context;
pub mod mediator;
pub mod memory;
pub mod resolution;

pub use conflict::{detect_conflicts, latest_stances, Stance};
pub use context::{ConversationContext, ConversationEvent};
pub use mediator::{ConversationMediator, ConversationMessage, MediatorRunner};
pub use memory::InMemoryConversationStore;
pub use resolution::default_strategy;

use thiserror::Error;

/// Mediator errors.
#[derive(Error, Debug)]
pub enum MediatorError {
    #[error("conversation not found: {0}")]
    ConversationNotFound(uuid::Uuid),

    #[error("conflict not found: {0}")]
    ConflictNotFound(uuid::Uuid),

    #[error("conversation is in terminal state {0}")]
    Terminal(&'static str),

    #[error("{0} is not a conversation participant")]
    NotParticipant(String),

    #[error("participant {0} already present")]
    DuplicateParticipant(String),

    #[error("invalid conversation: {0}")]
    Invalid(String),

    #[error("manual override requires a decision")]
    OverrideWithoutDecision,
}

impl From<MediatorError> for sentinel_core::Error {
    fn from(err: MediatorError) -> Self {
        match err {
            MediatorError::ConversationNotFound(id) | MediatorError::ConflictNotFound(id) => {
                sentinel_core::Error::NotFound(id.to_string())
            }
            MediatorError::Terminal(_) | MediatorError::DuplicateParticipant(_) => {
                sentinel_core::Error::StateConflict(err.to_string())
            }
            MediatorError::NotParticipant(_)
            | MediatorError::Invalid(_)
            | MediatorError::OverrideWithoutDecision => {
                sentinel_core::Error::InvalidInput(err.to_string())
            }
        }
    }
}
