//! Core types and trait seams for the Sentinel agent coordination core
//!
//! This crate provides foundational types used across all other crates:
//! - The shared error taxonomy (`Error`, `Result`)
//! - Message bus data model (messages, priorities, type descriptors)
//! - Conversation and conflict types
//! - Consensus session types
//! - Knowledge entity and relationship types
//! - Agent decision and feedback types
//! - Component health reporting
//! - Cooperative cancellation
//! - Store trait seams implemented by in-memory and ScyllaDB backends

pub mod agent;
pub mod cancel;
pub mod consensus;
pub mod conversation;
pub mod error;
pub mod health;
pub mod knowledge;
pub mod message;
pub mod traits;

pub use agent::{
    AgentDecision, AgentKind, DecisionContext, FeedbackType, LearningFeedback, Urgency,
};
pub use cancel::{CancelSource, CancelToken};
pub use consensus::{
    ChoiceTally, ConsensusAlgorithm, ConsensusOutcome, ConsensusParticipant, ConsensusResult,
    ConsensusRoundRecord, ConsensusSessionConfig, ConsensusSessionRecord, ConsensusState, Opinion,
};
pub use conversation::{
    Conflict, ConflictType, ConversationSnapshot, ConversationState, EndReason, MediationResult,
    Participant, ParticipantRole, ResolutionStrategy,
};
pub use error::{Error, Result};
pub use health::{ComponentHealth, ComponentStatus, SystemHealth};
pub use knowledge::{
    KnowledgeDomain, KnowledgeEntity, KnowledgeRelationship, KnowledgeType, RetentionPolicy,
};
pub use message::{
    AttemptOutcome, DeliveryAttempt, Message, MessagePriority, MessageStatus,
    MessageTypeDescriptor, OutboundMessage, StatusCounts,
};
pub use traits::{ConsensusStore, ConversationStore, MessageStore};
