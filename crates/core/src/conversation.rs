//! Conversation and conflict types
//!
//! The mediator owns conversations; message history is derived from bus
//! rows carrying a `conversation_id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::knowledge::KnowledgeDomain;

/// Conversation lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    Initializing,
    Active,
    WaitingForResponse,
    ConflictDetected,
    ResolvingConflict,
    ConsensusReached,
    Deadlock,
    Completed,
    Timeout,
    Cancelled,
}

impl ConversationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Active => "active",
            Self::WaitingForResponse => "waiting_for_response",
            Self::ConflictDetected => "conflict_detected",
            Self::ResolvingConflict => "resolving_conflict",
            Self::ConsensusReached => "consensus_reached",
            Self::Deadlock => "deadlock",
            Self::Completed => "completed",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "initializing" => Some(Self::Initializing),
            "active" => Some(Self::Active),
            "waiting_for_response" => Some(Self::WaitingForResponse),
            "conflict_detected" => Some(Self::ConflictDetected),
            "resolving_conflict" => Some(Self::ResolvingConflict),
            "consensus_reached" => Some(Self::ConsensusReached),
            "deadlock" => Some(Self::Deadlock),
            "completed" => Some(Self::Completed),
            "timeout" => Some(Self::Timeout),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Timeout | Self::Cancelled | Self::ConsensusReached | Self::Deadlock
        )
    }

    /// Legal transitions of the conversation state machine.
    pub fn can_transition_to(&self, next: ConversationState) -> bool {
        use ConversationState::*;
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (Initializing, Active) => true,
            (Active, WaitingForResponse) | (WaitingForResponse, Active) => true,
            (Active, ConflictDetected) | (WaitingForResponse, ConflictDetected) => true,
            (ConflictDetected, ResolvingConflict) => true,
            (ResolvingConflict, Active)
            | (ResolvingConflict, ConsensusReached)
            | (ResolvingConflict, Deadlock) => true,
            (Active, Completed) | (Active, Timeout) | (Active, Cancelled) => true,
            (WaitingForResponse, Timeout) | (WaitingForResponse, Cancelled) => true,
            (WaitingForResponse, Completed) => true,
            (Initializing, Cancelled) => true,
            _ => false,
        }
    }
}

/// Role a participant plays in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Initiator,
    Contributor,
    Arbiter,
    Observer,
}

impl ParticipantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiator => "initiator",
            Self::Contributor => "contributor",
            Self::Arbiter => "arbiter",
            Self::Observer => "observer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "initiator" => Some(Self::Initiator),
            "contributor" => Some(Self::Contributor),
            "arbiter" => Some(Self::Arbiter),
            "observer" => Some(Self::Observer),
            _ => None,
        }
    }
}

/// A conversation participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub agent_id: String,
    pub role: ParticipantRole,
    /// Non-negative weight used by expert arbitration and weighted votes.
    pub expertise_weight: f64,
    pub domain_specialty: Option<KnowledgeDomain>,
    pub joined_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

impl Participant {
    pub fn new(agent_id: impl Into<String>, role: ParticipantRole, expertise_weight: f64) -> Self {
        let now = Utc::now();
        Self {
            agent_id: agent_id.into(),
            role,
            expertise_weight: expertise_weight.max(0.0),
            domain_specialty: None,
            joined_at: now,
            last_active: now,
        }
    }

    pub fn with_specialty(mut self, domain: KnowledgeDomain) -> Self {
        self.domain_specialty = Some(domain);
        self
    }
}

/// Detected semantic incompatibility among conversation messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    ContradictoryResponses,
    ResourceConflict,
    PriorityConflict,
    TimingConflict,
    ProtocolMismatch,
    ConsensusFailure,
    ExternalConstraint,
}

impl ConflictType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContradictoryResponses => "contradictory_responses",
            Self::ResourceConflict => "resource_conflict",
            Self::PriorityConflict => "priority_conflict",
            Self::TimingConflict => "timing_conflict",
            Self::ProtocolMismatch => "protocol_mismatch",
            Self::ConsensusFailure => "consensus_failure",
            Self::ExternalConstraint => "external_constraint",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "contradictory_responses" => Some(Self::ContradictoryResponses),
            "resource_conflict" => Some(Self::ResourceConflict),
            "priority_conflict" => Some(Self::PriorityConflict),
            "timing_conflict" => Some(Self::TimingConflict),
            "protocol_mismatch" => Some(Self::ProtocolMismatch),
            "consensus_failure" => Some(Self::ConsensusFailure),
            "external_constraint" => Some(Self::ExternalConstraint),
            _ => None,
        }
    }
}

/// Strategy applied to resolve a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    MajorityVote,
    WeightedVote,
    ExpertArbitration,
    CompromiseNegotiation,
    Escalation,
    ExternalMediation,
    TimeoutAbort,
    ManualOverride,
}

impl ResolutionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MajorityVote => "majority_vote",
            Self::WeightedVote => "weighted_vote",
            Self::ExpertArbitration => "expert_arbitration",
            Self::CompromiseNegotiation => "compromise_negotiation",
            Self::Escalation => "escalation",
            Self::ExternalMediation => "external_mediation",
            Self::TimeoutAbort => "timeout_abort",
            Self::ManualOverride => "manual_override",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "majority_vote" => Some(Self::MajorityVote),
            "weighted_vote" => Some(Self::WeightedVote),
            "expert_arbitration" => Some(Self::ExpertArbitration),
            "compromise_negotiation" => Some(Self::CompromiseNegotiation),
            "escalation" => Some(Self::Escalation),
            "external_mediation" => Some(Self::ExternalMediation),
            "timeout_abort" => Some(Self::TimeoutAbort),
            "manual_override" => Some(Self::ManualOverride),
            _ => None,
        }
    }
}

/// A detected conflict and, once resolved, its outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub conflict_id: Uuid,
    pub conversation_id: Uuid,
    pub conflict_type: ConflictType,
    pub description: String,
    pub involved_agents: Vec<String>,
    pub strategy_used: Option<ResolutionStrategy>,
    pub resolved_successfully: Option<bool>,
    pub resolution_summary: Option<String>,
    pub detected_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Conflict {
    pub fn new(
        conversation_id: Uuid,
        conflict_type: ConflictType,
        description: impl Into<String>,
        involved_agents: Vec<String>,
    ) -> Self {
        Self {
            conflict_id: Uuid::new_v4(),
            conversation_id,
            conflict_type,
            description: description.into(),
            involved_agents,
            strategy_used: None,
            resolved_successfully: None,
            resolution_summary: None,
            detected_at: Utc::now(),
            resolved_at: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

/// Outcome of one mediation pass over a conflict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediationResult {
    pub conversation_id: Uuid,
    pub conflict_id: Uuid,
    pub strategy: ResolutionStrategy,
    pub success: bool,
    pub decision: Option<String>,
    pub agreement_ratio: Option<f64>,
    pub tie_breakers: Vec<String>,
    pub summary: String,
    pub resolved_at: DateTime<Utc>,
}

/// Reason a conversation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    ObjectiveMet,
    Timeout,
    Cancelled,
    ConsensusReached,
    Deadlock,
}

impl EndReason {
    /// Terminal state a conversation lands in for this reason.
    pub fn terminal_state(&self) -> ConversationState {
        match self {
            Self::ObjectiveMet => ConversationState::Completed,
            Self::Timeout => ConversationState::Timeout,
            Self::Cancelled => ConversationState::Cancelled,
            Self::ConsensusReached => ConversationState::ConsensusReached,
            Self::Deadlock => ConversationState::Deadlock,
        }
    }
}

/// Persisted snapshot of a conversation.
///
/// Message history is not part of the snapshot; it is derived from
/// bus rows filtered by `conversation_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSnapshot {
    pub conversation_id: Uuid,
    pub topic: String,
    pub objective: String,
    pub state: ConversationState,
    pub participants: Vec<Participant>,
    pub conflicts: Vec<Conflict>,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub timeout_secs: u64,
    pub metadata: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_are_absorbing() {
        for state in [
            ConversationState::Completed,
            ConversationState::Timeout,
            ConversationState::Cancelled,
            ConversationState::ConsensusReached,
            ConversationState::Deadlock,
        ] {
            assert!(state.is_terminal());
            assert!(!state.can_transition_to(ConversationState::Active));
        }
    }

    #[test]
    fn test_conflict_resolution_path() {
        use ConversationState::*;
        assert!(Active.can_transition_to(ConflictDetected));
        assert!(ConflictDetected.can_transition_to(ResolvingConflict));
        assert!(ResolvingConflict.can_transition_to(Active));
        assert!(ResolvingConflict.can_transition_to(ConsensusReached));
        assert!(ResolvingConflict.can_transition_to(Deadlock));
        assert!(!ConflictDetected.can_transition_to(Completed));
    }

    #[test]
    fn test_turn_taking_is_bidirectional() {
        use ConversationState::*;
        assert!(Active.can_transition_to(WaitingForResponse));
        assert!(WaitingForResponse.can_transition_to(Active));
    }

    #[test]
    fn test_participant_weight_clamped() {
        let p = Participant::new("agent-1", ParticipantRole::Contributor, -2.0);
        assert_eq!(p.expertise_weight, 0.0);
    }
}
