//! Runtime conversation state

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use uuid::Uuid;

use sentinel_core::{
    Conflict, ConversationSnapshot, ConversationState, EndReason, Participant,
};

/// Mutable state of one running conversation. Mutations happen under the
/// mediator's per-conversation mutex.
#[derive(Debug, Clone)]
pub struct ConversationContext {
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
    /// Agents whose response is awaited while `waiting_for_response`.
    pub pending_respondents: Vec<String>,
    /// Deadline for the pending respondents.
    pub turn_deadline: Option<DateTime<Utc>>,
    /// Compromise-negotiation rounds consumed so far.
    pub negotiation_rounds: u32,
}

impl ConversationContext {
    pub fn new(
        topic: impl Into<String>,
        objective: impl Into<String>,
        participants: Vec<Participant>,
        timeout_secs: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            conversation_id: Uuid::new_v4(),
            topic: topic.into(),
            objective: objective.into(),
            state: ConversationState::Initializing,
            participants,
            conflicts: Vec::new(),
            started_at: now,
            last_activity: now,
            timeout_secs,
            metadata: Value::Null,
            pending_respondents: Vec::new(),
            turn_deadline: None,
            negotiation_rounds: 0,
        }
    }

    pub fn participant(&self, agent_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.agent_id == agent_id)
    }

    pub fn is_participant(&self, agent_id: &str) -> bool {
        self.participant(agent_id).is_some()
    }

    pub fn touch(&mut self, agent_id: &str) {
        let now = Utc::now();
        self.last_activity = now;
        if let Some(participant) = self.participants.iter_mut().find(|p| p.agent_id == agent_id) {
            participant.last_active = now;
        }
    }

    pub fn is_inactive(&self, now: DateTime<Utc>) -> bool {
        now - self.last_activity > Duration::seconds(self.timeout_secs as i64)
    }

    pub fn conflict(&self, conflict_id: Uuid) -> Option<&Conflict> {
        self.conflicts.iter().find(|c| c.conflict_id == conflict_id)
    }

    pub fn conflict_mut(&mut self, conflict_id: Uuid) -> Option<&mut Conflict> {
        self.conflicts
            .iter_mut()
            .find(|c| c.conflict_id == conflict_id)
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        ConversationSnapshot {
            conversation_id: self.conversation_id,
            topic: self.topic.clone(),
            objective: self.objective.clone(),
            state: self.state,
            participants: self.participants.clone(),
            conflicts: self.conflicts.clone(),
            started_at: self.started_at,
            last_activity: self.last_activity,
            timeout_secs: self.timeout_secs,
            metadata: self.metadata.clone(),
        }
    }
}

/// Lifecycle events emitted over the mediator's broadcast channel.
#[derive(Debug, Clone)]
pub enum ConversationEvent {
    Started {
        conversation_id: Uuid,
    },
    ParticipantAdded {
        conversation_id: Uuid,
        agent_id: String,
    },
    ParticipantRemoved {
        conversation_id: Uuid,
        agent_id: String,
    },
    MessageSent {
        conversation_id: Uuid,
        message_id: Uuid,
        from: String,
    },
    StateChanged {
        conversation_id: Uuid,
        from: ConversationState,
        to: ConversationState,
    },
    ConflictDetected {
        conversation_id: Uuid,
        conflict_id: Uuid,
        conflict_type: sentinel_core::ConflictType,
    },
    ConflictResolved {
        conversation_id: Uuid,
        conflict_id: Uuid,
        success: bool,
    },
    TurnTimeout {
        conversation_id: Uuid,
        agent_id: String,
    },
    Ended {
        conversation_id: Uuid,
        reason: EndReason,
    },
}
