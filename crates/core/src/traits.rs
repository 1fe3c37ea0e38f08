//! Store trait seams
//!
//! Each seam is implemented twice: an in-memory store (the default and the
//! test substrate) and a ScyllaDB-backed store in `sentinel-persistence`.
//! The store row is the source of truth for the message bus; workers only
//! act on persisted state.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::consensus::{ConsensusRoundRecord, ConsensusSessionRecord, Opinion};
use crate::conversation::{Conflict, ConversationSnapshot};
use crate::error::Result;
use crate::message::{DeliveryAttempt, Message, StatusCounts};

/// Durable message rows and their per-recipient state transitions.
///
/// Transition methods enforce their own preconditions and return
/// `Error::StateConflict` / `Error::NotFound` when violated, so that the
/// check-and-write is atomic inside the store.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn insert(&self, message: &Message) -> Result<()>;

    /// All-or-nothing insert used by broadcast fan-out.
    async fn insert_batch(&self, messages: &[Message]) -> Result<()>;

    async fn get(&self, message_id: Uuid) -> Result<Option<Message>>;

    /// Claim up to `limit` due pending rows for delivery, highest priority
    /// first, FIFO by `created_at` within a priority class.
    ///
    /// The claim conditionally bumps `next_retry_at` to `now + lease`
    /// while leaving `status = pending`: a crashed worker's batch becomes
    /// claimable again once the lease lapses, preserving at-least-once.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        lease: Duration,
    ) -> Result<Vec<Message>>;

    /// `pending -> delivered`.
    async fn mark_delivered(&self, message_id: Uuid, at: DateTime<Utc>) -> Result<()>;

    /// `delivered -> acknowledged`, recipient-checked. Idempotent: a second
    /// acknowledgement of the same row succeeds without a state change.
    async fn acknowledge(&self, message_id: Uuid, agent_id: &str, at: DateTime<Utc>) -> Result<()>;

    /// Sets `delivered_at` if still unset. Idempotent, never transitions
    /// state.
    async fn mark_read(&self, message_id: Uuid, agent_id: &str, at: DateTime<Utc>) -> Result<()>;

    /// `pending -> failed` with the attempt error recorded and the next
    /// retry scheduled.
    async fn mark_failed(
        &self,
        message_id: Uuid,
        error: &str,
        retry_count: u32,
        next_retry_at: DateTime<Utc>,
    ) -> Result<()>;

    /// `failed -> pending` for one row; precondition `retry_count <
    /// max_retries`.
    async fn requeue(&self, message_id: Uuid, next_retry_at: DateTime<Utc>) -> Result<()>;

    /// Scheduler pass: `failed -> pending` for every retryable row whose
    /// `next_retry_at` has lapsed. Returns the number requeued.
    async fn requeue_failed_due(&self, now: DateTime<Utc>) -> Result<u64>;

    /// Sweep pass: any non-terminal row past `expires_at` transitions to
    /// `expired`. Returns the swept ids.
    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>>;

    /// Dead-letter pass: `failed` rows with exhausted retries transition
    /// to `dead`. Returns the swept ids.
    async fn sweep_dead(&self) -> Result<Vec<Uuid>>;

    /// Unacknowledged delivered rows for a recipient, oldest first within
    /// priority class.
    async fn delivered_for(
        &self,
        agent_id: &str,
        limit: usize,
        type_filter: Option<&str>,
    ) -> Result<Vec<Message>>;

    async fn record_attempt(&self, attempt: &DeliveryAttempt) -> Result<()>;

    async fn attempts(&self, message_id: Uuid) -> Result<Vec<DeliveryAttempt>>;

    /// Rows attached to a conversation, ordered by `created_at`.
    async fn conversation_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>>;

    async fn counts(&self) -> Result<StatusCounts>;

    /// Distinct conversations with at least one non-terminal row.
    async fn active_conversation_count(&self) -> Result<u64>;
}

/// Conversation snapshots and conflict resolutions.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Upsert the full snapshot.
    async fn save(&self, snapshot: &ConversationSnapshot) -> Result<()>;

    async fn load(&self, conversation_id: Uuid) -> Result<Option<ConversationSnapshot>>;

    /// Upsert one conflict row (detected or resolved).
    async fn record_conflict(&self, conflict: &Conflict) -> Result<()>;

    /// Ids of conversations not yet in a terminal state.
    async fn list_active(&self) -> Result<Vec<Uuid>>;
}

/// Consensus sessions, opinions and round bookkeeping.
#[async_trait]
pub trait ConsensusStore: Send + Sync {
    /// Upsert the session snapshot.
    async fn save_session(&self, session: &ConsensusSessionRecord) -> Result<()>;

    async fn load_session(&self, consensus_id: Uuid) -> Result<Option<ConsensusSessionRecord>>;

    async fn record_opinion(&self, opinion: &Opinion) -> Result<()>;

    async fn record_round(&self, round: &ConsensusRoundRecord) -> Result<()>;
}
