//! Durable conversation store on ScyllaDB
//!
//! Snapshots persist with participants and conflicts as JSON text
//! columns; resolved conflicts additionally land in the
//! `conflict_resolutions` table for audit queries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scylla::frame::value::CqlTimestamp;
use uuid::Uuid;

use sentinel_core::{
    Conflict, ConversationSnapshot, ConversationState, ConversationStore, Result,
};

use crate::{PersistenceError, ScyllaClient};

fn ts(at: DateTime<Utc>) -> CqlTimestamp {
    CqlTimestamp(at.timestamp_millis())
}

fn from_ts(at: CqlTimestamp) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(at.0).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// ScyllaDB implementation of [`ConversationStore`].
#[derive(Clone)]
pub struct ScyllaConversationStore {
    client: ScyllaClient,
}

impl ScyllaConversationStore {
    pub fn new(client: ScyllaClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ConversationStore for ScyllaConversationStore {
    async fn save(&self, snapshot: &ConversationSnapshot) -> Result<()> {
        let query = format!(
            "INSERT INTO {}.conversations (conversation_id, topic, objective, state, \
             started_at, last_activity, timeout_secs, metadata_json, participants_json, \
             conflicts_json) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.client.keyspace()
        );
        self.client
            .session()
            .query_unpaged(
                query,
                (
                    snapshot.conversation_id,
                    snapshot.topic.as_str(),
                    snapshot.objective.as_str(),
                    snapshot.state.as_str(),
                    ts(snapshot.started_at),
                    ts(snapshot.last_activity),
                    snapshot.timeout_secs as i64,
                    snapshot.metadata.to_string(),
                    serde_json::to_string(&snapshot.participants)
                        .map_err(|e| PersistenceError::Decode(e.to_string()))?,
                    serde_json::to_string(&snapshot.conflicts)
                        .map_err(|e| PersistenceError::Decode(e.to_string()))?,
                ),
            )
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?;
        Ok(())
    }

    async fn load(&self, conversation_id: Uuid) -> Result<Option<ConversationSnapshot>> {
        let query = format!(
            "SELECT conversation_id, topic, objective, state, started_at, last_activity, \
             timeout_secs, metadata_json, participants_json, conflicts_json \
             FROM {}.conversations WHERE conversation_id = ?",
            self.client.keyspace()
        );
        let result = self
            .client
            .session()
            .query_unpaged(query, (conversation_id,))
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?;

        type Row = (
            Uuid,
            String,
            String,
            String,
            CqlTimestamp,
            CqlTimestamp,
            i64,
            String,
            String,
            String,
        );
        let row = result
            .maybe_first_row_typed::<Row>()
            .map_err(|e| PersistenceError::Decode(e.to_string()))?;
        let Some((
            conversation_id,
            topic,
            objective,
            state,
            started_at,
            last_activity,
            timeout_secs,
            metadata_json,
            participants_json,
            conflicts_json,
        )) = row
        else {
            return Ok(None);
        };

        Ok(Some(ConversationSnapshot {
            conversation_id,
            topic,
            objective,
            state: ConversationState::parse(&state)
                .ok_or_else(|| PersistenceError::Decode(format!("state {state}")))?,
            participants: serde_json::from_str(&participants_json)
                .map_err(|e| PersistenceError::Decode(format!("participants: {e}")))?,
            conflicts: serde_json::from_str(&conflicts_json)
                .map_err(|e| PersistenceError::Decode(format!("conflicts: {e}")))?,
            started_at: from_ts(started_at),
            last_activity: from_ts(last_activity),
            timeout_secs: timeout_secs.max(0) as u64,
            metadata: serde_json::from_str(&metadata_json)
                .map_err(|e| PersistenceError::Decode(format!("metadata: {e}")))?,
        }))
    }

    async fn record_conflict(&self, conflict: &Conflict) -> Result<()> {
        let query = format!(
            "INSERT INTO {}.conflict_resolutions (conversation_id, conflict_id, conflict_type, \
             description, involved_agents_json, strategy_used, resolved_successfully, \
             resolution_summary, detected_at, resolved_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.client.keyspace()
        );
        self.client
            .session()
            .query_unpaged(
                query,
                (
                    conflict.conversation_id,
                    conflict.conflict_id,
                    conflict.conflict_type.as_str(),
                    conflict.description.as_str(),
                    serde_json::to_string(&conflict.involved_agents)
                        .map_err(|e| PersistenceError::Decode(e.to_string()))?,
                    conflict.strategy_used.map(|s| s.as_str()),
                    conflict.resolved_successfully,
                    conflict.resolution_summary.clone(),
                    ts(conflict.detected_at),
                    conflict.resolved_at.map(ts),
                ),
            )
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?;
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<Uuid>> {
        let query = format!(
            "SELECT conversation_id, state FROM {}.conversations",
            self.client.keyspace()
        );
        let result = self
            .client
            .session()
            .query_unpaged(query, &[])
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?;

        let mut active = Vec::new();
        for row in result
            .rows_typed::<(Uuid, String)>()
            .map_err(|e| PersistenceError::Decode(e.to_string()))?
        {
            let (conversation_id, state) =
                row.map_err(|e| PersistenceError::Decode(e.to_string()))?;
            if let Some(state) = ConversationState::parse(&state) {
                if !state.is_terminal() {
                    active.push(conversation_id);
                }
            }
        }
        Ok(active)
    }
}
