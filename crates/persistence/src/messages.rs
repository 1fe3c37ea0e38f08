//! Durable message store on ScyllaDB
//!
//! State transitions use lightweight transactions so the conditional
//! update semantics match the in-memory store exactly: the check and the
//! write are one atomic step, safe across processes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scylla::frame::response::result::CqlValue;
use scylla::frame::value::CqlTimestamp;
use scylla::QueryResult;
use uuid::Uuid;

use sentinel_core::{
    AttemptOutcome, DeliveryAttempt, Error, Message, MessagePriority, MessageStatus, MessageStore,
    Result, StatusCounts,
};

use crate::{PersistenceError, ScyllaClient};

fn ts(at: DateTime<Utc>) -> CqlTimestamp {
    CqlTimestamp(at.timestamp_millis())
}

fn opt_ts(at: Option<DateTime<Utc>>) -> Option<CqlTimestamp> {
    at.map(ts)
}

fn from_ts(at: CqlTimestamp) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(at.0).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// `[applied]` column of a lightweight-transaction response.
fn lwt_applied(result: &QueryResult) -> bool {
    rows_applied(result.rows.as_deref())
}

fn rows_applied(rows: Option<&[scylla::frame::response::result::Row]>) -> bool {
    rows.and_then(|rows| rows.first())
        .and_then(|row| row.columns.first())
        .and_then(|column| column.as_ref())
        .map(|value| matches!(value, CqlValue::Boolean(true)))
        .unwrap_or(false)
}

const MESSAGE_COLUMNS: &str = "message_id, from_agent, to_agent, message_type, payload, priority, \
     status, created_at, delivered_at, acknowledged_at, retry_count, max_retries, next_retry_at, \
     expires_at, error, correlation_id, parent_message_id, conversation_id";

#[derive(scylla::SerializeRow)]
struct MessageInsert {
    message_id: Uuid,
    from_agent: String,
    to_agent: Option<String>,
    message_type: String,
    payload: String,
    priority: i32,
    status: String,
    created_at: CqlTimestamp,
    delivered_at: Option<CqlTimestamp>,
    acknowledged_at: Option<CqlTimestamp>,
    retry_count: i32,
    max_retries: i32,
    next_retry_at: CqlTimestamp,
    expires_at: Option<CqlTimestamp>,
    error: Option<String>,
    correlation_id: Option<Uuid>,
    parent_message_id: Option<Uuid>,
    conversation_id: Option<Uuid>,
}

impl From<&Message> for MessageInsert {
    fn from(message: &Message) -> Self {
        Self {
            message_id: message.message_id,
            from_agent: message.from_agent.clone(),
            to_agent: message.to_agent.clone(),
            message_type: message.message_type.clone(),
            payload: message.payload.to_string(),
            priority: message.priority.as_u8() as i32,
            status: message.status.as_str().to_string(),
            created_at: ts(message.created_at),
            delivered_at: opt_ts(message.delivered_at),
            acknowledged_at: opt_ts(message.acknowledged_at),
            retry_count: message.retry_count as i32,
            max_retries: message.max_retries as i32,
            next_retry_at: ts(message.next_retry_at),
            expires_at: opt_ts(message.expires_at),
            error: message.error.clone(),
            correlation_id: message.correlation_id,
            parent_message_id: message.parent_message_id,
            conversation_id: message.conversation_id,
        }
    }
}

#[derive(scylla::FromRow)]
struct MessageRow {
    message_id: Uuid,
    from_agent: String,
    to_agent: Option<String>,
    message_type: String,
    payload: String,
    priority: i32,
    status: String,
    created_at: CqlTimestamp,
    delivered_at: Option<CqlTimestamp>,
    acknowledged_at: Option<CqlTimestamp>,
    retry_count: i32,
    max_retries: i32,
    next_retry_at: CqlTimestamp,
    expires_at: Option<CqlTimestamp>,
    error: Option<String>,
    correlation_id: Option<Uuid>,
    parent_message_id: Option<Uuid>,
    conversation_id: Option<Uuid>,
}

impl TryFrom<MessageRow> for Message {
    type Error = PersistenceError;

    fn try_from(row: MessageRow) -> std::result::Result<Self, PersistenceError> {
        Ok(Message {
            message_id: row.message_id,
            from_agent: row.from_agent,
            to_agent: row.to_agent,
            message_type: row.message_type,
            payload: serde_json::from_str(&row.payload)
                .map_err(|e| PersistenceError::Decode(format!("payload: {e}")))?,
            priority: MessagePriority::from_u8(row.priority as u8)
                .ok_or_else(|| PersistenceError::Decode(format!("priority {}", row.priority)))?,
            status: MessageStatus::parse(&row.status)
                .ok_or_else(|| PersistenceError::Decode(format!("status {}", row.status)))?,
            created_at: from_ts(row.created_at),
            delivered_at: row.delivered_at.map(from_ts),
            acknowledged_at: row.acknowledged_at.map(from_ts),
            retry_count: row.retry_count.max(0) as u32,
            max_retries: row.max_retries.max(0) as u32,
            next_retry_at: from_ts(row.next_retry_at),
            expires_at: row.expires_at.map(from_ts),
            error: row.error,
            correlation_id: row.correlation_id,
            parent_message_id: row.parent_message_id,
            conversation_id: row.conversation_id,
        })
    }
}

/// ScyllaDB implementation of [`MessageStore`].
#[derive(Clone)]
pub struct ScyllaMessageStore {
    client: ScyllaClient,
}

impl ScyllaMessageStore {
    pub fn new(client: ScyllaClient) -> Self {
        Self { client }
    }

    async fn query_messages(
        &self,
        where_clause: &str,
        values: impl scylla::serialize::row::SerializeRow,
    ) -> Result<Vec<Message>> {
        let query = format!(
            "SELECT {MESSAGE_COLUMNS} FROM {}.agent_messages {where_clause}",
            self.client.keyspace()
        );
        let result = self
            .client
            .session()
            .query_unpaged(query, values)
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?;

        let mut messages = Vec::new();
        for row in result
            .rows_typed::<MessageRow>()
            .map_err(|e| PersistenceError::Decode(e.to_string()))?
        {
            let row = row.map_err(|e| PersistenceError::Decode(e.to_string()))?;
            messages.push(Message::try_from(row)?);
        }
        Ok(messages)
    }

    /// Distinguish a missing row from a precondition failure after an
    /// unapplied lightweight transaction.
    async fn conflict_or_not_found(&self, message_id: Uuid, action: &str) -> Error {
        match self.get(message_id).await {
            Ok(Some(row)) => Error::StateConflict(format!(
                "cannot {action} message {message_id} in state {}",
                row.status.as_str()
            )),
            Ok(None) => Error::NotFound(message_id.to_string()),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl MessageStore for ScyllaMessageStore {
    async fn insert(&self, message: &Message) -> Result<()> {
        let query = format!(
            "INSERT INTO {}.agent_messages ({MESSAGE_COLUMNS}) VALUES \
             (:message_id, :from_agent, :to_agent, :message_type, :payload, :priority, :status, \
              :created_at, :delivered_at, :acknowledged_at, :retry_count, :max_retries, \
              :next_retry_at, :expires_at, :error, :correlation_id, :parent_message_id, \
              :conversation_id)",
            self.client.keyspace()
        );
        self.client
            .session()
            .query_unpaged(query, MessageInsert::from(message))
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?;
        Ok(())
    }

    async fn insert_batch(&self, messages: &[Message]) -> Result<()> {
        // Logged batch: the fan-out applies atomically.
        let mut batch = scylla::batch::Batch::new(scylla::batch::BatchType::Logged);
        let query = format!(
            "INSERT INTO {}.agent_messages ({MESSAGE_COLUMNS}) VALUES \
             (:message_id, :from_agent, :to_agent, :message_type, :payload, :priority, :status, \
              :created_at, :delivered_at, :acknowledged_at, :retry_count, :max_retries, \
              :next_retry_at, :expires_at, :error, :correlation_id, :parent_message_id, \
              :conversation_id)",
            self.client.keyspace()
        );
        let mut values = Vec::with_capacity(messages.len());
        for message in messages {
            batch.append_statement(query.as_str());
            values.push(MessageInsert::from(message));
        }
        self.client
            .session()
            .batch(&batch, values)
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, message_id: Uuid) -> Result<Option<Message>> {
        let rows = self
            .query_messages("WHERE message_id = ?", (message_id,))
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        lease: chrono::Duration,
    ) -> Result<Vec<Message>> {
        // Pending rows come through the status index; due/expiry
        // filtering and priority ordering happen client-side.
        let mut due: Vec<Message> = self
            .query_messages("WHERE status = ? ALLOW FILTERING", ("pending",))
            .await?
            .into_iter()
            .filter(|m| m.next_retry_at <= now && !m.is_expired(now))
            .collect();
        due.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        due.truncate(limit);

        // Conditional lease bump; a row claimed by another worker in the
        // meantime fails the condition and is dropped from the batch.
        let mut claimed = Vec::with_capacity(due.len());
        let query = format!(
            "UPDATE {}.agent_messages SET next_retry_at = ? WHERE message_id = ? \
             IF status = 'pending' AND next_retry_at = ?",
            self.client.keyspace()
        );
        for mut message in due {
            let result = self
                .client
                .session()
                .query_unpaged(
                    query.as_str(),
                    (ts(now + lease), message.message_id, ts(message.next_retry_at)),
                )
                .await
                .map_err(|e| PersistenceError::Query(e.to_string()))?;
            if lwt_applied(&result) {
                message.next_retry_at = now + lease;
                claimed.push(message);
            }
        }
        Ok(claimed)
    }

    async fn mark_delivered(&self, message_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let query = format!(
            "UPDATE {}.agent_messages SET status = 'delivered', delivered_at = ? \
             WHERE message_id = ? IF status = 'pending'",
            self.client.keyspace()
        );
        let result = self
            .client
            .session()
            .query_unpaged(query, (ts(at), message_id))
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?;
        if !lwt_applied(&result) {
            return Err(self.conflict_or_not_found(message_id, "deliver").await);
        }
        Ok(())
    }

    async fn acknowledge(&self, message_id: Uuid, agent_id: &str, at: DateTime<Utc>) -> Result<()> {
        let row = self
            .get(message_id)
            .await?
            .ok_or_else(|| Error::NotFound(message_id.to_string()))?;
        if row.to_agent.as_deref() != Some(agent_id) {
            return Err(Error::StateConflict(format!(
                "message {message_id} is not addressed to {agent_id}"
            )));
        }
        if row.status == MessageStatus::Acknowledged {
            return Ok(());
        }

        let query = format!(
            "UPDATE {}.agent_messages SET status = 'acknowledged', acknowledged_at = ? \
             WHERE message_id = ? IF status = 'delivered'",
            self.client.keyspace()
        );
        let result = self
            .client
            .session()
            .query_unpaged(query, (ts(at), message_id))
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?;
        if !lwt_applied(&result) {
            return Err(self.conflict_or_not_found(message_id, "acknowledge").await);
        }
        Ok(())
    }

    async fn mark_read(&self, message_id: Uuid, agent_id: &str, at: DateTime<Utc>) -> Result<()> {
        let row = self
            .get(message_id)
            .await?
            .ok_or_else(|| Error::NotFound(message_id.to_string()))?;
        if row.to_agent.as_deref() != Some(agent_id) {
            return Err(Error::StateConflict(format!(
                "message {message_id} is not addressed to {agent_id}"
            )));
        }
        let query = format!(
            "UPDATE {}.agent_messages SET delivered_at = ? WHERE message_id = ? \
             IF delivered_at = null",
            self.client.keyspace()
        );
        // Idempotent: an unapplied condition means the stamp exists.
        self.client
            .session()
            .query_unpaged(query, (ts(at), message_id))
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?;
        Ok(())
    }

    async fn mark_failed(
        &self,
        message_id: Uuid,
        error: &str,
        retry_count: u32,
        next_retry_at: DateTime<Utc>,
    ) -> Result<()> {
        let query = format!(
            "UPDATE {}.agent_messages SET status = 'failed', error = ?, retry_count = ?, \
             next_retry_at = ? WHERE message_id = ? IF status = 'pending'",
            self.client.keyspace()
        );
        let result = self
            .client
            .session()
            .query_unpaged(
                query,
                (error, retry_count as i32, ts(next_retry_at), message_id),
            )
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?;
        if !lwt_applied(&result) {
            return Err(self.conflict_or_not_found(message_id, "fail").await);
        }
        Ok(())
    }

    async fn requeue(&self, message_id: Uuid, next_retry_at: DateTime<Utc>) -> Result<()> {
        let row = self
            .get(message_id)
            .await?
            .ok_or_else(|| Error::NotFound(message_id.to_string()))?;
        if !row.can_retry() {
            return Err(Error::StateConflict(format!(
                "message {message_id} is not retryable (state {}, retries {}/{})",
                row.status.as_str(),
                row.retry_count,
                row.max_retries
            )));
        }
        let query = format!(
            "UPDATE {}.agent_messages SET status = 'pending', next_retry_at = ? \
             WHERE message_id = ? IF status = 'failed'",
            self.client.keyspace()
        );
        let result = self
            .client
            .session()
            .query_unpaged(query, (ts(next_retry_at), message_id))
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?;
        if !lwt_applied(&result) {
            return Err(self.conflict_or_not_found(message_id, "requeue").await);
        }
        Ok(())
    }

    async fn requeue_failed_due(&self, now: DateTime<Utc>) -> Result<u64> {
        let failed = self
            .query_messages("WHERE status = ? ALLOW FILTERING", ("failed",))
            .await?;
        let query = format!(
            "UPDATE {}.agent_messages SET status = 'pending' WHERE message_id = ? \
             IF status = 'failed' AND next_retry_at = ?",
            self.client.keyspace()
        );
        let mut requeued = 0;
        for message in failed {
            if message.retry_count >= message.max_retries || message.next_retry_at > now {
                continue;
            }
            let result = self
                .client
                .session()
                .query_unpaged(query.as_str(), (message.message_id, ts(message.next_retry_at)))
                .await
                .map_err(|e| PersistenceError::Query(e.to_string()))?;
            if lwt_applied(&result) {
                requeued += 1;
            }
        }
        Ok(requeued)
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let rows = self
            .query_messages("WHERE expires_at <= ? ALLOW FILTERING", (ts(now),))
            .await?;
        let mut swept = Vec::new();
        for message in rows {
            if message.status.is_terminal() {
                continue;
            }
            let query = format!(
                "UPDATE {}.agent_messages SET status = 'expired' WHERE message_id = ? \
                 IF status = ?",
                self.client.keyspace()
            );
            let result = self
                .client
                .session()
                .query_unpaged(query, (message.message_id, message.status.as_str()))
                .await
                .map_err(|e| PersistenceError::Query(e.to_string()))?;
            if lwt_applied(&result) {
                swept.push(message.message_id);
            }
        }
        Ok(swept)
    }

    async fn sweep_dead(&self) -> Result<Vec<Uuid>> {
        let failed = self
            .query_messages("WHERE status = ? ALLOW FILTERING", ("failed",))
            .await?;
        let query = format!(
            "UPDATE {}.agent_messages SET status = 'dead' WHERE message_id = ? \
             IF status = 'failed'",
            self.client.keyspace()
        );
        let mut swept = Vec::new();
        for message in failed {
            if message.retry_count < message.max_retries {
                continue;
            }
            let result = self
                .client
                .session()
                .query_unpaged(query.as_str(), (message.message_id,))
                .await
                .map_err(|e| PersistenceError::Query(e.to_string()))?;
            if lwt_applied(&result) {
                swept.push(message.message_id);
            }
        }
        Ok(swept)
    }

    async fn delivered_for(
        &self,
        agent_id: &str,
        limit: usize,
        type_filter: Option<&str>,
    ) -> Result<Vec<Message>> {
        let mut rows: Vec<Message> = self
            .query_messages("WHERE to_agent = ?", (agent_id,))
            .await?
            .into_iter()
            .filter(|m| {
                m.status == MessageStatus::Delivered
                    && type_filter.map(|t| m.message_type == t).unwrap_or(true)
            })
            .collect();
        rows.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        rows.truncate(limit);
        Ok(rows)
    }

    async fn record_attempt(&self, attempt: &DeliveryAttempt) -> Result<()> {
        let query = format!(
            "INSERT INTO {}.message_delivery_attempts \
             (message_id, attempt_number, attempted_at, outcome, error) VALUES (?, ?, ?, ?, ?)",
            self.client.keyspace()
        );
        self.client
            .session()
            .query_unpaged(
                query,
                (
                    attempt.message_id,
                    attempt.attempt_number as i32,
                    ts(attempt.attempted_at),
                    attempt.outcome.as_str(),
                    attempt.error.clone(),
                ),
            )
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?;
        Ok(())
    }

    async fn attempts(&self, message_id: Uuid) -> Result<Vec<DeliveryAttempt>> {
        let query = format!(
            "SELECT message_id, attempt_number, attempted_at, outcome, error \
             FROM {}.message_delivery_attempts WHERE message_id = ?",
            self.client.keyspace()
        );
        let result = self
            .client
            .session()
            .query_unpaged(query, (message_id,))
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?;

        let mut attempts = Vec::new();
        for row in result
            .rows_typed::<(Uuid, i32, CqlTimestamp, String, Option<String>)>()
            .map_err(|e| PersistenceError::Decode(e.to_string()))?
        {
            let (message_id, attempt_number, attempted_at, outcome, error) =
                row.map_err(|e| PersistenceError::Decode(e.to_string()))?;
            attempts.push(DeliveryAttempt {
                message_id,
                attempt_number: attempt_number.max(0) as u32,
                attempted_at: from_ts(attempted_at),
                outcome: if outcome == "delivered" {
                    AttemptOutcome::Delivered
                } else {
                    AttemptOutcome::Failed
                },
                error,
            });
        }
        Ok(attempts)
    }

    async fn conversation_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>> {
        let mut rows = self
            .query_messages("WHERE conversation_id = ?", (conversation_id,))
            .await?;
        rows.sort_by_key(|m| m.created_at);
        Ok(rows)
    }

    async fn counts(&self) -> Result<StatusCounts> {
        let query = format!("SELECT status FROM {}.agent_messages", self.client.keyspace());
        let result = self
            .client
            .session()
            .query_unpaged(query, &[])
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?;

        let mut counts = StatusCounts::default();
        for row in result
            .rows_typed::<(String,)>()
            .map_err(|e| PersistenceError::Decode(e.to_string()))?
        {
            let (status,) = row.map_err(|e| PersistenceError::Decode(e.to_string()))?;
            match MessageStatus::parse(&status) {
                Some(MessageStatus::Pending) => counts.pending += 1,
                Some(MessageStatus::Delivered) => counts.delivered += 1,
                Some(MessageStatus::Acknowledged) => counts.acknowledged += 1,
                Some(MessageStatus::Failed) => counts.failed += 1,
                Some(MessageStatus::Expired) => counts.expired += 1,
                Some(MessageStatus::Dead) => counts.dead += 1,
                None => {}
            }
        }
        Ok(counts)
    }

    async fn active_conversation_count(&self) -> Result<u64> {
        let query = format!(
            "SELECT conversation_id, status FROM {}.agent_messages",
            self.client.keyspace()
        );
        let result = self
            .client
            .session()
            .query_unpaged(query, &[])
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?;

        let mut active = std::collections::HashSet::new();
        for row in result
            .rows_typed::<(Option<Uuid>, String)>()
            .map_err(|e| PersistenceError::Decode(e.to_string()))?
        {
            let (conversation_id, status) =
                row.map_err(|e| PersistenceError::Decode(e.to_string()))?;
            if let (Some(conversation_id), Some(status)) =
                (conversation_id, MessageStatus::parse(&status))
            {
                if !status.is_terminal() {
                    active.insert(conversation_id);
                }
            }
        }
        Ok(active.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scylla::frame::response::result::Row;

    #[test]
    fn test_timestamp_round_trip_preserves_millis() {
        let at = DateTime::<Utc>::from_timestamp_millis(1_700_000_000_123).unwrap();
        assert_eq!(ts(at).0, 1_700_000_000_123);
        assert_eq!(from_ts(ts(at)), at);
    }

    #[test]
    fn test_opt_timestamp_maps_none() {
        assert!(opt_ts(None).is_none());
        let at = Utc::now();
        assert_eq!(opt_ts(Some(at)).unwrap().0, at.timestamp_millis());
    }

    #[test]
    fn test_out_of_range_timestamp_falls_back_to_epoch() {
        assert_eq!(from_ts(CqlTimestamp(i64::MAX)), DateTime::<Utc>::UNIX_EPOCH);
    }

    fn row(columns: Vec<Option<CqlValue>>) -> Row {
        Row { columns }
    }

    #[test]
    fn test_applied_row_is_applied() {
        let rows = vec![row(vec![Some(CqlValue::Boolean(true))])];
        assert!(rows_applied(Some(&rows)));
    }

    #[test]
    fn test_unapplied_row_is_not_applied() {
        let rows = vec![row(vec![Some(CqlValue::Boolean(false))])];
        assert!(!rows_applied(Some(&rows)));
    }

    #[test]
    fn test_malformed_responses_are_not_applied() {
        // No rows at all.
        assert!(!rows_applied(None));
        // Empty row set.
        assert!(!rows_applied(Some(&[])));
        // Row with no columns.
        assert!(!rows_applied(Some(&[row(Vec::new())])));
        // Null first column.
        assert!(!rows_applied(Some(&[row(vec![None])])));
        // Non-boolean first column.
        let rows = vec![row(vec![Some(CqlValue::Int(1))])];
        assert!(!rows_applied(Some(&rows)));
    }
}
