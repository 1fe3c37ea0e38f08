//! In-memory message store
//!
//! Default store and test substrate. All transition preconditions are
//! enforced under one lock, mirroring the conditional updates the
//! ScyllaDB store issues.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use sentinel_core::{
    DeliveryAttempt, Error, Message, MessageStatus, MessageStore, Result, StatusCounts,
};

#[derive(Default)]
struct Inner {
    messages: HashMap<Uuid, Message>,
    attempts: HashMap<Uuid, Vec<DeliveryAttempt>>,
}

/// Lock-guarded in-memory implementation of [`MessageStore`].
#[derive(Default)]
pub struct InMemoryMessageStore {
    inner: RwLock<Inner>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn sort_for_delivery(messages: &mut [Message]) {
        messages.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn insert(&self, message: &Message) -> Result<()> {
        let mut inner = self.inner.write();
        inner.messages.insert(message.message_id, message.clone());
        Ok(())
    }

    async fn insert_batch(&self, messages: &[Message]) -> Result<()> {
        // Single lock acquisition makes the fan-out all-or-nothing.
        let mut inner = self.inner.write();
        for message in messages {
            inner.messages.insert(message.message_id, message.clone());
        }
        Ok(())
    }

    async fn get(&self, message_id: Uuid) -> Result<Option<Message>> {
        Ok(self.inner.read().messages.get(&message_id).cloned())
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        lease: Duration,
    ) -> Result<Vec<Message>> {
        let mut inner = self.inner.write();
        let mut due: Vec<Message> = inner
            .messages
            .values()
            .filter(|m| {
                m.status == MessageStatus::Pending
                    && m.next_retry_at <= now
                    && !m.is_expired(now)
            })
            .cloned()
            .collect();
        Self::sort_for_delivery(&mut due);
        due.truncate(limit);

        for message in &due {
            if let Some(row) = inner.messages.get_mut(&message.message_id) {
                row.next_retry_at = now + lease;
            }
        }
        Ok(due)
    }

    async fn mark_delivered(&self, message_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.write();
        let row = inner
            .messages
            .get_mut(&message_id)
            .ok_or_else(|| Error::NotFound(message_id.to_string()))?;
        if row.status != MessageStatus::Pending {
            return Err(Error::StateConflict(format!(
                "cannot deliver message in state {}",
                row.status.as_str()
            )));
        }
        row.status = MessageStatus::Delivered;
        row.delivered_at = Some(at);
        Ok(())
    }

    async fn acknowledge(&self, message_id: Uuid, agent_id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.write();
        let row = inner
            .messages
            .get_mut(&message_id)
            .ok_or_else(|| Error::NotFound(message_id.to_string()))?;
        if row.to_agent.as_deref() != Some(agent_id) {
            return Err(Error::StateConflict(format!(
                "message {message_id} is not addressed to {agent_id}"
            )));
        }
        match row.status {
            // Idempotent: a second acknowledgement is a no-op success.
            MessageStatus::Acknowledged => Ok(()),
            MessageStatus::Delivered => {
                row.status = MessageStatus::Acknowledged;
                row.acknowledged_at = Some(at);
                Ok(())
            }
            other => Err(Error::StateConflict(format!(
                "cannot acknowledge message in state {}",
                other.as_str()
            ))),
        }
    }

    async fn mark_read(&self, message_id: Uuid, agent_id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.write();
        let row = inner
            .messages
            .get_mut(&message_id)
            .ok_or_else(|| Error::NotFound(message_id.to_string()))?;
        if row.to_agent.as_deref() != Some(agent_id) {
            return Err(Error::StateConflict(format!(
                "message {message_id} is not addressed to {agent_id}"
            )));
        }
        if row.delivered_at.is_none() {
            row.delivered_at = Some(at);
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        message_id: Uuid,
        error: &str,
        retry_count: u32,
        next_retry_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        let row = inner
            .messages
            .get_mut(&message_id)
            .ok_or_else(|| Error::NotFound(message_id.to_string()))?;
        if row.status != MessageStatus::Pending {
            return Err(Error::StateConflict(format!(
                "cannot fail message in state {}",
                row.status.as_str()
            )));
        }
        row.status = MessageStatus::Failed;
        row.error = Some(error.to_string());
        row.retry_count = retry_count.min(row.max_retries);
        row.next_retry_at = next_retry_at;
        Ok(())
    }

    async fn requeue(&self, message_id: Uuid, next_retry_at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.write();
        let row = inner
            .messages
            .get_mut(&message_id)
            .ok_or_else(|| Error::NotFound(message_id.to_string()))?;
        if !row.can_retry() {
            return Err(Error::StateConflict(format!(
                "message {message_id} is not retryable (state {}, retries {}/{})",
                row.status.as_str(),
                row.retry_count,
                row.max_retries
            )));
        }
        row.status = MessageStatus::Pending;
        row.next_retry_at = next_retry_at;
        Ok(())
    }

    async fn requeue_failed_due(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.inner.write();
        let mut requeued = 0;
        for row in inner.messages.values_mut() {
            if row.status == MessageStatus::Failed
                && row.retry_count < row.max_retries
                && row.next_retry_at <= now
            {
                row.status = MessageStatus::Pending;
                requeued += 1;
            }
        }
        Ok(requeued)
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let mut inner = self.inner.write();
        let mut swept = Vec::new();
        for row in inner.messages.values_mut() {
            if !row.status.is_terminal() && row.is_expired(now) {
                row.status = MessageStatus::Expired;
                swept.push(row.message_id);
            }
        }
        Ok(swept)
    }

    async fn sweep_dead(&self) -> Result<Vec<Uuid>> {
        let mut inner = self.inner.write();
        let mut swept = Vec::new();
        for row in inner.messages.values_mut() {
            if row.status == MessageStatus::Failed && row.retry_count >= row.max_retries {
                row.status = MessageStatus::Dead;
                swept.push(row.message_id);
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
        let inner = self.inner.read();
        let mut rows: Vec<Message> = inner
            .messages
            .values()
            .filter(|m| {
                m.status == MessageStatus::Delivered
                    && m.to_agent.as_deref() == Some(agent_id)
                    && type_filter.map(|t| m.message_type == t).unwrap_or(true)
            })
            .cloned()
            .collect();
        Self::sort_for_delivery(&mut rows);
        rows.truncate(limit);
        Ok(rows)
    }

    async fn record_attempt(&self, attempt: &DeliveryAttempt) -> Result<()> {
        let mut inner = self.inner.write();
        inner
            .attempts
            .entry(attempt.message_id)
            .or_default()
            .push(attempt.clone());
        Ok(())
    }

    async fn attempts(&self, message_id: Uuid) -> Result<Vec<DeliveryAttempt>> {
        Ok(self
            .inner
            .read()
            .attempts
            .get(&message_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn conversation_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>> {
        let inner = self.inner.read();
        let mut rows: Vec<Message> = inner
            .messages
            .values()
            .filter(|m| m.conversation_id == Some(conversation_id))
            .cloned()
            .collect();
        rows.sort_by_key(|m| m.created_at);
        Ok(rows)
    }

    async fn counts(&self) -> Result<StatusCounts> {
        let inner = self.inner.read();
        let mut counts = StatusCounts::default();
        for row in inner.messages.values() {
            match row.status {
                MessageStatus::Pending => counts.pending += 1,
                MessageStatus::Delivered => counts.delivered += 1,
                MessageStatus::Acknowledged => counts.acknowledged += 1,
                MessageStatus::Failed => counts.failed += 1,
                MessageStatus::Expired => counts.expired += 1,
                MessageStatus::Dead => counts.dead += 1,
            }
        }
        Ok(counts)
    }

    async fn active_conversation_count(&self) -> Result<u64> {
        let inner = self.inner.read();
        let active: HashSet<Uuid> = inner
            .messages
            .values()
            .filter(|m| !m.status.is_terminal())
            .filter_map(|m| m.conversation_id)
            .collect();
        Ok(active.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_core::MessagePriority;
    use serde_json::json;

    fn message(from: &str, to: &str, priority: MessagePriority) -> Message {
        let now = Utc::now();
        Message {
            message_id: Uuid::new_v4(),
            from_agent: from.to_string(),
            to_agent: Some(to.to_string()),
            message_type: "health_probe".to_string(),
            payload: json!({}),
            priority,
            status: MessageStatus::Pending,
            created_at: now,
            delivered_at: None,
            acknowledged_at: None,
            retry_count: 0,
            max_retries: 3,
            next_retry_at: now,
            expires_at: None,
            error: None,
            correlation_id: None,
            parent_message_id: None,
            conversation_id: None,
        }
    }

    #[tokio::test]
    async fn test_claim_orders_by_priority_then_age() {
        let store = InMemoryMessageStore::new();
        let low = message("a", "b", MessagePriority::Low);
        let critical = message("a", "b", MessagePriority::Critical);
        store.insert(&low).await.unwrap();
        store.insert(&critical).await.unwrap();

        let claimed = store
            .claim_due(Utc::now(), 10, Duration::seconds(30))
            .await
            .unwrap();
        assert_eq!(claimed[0].message_id, critical.message_id);
        assert_eq!(claimed[1].message_id, low.message_id);
    }

    #[tokio::test]
    async fn test_claim_lease_prevents_double_claim() {
        let store = InMemoryMessageStore::new();
        store
            .insert(&message("a", "b", MessagePriority::Normal))
            .await
            .unwrap();

        let now = Utc::now();
        let first = store.claim_due(now, 10, Duration::seconds(30)).await.unwrap();
        assert_eq!(first.len(), 1);
        let second = store.claim_due(now, 10, Duration::seconds(30)).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_acknowledge_requires_delivery_and_recipient() {
        let store = InMemoryMessageStore::new();
        let msg = message("a", "b", MessagePriority::Normal);
        store.insert(&msg).await.unwrap();

        // Not yet delivered.
        let err = store.acknowledge(msg.message_id, "b", Utc::now()).await;
        assert!(matches!(err, Err(Error::StateConflict(_))));

        store.mark_delivered(msg.message_id, Utc::now()).await.unwrap();

        // Wrong recipient.
        let err = store.acknowledge(msg.message_id, "c", Utc::now()).await;
        assert!(matches!(err, Err(Error::StateConflict(_))));

        store.acknowledge(msg.message_id, "b", Utc::now()).await.unwrap();
        // Idempotent second call.
        store.acknowledge(msg.message_id, "b", Utc::now()).await.unwrap();

        let row = store.get(msg.message_id).await.unwrap().unwrap();
        assert_eq!(row.status, MessageStatus::Acknowledged);
    }

    #[tokio::test]
    async fn test_expiry_sweep_is_terminal() {
        let store = InMemoryMessageStore::new();
        let mut msg = message("a", "b", MessagePriority::Normal);
        msg.expires_at = Some(Utc::now() - Duration::seconds(1));
        store.insert(&msg).await.unwrap();

        let swept = store.sweep_expired(Utc::now()).await.unwrap();
        assert_eq!(swept, vec![msg.message_id]);

        // No further transitions out of expired.
        let err = store.mark_delivered(msg.message_id, Utc::now()).await;
        assert!(matches!(err, Err(Error::StateConflict(_))));
        let again = store.sweep_expired(Utc::now()).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_dead_letter_sweep_requires_exhausted_retries() {
        let store = InMemoryMessageStore::new();
        let msg = message("a", "b", MessagePriority::Normal);
        store.insert(&msg).await.unwrap();
        store
            .mark_failed(msg.message_id, "boom", 3, Utc::now())
            .await
            .unwrap();

        let swept = store.sweep_dead().await.unwrap();
        assert_eq!(swept, vec![msg.message_id]);
        let row = store.get(msg.message_id).await.unwrap().unwrap();
        assert_eq!(row.status, MessageStatus::Dead);
        assert!(row.retry_count <= row.max_retries);
    }
}
