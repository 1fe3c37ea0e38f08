//! Message bus facade
//!
//! Owns the store seam, the type registry and the per-agent handler
//! registry. Delivery itself runs in the worker pool (`worker.rs`); the
//! facade persists rows and wakes the workers.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::Notify;
use uuid::Uuid;

use sentinel_config::BusConfig;
use sentinel_core::{
    CancelToken, Error, Message, MessageStatus, MessageStore, OutboundMessage, Result,
};

use crate::backoff::backoff_delay;
use crate::registry::MessageTypeRegistry;
use crate::stats::{BusCounters, BusStats};
use crate::BusError;

/// Per-recipient delivery callback registered by an agent host.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> Result<()>;
}

/// The durable message bus.
pub struct MessageBus {
    store: Arc<dyn MessageStore>,
    registry: Arc<MessageTypeRegistry>,
    handlers: DashMap<String, Arc<dyn MessageHandler>>,
    config: BusConfig,
    counters: Arc<BusCounters>,
    wake: Arc<Notify>,
}

impl MessageBus {
    pub fn new(
        store: Arc<dyn MessageStore>,
        registry: Arc<MessageTypeRegistry>,
        config: BusConfig,
    ) -> Self {
        Self {
            store,
            registry,
            handlers: DashMap::new(),
            config,
            counters: Arc::new(BusCounters::default()),
            wake: Arc::new(Notify::new()),
        }
    }

    /// Register an agent as reachable, with its delivery handler.
    /// Broadcasts fan out over the agents registered at send time.
    pub fn register_agent(&self, agent_id: impl Into<String>, handler: Arc<dyn MessageHandler>) {
        let agent_id = agent_id.into();
        tracing::debug!(agent_id = %agent_id, "agent registered on bus");
        self.handlers.insert(agent_id, handler);
    }

    pub fn deregister_agent(&self, agent_id: &str) {
        self.handlers.remove(agent_id);
    }

    pub fn registered_agents(&self) -> Vec<String> {
        self.handlers.iter().map(|e| e.key().clone()).collect()
    }

    pub fn registry(&self) -> &MessageTypeRegistry {
        &self.registry
    }

    /// Persist a point-to-point message in `pending` and wake the workers.
    pub async fn send(&self, outbound: OutboundMessage) -> Result<Uuid> {
        self.send_cancellable(outbound, &CancelToken::never()).await
    }

    pub async fn send_cancellable(
        &self,
        outbound: OutboundMessage,
        cancel: &CancelToken,
    ) -> Result<Uuid> {
        cancel.check()?;
        if outbound.to_agent.is_none() {
            return Err(Error::InvalidInput(
                "point-to-point send requires a recipient; use broadcast".into(),
            ));
        }
        let message = self.materialize(&outbound)?;
        self.check_capacity().await?;
        cancel.check()?;

        self.store.insert(&message).await?;
        self.counters.sent.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("sentinel_bus_sent_total").increment(1);
        tracing::debug!(
            message_id = %message.message_id,
            from = %message.from_agent,
            to = ?message.to_agent,
            message_type = %message.message_type,
            "message enqueued"
        );
        self.wake.notify_waiters();
        Ok(message.message_id)
    }

    /// Fan a message out to every registered agent except the sender and
    /// `exclude`. The insert is all-or-nothing.
    pub async fn broadcast(
        &self,
        outbound: OutboundMessage,
        exclude: &[String],
    ) -> Result<Vec<Uuid>> {
        self.broadcast_cancellable(outbound, exclude, &CancelToken::never())
            .await
    }

    pub async fn broadcast_cancellable(
        &self,
        outbound: OutboundMessage,
        exclude: &[String],
        cancel: &CancelToken,
    ) -> Result<Vec<Uuid>> {
        cancel.check()?;
        let template = self.materialize(&outbound)?;

        // Snapshot of the recipients registered right now; agents that
        // register mid-broadcast do not receive it.
        let recipients: Vec<String> = self
            .handlers
            .iter()
            .map(|e| e.key().clone())
            .filter(|id| *id != outbound.from_agent && !exclude.contains(id))
            .collect();
        if recipients.is_empty() {
            return Ok(Vec::new());
        }

        self.check_capacity().await?;
        cancel.check()?;

        let rows: Vec<Message> = recipients
            .iter()
            .map(|recipient| {
                let mut row = template.clone();
                row.message_id = Uuid::new_v4();
                row.to_agent = Some(recipient.clone());
                row
            })
            .collect();

        self.store.insert_batch(&rows).await?;
        self.counters
            .sent
            .fetch_add(rows.len() as u64, Ordering::Relaxed);
        metrics::counter!("sentinel_bus_sent_total").increment(rows.len() as u64);
        tracing::debug!(
            from = %outbound.from_agent,
            message_type = %outbound.message_type,
            recipients = rows.len(),
            "broadcast fanned out"
        );
        self.wake.notify_waiters();
        Ok(rows.iter().map(|m| m.message_id).collect())
    }

    /// Unacknowledged delivered messages for `agent_id`, oldest first
    /// within priority class. Does not mutate; callers must acknowledge.
    pub async fn receive(
        &self,
        agent_id: &str,
        max: usize,
        type_filter: Option<&str>,
    ) -> Result<Vec<Message>> {
        self.store.delivered_for(agent_id, max, type_filter).await
    }

    /// `delivered -> acknowledged`; idempotent on repeats.
    pub async fn acknowledge(&self, message_id: Uuid, agent_id: &str) -> Result<()> {
        self.store.acknowledge(message_id, agent_id, Utc::now()).await
    }

    /// Stamp `delivered_at` if still unset. Never transitions state.
    pub async fn mark_read(&self, message_id: Uuid, agent_id: &str) -> Result<()> {
        self.store.mark_read(message_id, agent_id, Utc::now()).await
    }

    /// Requeue a failed row for another attempt.
    pub async fn retry(&self, message_id: Uuid) -> Result<()> {
        let message = self
            .store
            .get(message_id)
            .await?
            .ok_or_else(|| Error::NotFound(message_id.to_string()))?;
        if !message.can_retry() {
            return Err(Error::StateConflict(format!(
                "message {message_id} is not retryable (state {}, retries {}/{})",
                message.status.as_str(),
                message.retry_count,
                message.max_retries
            )));
        }
        let next_retry_at = Utc::now()
            + backoff_delay(
                self.config.base_delay_ms,
                self.config.max_backoff_ms,
                message.retry_count,
            );
        self.store.requeue(message_id, next_retry_at).await?;
        self.wake.notify_waiters();
        Ok(())
    }

    /// Sweep rows past their TTL into `expired`. Returns the count.
    pub async fn cleanup_expired(&self) -> Result<u64> {
        let swept = self.store.sweep_expired(Utc::now()).await?;
        if !swept.is_empty() {
            metrics::counter!("sentinel_bus_expired_total").increment(swept.len() as u64);
            tracing::debug!(count = swept.len(), "expired messages swept");
        }
        Ok(swept.len() as u64)
    }

    /// Fetch one persisted row.
    pub async fn message(&self, message_id: Uuid) -> Result<Option<Message>> {
        self.store.get(message_id).await
    }

    /// Delivery attempt audit trail for a message.
    pub async fn delivery_attempts(
        &self,
        message_id: Uuid,
    ) -> Result<Vec<sentinel_core::DeliveryAttempt>> {
        self.store.attempts(message_id).await
    }

    /// Rows attached to a conversation, ordered by send time.
    pub async fn conversation_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>> {
        self.store.conversation_messages(conversation_id).await
    }

    pub async fn stats(&self) -> Result<BusStats> {
        let counts = self.store.counts().await?;
        let sent = self.counters.sent.load(Ordering::Relaxed);
        let succeeded = counts.delivered + counts.acknowledged;
        let success_rate = if sent == 0 {
            1.0
        } else {
            succeeded as f64 / sent as f64
        };
        Ok(BusStats {
            sent,
            pending: counts.pending,
            delivered: counts.delivered,
            acknowledged: counts.acknowledged,
            failed: counts.failed,
            expired: counts.expired,
            dead: counts.dead,
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            dead_letter: self.counters.dead_letter.load(Ordering::Relaxed),
            conversations_active: self.store.active_conversation_count().await?,
            avg_delivery_ms: self.counters.avg_delivery_ms(),
            success_rate,
        })
    }

    fn materialize(&self, outbound: &OutboundMessage) -> Result<Message> {
        let descriptor = self
            .registry
            .get(&outbound.message_type)
            .ok_or_else(|| BusError::UnknownType(outbound.message_type.clone()))?;
        self.registry
            .validate(&outbound.message_type, &outbound.payload)?;

        if let Some(expires_in) = outbound.expires_in {
            if expires_in < Duration::zero() {
                return Err(Error::InvalidInput("expires_in must be >= 0".into()));
            }
        }

        let now = Utc::now();
        let expires_at = outbound
            .expires_in
            .or_else(|| descriptor.default_expiry_secs.map(Duration::seconds))
            .map(|ttl| now + ttl);

        Ok(Message {
            message_id: Uuid::new_v4(),
            from_agent: outbound.from_agent.clone(),
            to_agent: outbound.to_agent.clone(),
            message_type: outbound.message_type.clone(),
            payload: outbound.payload.clone(),
            priority: outbound.priority.unwrap_or(descriptor.default_priority),
            status: MessageStatus::Pending,
            created_at: now,
            delivered_at: None,
            acknowledged_at: None,
            retry_count: 0,
            max_retries: outbound.max_retries.unwrap_or(self.config.max_retries),
            next_retry_at: now,
            expires_at,
            error: None,
            correlation_id: outbound.correlation_id,
            parent_message_id: outbound.parent_message_id,
            conversation_id: outbound.conversation_id,
        })
    }

    async fn check_capacity(&self) -> Result<()> {
        let counts = self.store.counts().await?;
        if counts.pending as usize >= self.config.queue_capacity {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("sentinel_bus_dropped_total").increment(1);
            return Err(BusError::Overflow(self.config.queue_capacity).into());
        }
        Ok(())
    }

    pub(crate) fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    pub(crate) fn handler_for(&self, agent_id: &str) -> Option<Arc<dyn MessageHandler>> {
        self.handlers.get(agent_id).map(|h| h.value().clone())
    }

    pub(crate) fn config(&self) -> &BusConfig {
        &self.config
    }

    pub(crate) fn counters(&self) -> &Arc<BusCounters> {
        &self.counters
    }

    pub(crate) fn wake_handle(&self) -> Arc<Notify> {
        self.wake.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryMessageStore;
    use serde_json::json;

    struct NullHandler;

    #[async_trait]
    impl MessageHandler for NullHandler {
        async fn handle(&self, _message: &Message) -> Result<()> {
            Ok(())
        }
    }

    fn bus() -> MessageBus {
        MessageBus::new(
            Arc::new(InMemoryMessageStore::new()),
            Arc::new(MessageTypeRegistry::with_system_types()),
            BusConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_send_unknown_type_rejected() {
        let bus = bus();
        let err = bus
            .send(OutboundMessage::new("a", "b", "nope", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidType(_)));
    }

    #[tokio::test]
    async fn test_send_schema_mismatch_rejected() {
        let bus = bus();
        let err = bus
            .send(OutboundMessage::new("a", "b", "escalation", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_send_applies_registry_defaults() {
        let bus = bus();
        let id = bus
            .send(OutboundMessage::new(
                "a",
                "b",
                "escalation",
                json!({"reason": "stuck"}),
            ))
            .await
            .unwrap();
        let row = bus.store().get(id).await.unwrap().unwrap();
        assert_eq!(row.priority, sentinel_core::MessagePriority::Critical);
        assert_eq!(row.status, MessageStatus::Pending);
    }

    #[tokio::test]
    async fn test_backpressure_records_drop() {
        let mut config = BusConfig::default();
        config.queue_capacity = 1;
        let bus = MessageBus::new(
            Arc::new(InMemoryMessageStore::new()),
            Arc::new(MessageTypeRegistry::with_system_types()),
            config,
        );
        bus.send(OutboundMessage::new("a", "b", "health_probe", json!({})))
            .await
            .unwrap();
        let err = bus
            .send(OutboundMessage::new("a", "b", "health_probe", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Backpressure(_)));
        assert_eq!(bus.stats().await.unwrap().dropped, 1);
    }

    #[tokio::test]
    async fn test_broadcast_excludes_sender_and_excluded() {
        let bus = bus();
        for agent in ["a", "b", "c", "d"] {
            bus.register_agent(agent, Arc::new(NullHandler));
        }
        let ids = bus
            .broadcast(
                OutboundMessage::broadcast("a", "broadcast_alert", json!({"alert": "x"})),
                &["d".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(ids.len(), 2);

        let mut recipients: Vec<String> = Vec::new();
        for id in ids {
            let row = bus.store().get(id).await.unwrap().unwrap();
            recipients.push(row.to_agent.unwrap());
        }
        recipients.sort();
        assert_eq!(recipients, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_cancelled_send_is_typed() {
        let bus = bus();
        let source = sentinel_core::CancelSource::new();
        source.cancel();
        let err = bus
            .send_cancellable(
                OutboundMessage::new("a", "b", "health_probe", json!({})),
                &source.token(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
