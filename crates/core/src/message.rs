//! Message bus data model
//!
//! A `Message` is the persisted unit of bus traffic. Broadcast fan-out
//! duplicates into per-recipient rows, so every state transition here is
//! per-recipient.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Delivery priority. 1 is highest, 5 is lowest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagePriority {
    Critical = 1,
    High = 2,
    Normal = 3,
    Low = 4,
    Background = 5,
}

impl MessagePriority {
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Critical),
            2 => Some(Self::High),
            3 => Some(Self::Normal),
            4 => Some(Self::Low),
            5 => Some(Self::Background),
            _ => None,
        }
    }
}

impl Default for MessagePriority {
    fn default() -> Self {
        Self::Normal
    }
}

/// Per-recipient delivery state.
///
/// `acknowledged`, `expired` and `dead` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Delivered,
    Acknowledged,
    Failed,
    Expired,
    Dead,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Acknowledged => "acknowledged",
            Self::Failed => "failed",
            Self::Expired => "expired",
            Self::Dead => "dead",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "delivered" => Some(Self::Delivered),
            "acknowledged" => Some(Self::Acknowledged),
            "failed" => Some(Self::Failed),
            "expired" => Some(Self::Expired),
            "dead" => Some(Self::Dead),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Acknowledged | Self::Expired | Self::Dead)
    }
}

/// A persisted per-recipient message row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: Uuid,
    pub from_agent: String,
    /// `None` marks the pre-fan-out broadcast template; persisted rows
    /// always carry a concrete recipient.
    pub to_agent: Option<String>,
    pub message_type: String,
    pub payload: Value,
    pub priority: MessagePriority,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub next_retry_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub correlation_id: Option<Uuid>,
    pub parent_message_id: Option<Uuid>,
    pub conversation_id: Option<Uuid>,
}

impl Message {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }

    /// Whether the row may be requeued for another delivery attempt.
    pub fn can_retry(&self) -> bool {
        self.status == MessageStatus::Failed && self.retry_count < self.max_retries
    }
}

/// A send request before the bus materializes it into persisted rows.
///
/// Unset fields fall back to the Message Type Registry defaults.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub from_agent: String,
    pub to_agent: Option<String>,
    pub message_type: String,
    pub payload: Value,
    pub priority: Option<MessagePriority>,
    pub expires_in: Option<Duration>,
    pub max_retries: Option<u32>,
    pub correlation_id: Option<Uuid>,
    pub parent_message_id: Option<Uuid>,
    pub conversation_id: Option<Uuid>,
}

impl OutboundMessage {
    pub fn new(
        from_agent: impl Into<String>,
        to_agent: impl Into<String>,
        message_type: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            from_agent: from_agent.into(),
            to_agent: Some(to_agent.into()),
            message_type: message_type.into(),
            payload,
            priority: None,
            expires_in: None,
            max_retries: None,
            correlation_id: None,
            parent_message_id: None,
            conversation_id: None,
        }
    }

    /// A broadcast template; the bus fans out over the registered agents.
    pub fn broadcast(
        from_agent: impl Into<String>,
        message_type: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            from_agent: from_agent.into(),
            to_agent: None,
            message_type: message_type.into(),
            payload,
            priority: None,
            expires_in: None,
            max_retries: None,
            correlation_id: None,
            parent_message_id: None,
            conversation_id: None,
        }
    }

    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_expires_in(mut self, expires_in: Duration) -> Self {
        self.expires_in = Some(expires_in);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_parent(mut self, parent_message_id: Uuid) -> Self {
        self.parent_message_id = Some(parent_message_id);
        self
    }

    pub fn with_conversation(mut self, conversation_id: Uuid) -> Self {
        self.conversation_id = Some(conversation_id);
        self
    }
}

/// Message Type Registry row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageTypeDescriptor {
    pub message_type: String,
    /// JSON Schema describing required fields and field types.
    pub payload_schema: Option<Value>,
    pub default_priority: MessagePriority,
    pub default_expiry_secs: Option<i64>,
    pub requires_response: bool,
    pub is_system_type: bool,
}

impl MessageTypeDescriptor {
    pub fn new(message_type: impl Into<String>) -> Self {
        Self {
            message_type: message_type.into(),
            payload_schema: None,
            default_priority: MessagePriority::Normal,
            default_expiry_secs: None,
            requires_response: false,
            is_system_type: false,
        }
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.payload_schema = Some(schema);
        self
    }

    pub fn with_default_priority(mut self, priority: MessagePriority) -> Self {
        self.default_priority = priority;
        self
    }

    pub fn with_default_expiry_secs(mut self, secs: i64) -> Self {
        self.default_expiry_secs = Some(secs);
        self
    }

    pub fn requires_response(mut self, requires: bool) -> Self {
        self.requires_response = requires;
        self
    }

    pub fn system_type(mut self) -> Self {
        self.is_system_type = true;
        self
    }
}

/// Outcome of a single delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Delivered,
    Failed,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }
}

/// Audit row recorded for every delivery attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub message_id: Uuid,
    pub attempt_number: u32,
    pub attempted_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    pub error: Option<String>,
}

/// Per-status row counts used by bus stats and health reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub delivered: u64,
    pub acknowledged: u64,
    pub failed: u64,
    pub expired: u64,
    pub dead: u64,
}

impl StatusCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.delivered + self.acknowledged + self.failed + self.expired + self.dead
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_round_trip() {
        for value in 1..=5u8 {
            let priority = MessagePriority::from_u8(value).unwrap();
            assert_eq!(priority.as_u8(), value);
        }
        assert!(MessagePriority::from_u8(0).is_none());
        assert!(MessagePriority::from_u8(6).is_none());
    }

    #[test]
    fn test_priority_ordering() {
        assert!(MessagePriority::Critical < MessagePriority::Normal);
        assert!(MessagePriority::Normal < MessagePriority::Background);
    }

    #[test]
    fn test_status_terminality() {
        assert!(MessageStatus::Acknowledged.is_terminal());
        assert!(MessageStatus::Expired.is_terminal());
        assert!(MessageStatus::Dead.is_terminal());
        assert!(!MessageStatus::Pending.is_terminal());
        assert!(!MessageStatus::Failed.is_terminal());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            MessageStatus::Pending,
            MessageStatus::Delivered,
            MessageStatus::Acknowledged,
            MessageStatus::Failed,
            MessageStatus::Expired,
            MessageStatus::Dead,
        ] {
            assert_eq!(MessageStatus::parse(status.as_str()), Some(status));
        }
    }
}
