//! Knowledge entity and relationship types
//!
//! A `KnowledgeEntity` is the retrievable unit of the vector knowledge
//! store: content plus a fixed-length embedding, confidence, access
//! accounting and a retention policy.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Business domain an entity belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeDomain {
    RegulatoryCompliance,
    TransactionMonitoring,
    AuditIntelligence,
    BusinessProcesses,
    RiskManagement,
    LegalFrameworks,
    FinancialInstruments,
    MarketIntelligence,
}

impl KnowledgeDomain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RegulatoryCompliance => "regulatory_compliance",
            Self::TransactionMonitoring => "transaction_monitoring",
            Self::AuditIntelligence => "audit_intelligence",
            Self::BusinessProcesses => "business_processes",
            Self::RiskManagement => "risk_management",
            Self::LegalFrameworks => "legal_frameworks",
            Self::FinancialInstruments => "financial_instruments",
            Self::MarketIntelligence => "market_intelligence",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "regulatory_compliance" => Some(Self::RegulatoryCompliance),
            "transaction_monitoring" => Some(Self::TransactionMonitoring),
            "audit_intelligence" => Some(Self::AuditIntelligence),
            "business_processes" => Some(Self::BusinessProcesses),
            "risk_management" => Some(Self::RiskManagement),
            "legal_frameworks" => Some(Self::LegalFrameworks),
            "financial_instruments" => Some(Self::FinancialInstruments),
            "market_intelligence" => Some(Self::MarketIntelligence),
            _ => None,
        }
    }
}

/// Kind of knowledge an entity captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeType {
    Fact,
    Rule,
    Pattern,
    Relationship,
    Context,
    Experience,
    Decision,
    Prediction,
}

impl KnowledgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fact => "fact",
            Self::Rule => "rule",
            Self::Pattern => "pattern",
            Self::Relationship => "relationship",
            Self::Context => "context",
            Self::Experience => "experience",
            Self::Decision => "decision",
            Self::Prediction => "prediction",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fact" => Some(Self::Fact),
            "rule" => Some(Self::Rule),
            "pattern" => Some(Self::Pattern),
            "relationship" => Some(Self::Relationship),
            "context" => Some(Self::Context),
            "experience" => Some(Self::Experience),
            "decision" => Some(Self::Decision),
            "prediction" => Some(Self::Prediction),
            _ => None,
        }
    }
}

/// How long an entity is retained before the sweeper may expire it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    Ephemeral,
    Session,
    Persistent,
    Archival,
}

impl RetentionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ephemeral => "ephemeral",
            Self::Session => "session",
            Self::Persistent => "persistent",
            Self::Archival => "archival",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ephemeral" => Some(Self::Ephemeral),
            "session" => Some(Self::Session),
            "persistent" => Some(Self::Persistent),
            "archival" => Some(Self::Archival),
            _ => None,
        }
    }
}

/// The retrievable unit of the knowledge store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEntity {
    pub entity_id: Uuid,
    pub domain: KnowledgeDomain,
    pub knowledge_type: KnowledgeType,
    pub title: String,
    pub content: String,
    pub metadata: Value,
    /// Lowercased tag set.
    pub tags: Vec<String>,
    /// Fixed-length vector; length must equal the store's configured
    /// dimensionality or the entity is rejected.
    pub embedding: Vec<f32>,
    /// Confidence in [0, 1].
    pub confidence_score: f64,
    pub access_count: u64,
    pub retention_policy: RetentionPolicy,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl KnowledgeEntity {
    pub fn new(
        domain: KnowledgeDomain,
        knowledge_type: KnowledgeType,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            entity_id: Uuid::new_v4(),
            domain,
            knowledge_type,
            title: title.into(),
            content: content.into(),
            metadata: Value::Null,
            tags: Vec::new(),
            embedding: Vec::new(),
            confidence_score: 0.5,
            access_count: 0,
            retention_policy: RetentionPolicy::Persistent,
            created_at: now,
            last_accessed: now,
            expires_at: None,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(|t| t.into().to_lowercase()).collect();
        self.tags.sort();
        self.tags.dedup();
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence_score = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_retention(mut self, policy: RetentionPolicy) -> Self {
        self.retention_policy = policy;
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }

    /// Apply a bounded confidence delta, keeping the score in [0, 1].
    pub fn nudge_confidence(&mut self, delta: f64) {
        self.confidence_score = (self.confidence_score + delta).clamp(0.0, 1.0);
    }

    /// Set the expiry from a retention duration, never before creation.
    pub fn set_expiry(&mut self, ttl: Duration) {
        let expires = Utc::now() + ttl;
        self.expires_at = Some(expires.max(self.created_at));
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// Directed labelled edge between two entities.
///
/// `(source_id, target_id, relationship_type)` is unique; creating the
/// same edge twice upserts `properties`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeRelationship {
    pub source_id: Uuid,
    pub target_id: Uuid,
    pub relationship_type: String,
    pub properties: Value,
    pub created_at: DateTime<Utc>,
}

impl KnowledgeRelationship {
    pub fn new(source_id: Uuid, target_id: Uuid, relationship_type: impl Into<String>) -> Self {
        Self {
            source_id,
            target_id,
            relationship_type: relationship_type.into(),
            properties: Value::Null,
            created_at: Utc::now(),
        }
    }

    pub fn with_properties(mut self, properties: Value) -> Self {
        self.properties = properties;
        self
    }
}
