//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::constants::{bus, consensus, endpoints, knowledge, mediator};
use crate::ConfigError;

/// Runtime environment enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    /// Development mode - relaxed validation, warnings only
    #[default]
    Development,
    /// Staging mode - stricter validation
    Staging,
    /// Production mode - all validations enforced
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    pub fn is_strict(&self) -> bool {
        matches!(self, Self::Production | Self::Staging)
    }
}

/// Main application settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    /// Message bus configuration
    #[serde(default)]
    pub bus: BusConfig,

    /// Consensus engine configuration
    #[serde(default)]
    pub consensus: ConsensusConfig,

    /// Conversation mediator configuration
    #[serde(default)]
    pub mediator: MediatorConfig,

    /// Knowledge store configuration
    #[serde(default)]
    pub knowledge: KnowledgeConfig,

    /// Agent orchestrator configuration
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Persistence configuration (ScyllaDB)
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

/// Message bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_bus_workers")]
    pub workers: usize,

    #[serde(default = "default_bus_batch_size")]
    pub batch_size: usize,

    /// First retry delay in milliseconds; doubles per failed attempt.
    #[serde(default = "default_bus_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Backoff ceiling in milliseconds.
    #[serde(default = "default_bus_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_bus_max_retries")]
    pub max_retries: u32,

    /// Pending rows beyond this reject sends with backpressure.
    #[serde(default = "default_bus_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_bus_claim_lease_ms")]
    pub claim_lease_ms: u64,

    #[serde(default = "default_bus_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    #[serde(default = "default_bus_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Per-delivery handler timeout in milliseconds.
    #[serde(default = "default_bus_handler_timeout_ms")]
    pub handler_timeout_ms: u64,
}

fn default_bus_workers() -> usize {
    bus::WORKERS
}
fn default_bus_batch_size() -> usize {
    bus::BATCH_SIZE
}
fn default_bus_base_delay_ms() -> u64 {
    bus::BASE_DELAY_MS
}
fn default_bus_max_backoff_ms() -> u64 {
    bus::MAX_BACKOFF_MS
}
fn default_bus_max_retries() -> u32 {
    bus::MAX_RETRIES
}
fn default_bus_queue_capacity() -> usize {
    bus::QUEUE_CAPACITY
}
fn default_bus_claim_lease_ms() -> u64 {
    bus::CLAIM_LEASE_MS
}
fn default_bus_sweep_interval_ms() -> u64 {
    bus::SWEEP_INTERVAL_MS
}
fn default_bus_poll_interval_ms() -> u64 {
    bus::POLL_INTERVAL_MS
}
fn default_bus_handler_timeout_ms() -> u64 {
    bus::HANDLER_TIMEOUT_MS
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            workers: bus::WORKERS,
            batch_size: bus::BATCH_SIZE,
            base_delay_ms: bus::BASE_DELAY_MS,
            max_backoff_ms: bus::MAX_BACKOFF_MS,
            max_retries: bus::MAX_RETRIES,
            queue_capacity: bus::QUEUE_CAPACITY,
            claim_lease_ms: bus::CLAIM_LEASE_MS,
            sweep_interval_ms: bus::SWEEP_INTERVAL_MS,
            poll_interval_ms: bus::POLL_INTERVAL_MS,
            handler_timeout_ms: bus::HANDLER_TIMEOUT_MS,
        }
    }
}

/// Consensus engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    #[serde(default = "default_consensus_timeout_per_round_secs")]
    pub timeout_per_round_secs: u64,

    #[serde(default = "default_consensus_max_rounds")]
    pub max_rounds: u32,

    /// Default pass threshold in (0, 1].
    #[serde(default = "default_consensus_threshold")]
    pub threshold: f64,
}

fn default_consensus_timeout_per_round_secs() -> u64 {
    consensus::TIMEOUT_PER_ROUND_SECS
}
fn default_consensus_max_rounds() -> u32 {
    consensus::MAX_ROUNDS
}
fn default_consensus_threshold() -> f64 {
    consensus::THRESHOLD
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            timeout_per_round_secs: consensus::TIMEOUT_PER_ROUND_SECS,
            max_rounds: consensus::MAX_ROUNDS,
            threshold: consensus::THRESHOLD,
        }
    }
}

/// Conversation mediator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediatorConfig {
    #[serde(default = "default_mediator_conversation_timeout_secs")]
    pub conversation_timeout_secs: u64,

    #[serde(default = "default_mediator_turn_timeout_secs")]
    pub turn_timeout_secs: u64,

    #[serde(default = "default_mediator_max_negotiation_rounds")]
    pub max_negotiation_rounds: u32,

    #[serde(default = "default_mediator_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

fn default_mediator_conversation_timeout_secs() -> u64 {
    mediator::CONVERSATION_TIMEOUT_SECS
}
fn default_mediator_turn_timeout_secs() -> u64 {
    mediator::TURN_TIMEOUT_SECS
}
fn default_mediator_max_negotiation_rounds() -> u32 {
    mediator::MAX_NEGOTIATION_ROUNDS
}
fn default_mediator_sweep_interval_ms() -> u64 {
    mediator::SWEEP_INTERVAL_MS
}

impl Default for MediatorConfig {
    fn default() -> Self {
        Self {
            conversation_timeout_secs: mediator::CONVERSATION_TIMEOUT_SECS,
            turn_timeout_secs: mediator::TURN_TIMEOUT_SECS,
            max_negotiation_rounds: mediator::MAX_NEGOTIATION_ROUNDS,
            sweep_interval_ms: mediator::SWEEP_INTERVAL_MS,
        }
    }
}

/// Vector similarity metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityMetric {
    #[default]
    Cosine,
    Euclidean,
    Dot,
    Manhattan,
}

/// Retention durations per policy tier, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_retention_ephemeral_secs")]
    pub ephemeral_secs: u64,

    #[serde(default = "default_retention_session_secs")]
    pub session_secs: u64,

    #[serde(default = "default_retention_persistent_secs")]
    pub persistent_secs: u64,

    #[serde(default = "default_retention_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_retention_ephemeral_secs() -> u64 {
    knowledge::EPHEMERAL_TTL_SECS
}
fn default_retention_session_secs() -> u64 {
    knowledge::SESSION_TTL_SECS
}
fn default_retention_persistent_secs() -> u64 {
    knowledge::PERSISTENT_TTL_SECS
}
fn default_retention_sweep_interval_secs() -> u64 {
    knowledge::RETENTION_SWEEP_INTERVAL_SECS
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            ephemeral_secs: knowledge::EPHEMERAL_TTL_SECS,
            session_secs: knowledge::SESSION_TTL_SECS,
            persistent_secs: knowledge::PERSISTENT_TTL_SECS,
            sweep_interval_secs: knowledge::RETENTION_SWEEP_INTERVAL_SECS,
        }
    }
}

/// Optional Qdrant vector backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QdrantConfig {
    /// Disabled by default; the in-process backend is the default
    /// substrate.
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_qdrant_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_qdrant_collection")]
    pub collection: String,

    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_qdrant_endpoint() -> String {
    std::env::var("QDRANT_ENDPOINT").unwrap_or_else(|_| endpoints::QDRANT_DEFAULT.to_string())
}

fn default_qdrant_collection() -> String {
    "sentinel_knowledge".to_string()
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_qdrant_endpoint(),
            collection: default_qdrant_collection(),
            api_key: None,
        }
    }
}

/// Keyword index backing.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KeywordIndexConfig {
    /// On-disk index directory; in-RAM when unset.
    #[serde(default)]
    pub index_path: Option<String>,
}

/// Knowledge store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    #[serde(default = "default_knowledge_embedding_dim")]
    pub embedding_dim: usize,

    #[serde(default)]
    pub similarity: SimilarityMetric,

    #[serde(default = "default_knowledge_similarity_threshold")]
    pub similarity_threshold: f64,

    #[serde(default = "default_knowledge_max_results")]
    pub max_results: usize,

    /// Hybrid fusion weight for the vector pass.
    #[serde(default = "default_knowledge_vector_weight")]
    pub vector_weight: f64,

    /// Hybrid fusion weight for the keyword pass.
    #[serde(default = "default_knowledge_keyword_weight")]
    pub keyword_weight: f64,

    #[serde(default = "default_knowledge_embedding_cache_size")]
    pub embedding_cache_size: usize,

    /// Bounded confidence nudge per feedback unit.
    #[serde(default = "default_knowledge_feedback_rate")]
    pub feedback_rate: f64,

    #[serde(default = "default_knowledge_max_graph_depth")]
    pub max_graph_depth: usize,

    #[serde(default)]
    pub retention: RetentionConfig,

    #[serde(default)]
    pub qdrant: QdrantConfig,

    #[serde(default)]
    pub keyword_index: KeywordIndexConfig,
}

fn default_knowledge_embedding_dim() -> usize {
    knowledge::EMBEDDING_DIM
}
fn default_knowledge_similarity_threshold() -> f64 {
    knowledge::SIMILARITY_THRESHOLD
}
fn default_knowledge_max_results() -> usize {
    knowledge::MAX_RESULTS
}
fn default_knowledge_vector_weight() -> f64 {
    knowledge::VECTOR_WEIGHT
}
fn default_knowledge_keyword_weight() -> f64 {
    knowledge::KEYWORD_WEIGHT
}
fn default_knowledge_embedding_cache_size() -> usize {
    knowledge::EMBEDDING_CACHE_SIZE
}
fn default_knowledge_feedback_rate() -> f64 {
    knowledge::FEEDBACK_RATE
}
fn default_knowledge_max_graph_depth() -> usize {
    knowledge::MAX_GRAPH_DEPTH
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            embedding_dim: knowledge::EMBEDDING_DIM,
            similarity: SimilarityMetric::Cosine,
            similarity_threshold: knowledge::SIMILARITY_THRESHOLD,
            max_results: knowledge::MAX_RESULTS,
            vector_weight: knowledge::VECTOR_WEIGHT,
            keyword_weight: knowledge::KEYWORD_WEIGHT,
            embedding_cache_size: knowledge::EMBEDDING_CACHE_SIZE,
            feedback_rate: knowledge::FEEDBACK_RATE,
            max_graph_depth: knowledge::MAX_GRAPH_DEPTH,
            retention: RetentionConfig::default(),
            qdrant: QdrantConfig::default(),
            keyword_index: KeywordIndexConfig::default(),
        }
    }
}

/// Agent initialization strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InitStrategy {
    /// Create agents on first use.
    #[default]
    Lazy,
    /// Create every registered agent at `initialize`.
    Eager,
    /// Agents are injected by the host; the orchestrator creates none.
    Custom,
}

/// Agent orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub init_strategy: InitStrategy,

    /// Abort initialization on any dependency failure; otherwise proceed
    /// with a partial set and record degraded components.
    #[serde(default)]
    pub fail_fast: bool,
}

/// Persistence configuration for ScyllaDB.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Enable ScyllaDB persistence (false = in-memory only).
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_scylla_hosts")]
    pub scylla_hosts: Vec<String>,

    #[serde(default = "default_scylla_keyspace")]
    pub keyspace: String,

    #[serde(default = "default_replication_factor")]
    pub replication_factor: u8,
}

fn default_scylla_hosts() -> Vec<String> {
    std::env::var("SCYLLA_HOSTS")
        .map(|s| s.split(',').map(|h| h.trim().to_string()).collect())
        .unwrap_or_else(|_| vec![endpoints::SCYLLA_DEFAULT.to_string()])
}

fn default_scylla_keyspace() -> String {
    std::env::var("SCYLLA_KEYSPACE").unwrap_or_else(|_| "sentinel".to_string())
}

fn default_replication_factor() -> u8 {
    1
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            scylla_hosts: default_scylla_hosts(),
            keyspace: default_scylla_keyspace(),
            replication_factor: default_replication_factor(),
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings before any component is constructed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_bus()?;
        self.validate_consensus()?;
        self.validate_knowledge()?;
        Ok(())
    }

    fn validate_bus(&self) -> Result<(), ConfigError> {
        if self.bus.workers == 0 {
            return Err(ConfigError::Invalid("bus.workers must be >= 1".into()));
        }
        if self.bus.batch_size == 0 {
            return Err(ConfigError::Invalid("bus.batch_size must be >= 1".into()));
        }
        if self.bus.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "bus.queue_capacity must be >= 1".into(),
            ));
        }
        if self.bus.max_backoff_ms < self.bus.base_delay_ms {
            return Err(ConfigError::Invalid(
                "bus.max_backoff_ms must be >= bus.base_delay_ms".into(),
            ));
        }
        Ok(())
    }

    fn validate_consensus(&self) -> Result<(), ConfigError> {
        if !(self.consensus.threshold > 0.0 && self.consensus.threshold <= 1.0) {
            return Err(ConfigError::Invalid(
                "consensus.threshold must be in (0, 1]".into(),
            ));
        }
        if self.consensus.max_rounds == 0 {
            return Err(ConfigError::Invalid(
                "consensus.max_rounds must be >= 1".into(),
            ));
        }
        Ok(())
    }

    fn validate_knowledge(&self) -> Result<(), ConfigError> {
        let k = &self.knowledge;
        if k.embedding_dim == 0 {
            return Err(ConfigError::Invalid(
                "knowledge.embedding_dim must be >= 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&k.similarity_threshold) {
            return Err(ConfigError::Invalid(
                "knowledge.similarity_threshold must be in [0, 1]".into(),
            ));
        }
        if k.vector_weight < 0.0 || k.keyword_weight < 0.0 {
            return Err(ConfigError::Invalid(
                "knowledge fusion weights must be non-negative".into(),
            ));
        }
        if k.vector_weight + k.keyword_weight <= 0.0 {
            return Err(ConfigError::Invalid(
                "knowledge fusion weights must sum to a positive value".into(),
            ));
        }
        Ok(())
    }
}

/// Load settings from an optional file plus `SENTINEL_`-prefixed
/// environment variables. Environment overrides file values; sections use
/// `__` as separator (e.g. `SENTINEL_BUS__WORKERS=8`).
pub fn load_settings(path: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    if let Some(path) = path {
        if !Path::new(path).exists() {
            return Err(ConfigError::FileNotFound(path.to_string()));
        }
        builder = builder.add_source(File::with_name(path));
    }

    let settings: Settings = builder
        .add_source(Environment::with_prefix("SENTINEL").separator("__"))
        .build()?
        .try_deserialize()?;

    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.bus.max_retries, 3);
        assert_eq!(settings.knowledge.embedding_dim, 384);
        assert_eq!(settings.knowledge.vector_weight, 0.6);
        assert_eq!(settings.knowledge.keyword_weight, 0.4);
        assert!(!settings.persistence.enabled);
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let mut settings = Settings::default();
        settings.consensus.threshold = 0.0;
        assert!(settings.validate().is_err());
        settings.consensus.threshold = 1.2;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut settings = Settings::default();
        settings.bus.workers = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_degenerate_fusion_weights_rejected() {
        let mut settings = Settings::default();
        settings.knowledge.vector_weight = 0.0;
        settings.knowledge.keyword_weight = 0.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(matches!(
            load_settings(Some("/nonexistent/sentinel.yaml")),
            Err(ConfigError::FileNotFound(_))
        ));
    }
}
