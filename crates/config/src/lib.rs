//! Configuration management for the agent coordination core
//!
//! Supports loading configuration from:
//! - YAML/TOML files
//! - Environment variables (SENTINEL_ prefix, `__` section separator)
//! - Runtime overrides (atomic swap by the embedding host)
//!
//! Every section carries serde defaults so an empty file is a valid
//! configuration, and `Settings::validate()` rejects out-of-range values
//! before any component is constructed.

pub mod constants;
pub mod settings;

pub use settings::{
    load_settings, BusConfig, ConsensusConfig, InitStrategy, KeywordIndexConfig, KnowledgeConfig,
    MediatorConfig, OrchestratorConfig, PersistenceConfig, QdrantConfig, RetentionConfig,
    RuntimeEnvironment, Settings, SimilarityMetric,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    #[error("failed to parse configuration: {0}")]
    Parse(String),

    #[error("invalid configuration value: {0}")]
    Invalid(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        match err {
            config::ConfigError::NotFound(name) => ConfigError::FileNotFound(name),
            other => ConfigError::Parse(other.to_string()),
        }
    }
}
