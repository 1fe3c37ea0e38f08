//! Centralized default constants
//!
//! Single source of truth for defaults shared between `settings.rs` and
//! component-local `Default` impls.

/// Message bus defaults.
pub mod bus {
    /// Delivery worker tasks.
    pub const WORKERS: usize = 4;
    /// Rows claimed per worker pass.
    pub const BATCH_SIZE: usize = 32;
    /// First retry delay; doubles per failed attempt.
    pub const BASE_DELAY_MS: u64 = 1_000;
    /// Backoff ceiling.
    pub const MAX_BACKOFF_MS: u64 = 60_000;
    pub const MAX_RETRIES: u32 = 3;
    /// Pending rows beyond this reject sends with backpressure.
    pub const QUEUE_CAPACITY: usize = 10_000;
    /// Claim lease; a crashed worker's batch re-becomes claimable after
    /// this lapses.
    pub const CLAIM_LEASE_MS: u64 = 30_000;
    /// Expiry/dead-letter sweeper period.
    pub const SWEEP_INTERVAL_MS: u64 = 100;
    /// Worker idle poll period.
    pub const POLL_INTERVAL_MS: u64 = 50;
    /// Per-delivery handler timeout.
    pub const HANDLER_TIMEOUT_MS: u64 = 30_000;
}

/// Consensus engine defaults.
pub mod consensus {
    pub const TIMEOUT_PER_ROUND_SECS: u64 = 60;
    pub const MAX_ROUNDS: u32 = 3;
    pub const THRESHOLD: f64 = 0.5;
}

/// Conversation mediator defaults.
pub mod mediator {
    /// Whole-conversation inactivity timeout.
    pub const CONVERSATION_TIMEOUT_SECS: u64 = 600;
    /// Pending-respondent timeout in turn-taking.
    pub const TURN_TIMEOUT_SECS: u64 = 60;
    pub const MAX_NEGOTIATION_ROUNDS: u32 = 3;
    pub const SWEEP_INTERVAL_MS: u64 = 1_000;
}

/// Knowledge store defaults.
pub mod knowledge {
    pub const EMBEDDING_DIM: usize = 384;
    pub const SIMILARITY_THRESHOLD: f64 = 0.5;
    pub const MAX_RESULTS: usize = 10;
    /// Hybrid fusion weights; must sum to a positive value.
    pub const VECTOR_WEIGHT: f64 = 0.6;
    pub const KEYWORD_WEIGHT: f64 = 0.4;
    pub const EMBEDDING_CACHE_SIZE: usize = 1_024;
    /// Bounded confidence nudge per feedback unit.
    pub const FEEDBACK_RATE: f64 = 0.05;
    pub const RETENTION_SWEEP_INTERVAL_SECS: u64 = 60;
    /// Retention durations per policy tier.
    pub const EPHEMERAL_TTL_SECS: u64 = 300;
    pub const SESSION_TTL_SECS: u64 = 86_400;
    pub const PERSISTENT_TTL_SECS: u64 = 31_536_000;
    /// Bounded BFS defaults.
    pub const MAX_GRAPH_DEPTH: usize = 3;
}

/// Default service endpoints.
pub mod endpoints {
    pub const QDRANT_DEFAULT: &str = "http://127.0.0.1:6334";
    pub const SCYLLA_DEFAULT: &str = "127.0.0.1:9042";
}
