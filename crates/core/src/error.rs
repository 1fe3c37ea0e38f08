//! Shared error taxonomy
//!
//! Every component crate defines its own `thiserror` enum and converts into
//! this shared taxonomy at the crate boundary. The REST shim maps `code()`
//! and `retryable()` into the structured error body it returns to clients.

use thiserror::Error;

/// Error kinds shared across the coordination core.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed payload, unknown enum value, violated schema.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Unknown message or knowledge type.
    #[error("invalid type: {0}")]
    InvalidType(String),

    /// Missing entity, message, conversation or session.
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation disallowed in the current state (wrong recipient,
    /// stale round, terminal conversation).
    #[error("state conflict: {0}")]
    StateConflict(String),

    /// Queue capacity exceeded; caller may retry later.
    #[error("backpressure: {0}")]
    Backpressure(String),

    /// Operation exceeded its allotted duration.
    #[error("timeout: {0}")]
    Timeout(String),

    /// A dependency (store, embedding provider, agent) cannot serve now.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Cooperative cancellation observed.
    #[error("cancelled")]
    Cancelled,

    /// Explicitly retry-safe failure.
    #[error("transient: {0}")]
    Transient(String),

    /// Corruption or invariant violation. Never silently recovered.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl Error {
    /// Whether the caller may safely retry the operation.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::Backpressure(_) | Self::Timeout(_) | Self::Unavailable(_) | Self::Transient(_)
        )
    }

    /// Stable machine-readable code for the REST error body.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::InvalidType(_) => "invalid_type",
            Self::NotFound(_) => "not_found",
            Self::StateConflict(_) => "state_conflict",
            Self::Backpressure(_) => "backpressure",
            Self::Timeout(_) => "timeout",
            Self::Unavailable(_) => "unavailable",
            Self::Cancelled => "cancelled",
            Self::Transient(_) => "transient",
            Self::Fatal(_) => "fatal",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
