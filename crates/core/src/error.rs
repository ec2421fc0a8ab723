//! Error types for the ContextForge domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; `Error` wraps them all.

use thiserror::Error;

/// The top-level error type for all ContextForge operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Assembly errors ---
    #[error("Assembly error: {0}")]
    Assembly(#[from] AssemblyError),

    // --- Source errors ---
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    // --- Ledger errors ---
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures of the packing stage. Fatal to the request: no partial outcome
/// and no lineage record are produced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblyError {
    #[error(
        "Required item from '{source_name}' needs {required_tokens} tokens but only {available_tokens} are available"
    )]
    Budget {
        source_name: String,
        required_tokens: usize,
        available_tokens: usize,
    },

    #[error("Invalid assembly request: {0}")]
    InvalidRequest(String),
}

/// Failures of an individual data source.
///
/// `Clone` because a single-flight computation hands the same error to every
/// waiter that joined it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("Source '{source_name}' failed: {reason}")]
    Failed { source_name: String, reason: String },

    #[error("Source '{source_name}' timed out after {timeout_ms}ms")]
    Timeout { source_name: String, timeout_ms: u64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Source computation cancelled: {0}")]
    Cancelled(String),
}

impl SourceError {
    /// Convenience constructor for the common failure case.
    pub fn failed(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Failed {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("Context record not found: {0}")]
    NotFound(String),

    #[error("Context record already exists: {0}")]
    Duplicate(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Record serialization failed: {0}")]
    Serialization(String),
}
