//! Error taxonomy for the Mend engineering core.
//!
//! Every user-visible failure maps to one of these variants and carries a
//! stable machine-readable code. Transient infrastructure failures are the
//! only retriable class; logical preconditions abort the current job with
//! a decision and recover on the next crawl; contract violations never
//! enqueue work.

use mend_state::StoreError;

/// Mend core errors.
#[derive(Debug, thiserror::Error)]
pub enum MendError {
    /// Store / queue / cache / model unavailable or timed out. Retriable.
    #[error("transient: {0}")]
    Transient(String),

    /// Review-status change violates the issue state machine.
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// File content moved past the hash observed at generation time.
    #[error("stale file: {0}")]
    StaleFile(String),

    /// Another worker holds the advisory lock for this (project, path).
    #[error("lock contention: {0}")]
    LockContention(String),

    /// Malformed request, unknown entity, or bad signature. Never enqueued.
    #[error("contract violation: {0}")]
    Contract(String),

    /// The candidate patch failed verification.
    #[error("verifier rejected patch: {}", .0.join("; "))]
    Verifier(Vec<String>),

    /// Configuration missing or unparsable.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Storage-layer error not covered by a more specific variant.
    #[error("storage error: {0}")]
    Store(String),
}

impl MendError {
    /// Stable machine-readable code for API responses and logs.
    pub fn code(&self) -> &'static str {
        match self {
            MendError::Transient(_) => "transient",
            MendError::InvalidTransition { .. } => "invalid_transition",
            MendError::StaleFile(_) => "stale_file",
            MendError::LockContention(_) => "lock_contention",
            MendError::Contract(_) => "contract_violation",
            MendError::Verifier(_) => "verifier_reject",
            MendError::Config(_) => "config_error",
            MendError::Io(_) => "io_error",
            MendError::Serialization(_) => "serialization_error",
            MendError::Store(_) => "storage_error",
        }
    }

    /// Whether requeueing the job can help.
    pub fn is_retriable(&self) -> bool {
        matches!(self, MendError::Transient(_) | MendError::Io(_))
    }
}

impl From<StoreError> for MendError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidTransition { from, to } => MendError::InvalidTransition { from, to },
            StoreError::Backend(msg) => MendError::Transient(msg),
            other => MendError::Store(other.to_string()),
        }
    }
}

impl From<mend_state::QueueError> for MendError {
    fn from(err: mend_state::QueueError) -> Self {
        MendError::Transient(err.to_string())
    }
}

/// Result type for Mend core operations.
pub type Result<T> = std::result::Result<T, MendError>;
