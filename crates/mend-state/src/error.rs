//! Error types for the mend-state substrate

use thiserror::Error;

/// Errors from the object-store layer (issues, fixes, patterns, experts).
#[derive(Error, Debug)]
pub enum StoreError {
    /// Issue not found
    #[error("issue not found: {0}")]
    IssueNotFound(String),

    /// Fix record not found
    #[error("fix record not found: {0}")]
    FixNotFound(String),

    /// Pattern not found
    #[error("pattern not found: {0}")]
    PatternNotFound(String),

    /// Tenant not found
    #[error("tenant not found: {0}")]
    TenantNotFound(String),

    /// Project not found
    #[error("project not found: {0}")]
    ProjectNotFound(String),

    /// Expert guide not found
    #[error("expert guide not found: {0}")]
    GuideNotFound(String),

    /// Review-status change violates the issue state machine
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Fix outcome or rollback flag was already set (both are write-once)
    #[error("fix {fix_id}: {field} already set")]
    AlreadySet { fix_id: String, field: String },

    /// Invalid hash or fingerprint string (not 64-char lowercase hex)
    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    /// Backend I/O error
    #[error("storage backend error: {0}")]
    Backend(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<surrealdb::Error> for StoreError {
    fn from(err: surrealdb::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Errors from the job-queue layer.
#[derive(Error, Debug)]
pub enum QueueError {
    /// Lease token unknown or already expired
    #[error("lease not held: {0}")]
    LeaseNotHeld(String),

    /// Job not found in any queue
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// Backend I/O error
    #[error("queue backend error: {0}")]
    Backend(String),
}
