//! Mend-State: persistence substrate for the Mend platform
//!
//! This crate provides the durable layer everything else builds on:
//!
//! - `records`: persisted record types (issues, patterns, fix records,
//!   expert guides, health snapshots, tenants/projects)
//! - `storage_traits`: async store trait definitions, backend-agnostic
//! - `fakes`: in-memory implementations satisfying every trait contract
//! - `surreal`: SurrealDB-backed implementation
//! - `cache`: shared key/value cache with TTL and single-flight
//! - `queue`: durable, prioritized job queues with leases and dead-lettering
//!
//! All store traits are async. The in-memory fakes are first-class: tests
//! and the embedded CLI path run against them, and they define the contract
//! the SurrealDB backend must match.

pub mod cache;
pub mod error;
pub mod fakes;
pub mod handle;
pub mod queue;
pub mod records;
pub mod storage_traits;
pub mod surreal;

pub use cache::{Cache, CacheHandle, MemoryCache, NullCache};
pub use error::{QueueError, StoreError};
pub use fakes::{MemoryQueue, MemoryStore};
pub use handle::SurrealHandle;
pub use queue::{DeadJob, Job, JobId, JobQueue, JobState, Lease, LeaseToken, QueueName};
pub use records::{
    CalibrationBucket, Decision, ExpertGuide, ExpertKind, FileHealth, FixId, FixOutcome,
    FixRecord, GeneratorKind, HealthComponents, ImpactSummary, Issue, IssueAudit, IssueFilter,
    IssueId, IssueKind, NewIssue, Pattern, PlanTier, Project, ProjectId, ReviewStatus, Severity,
    StageName, StageStamp, Tenant, TenantId, VerifierVerdict,
};
pub use storage_traits::{
    ContentHash, ExpertStore, Fingerprint, FixLedger, HealthStore, IssueStore, ObjectStore,
    PatternStore, SnapshotStore, StoreResult, TenantDirectory,
};
pub use surreal::SurrealStore;
