//! Storage trait definitions for the Mend object store
//!
//! These traits define the persistence abstractions:
//! - `IssueStore`: issue dedup, listing, and the review-status FSM
//! - `FixLedger`: append-only fix records with write-once outcome fields
//! - `PatternStore`: learned patterns with atomic confidence recompute
//! - `SnapshotStore`: (project, path, hash) crawl dedup
//! - `HealthStore`: append-only file-health history
//! - `ExpertStore`: expert guides and calibration buckets
//! - `TenantDirectory`: tenants and projects, with cascading delete
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module; `surreal` provides the durable
//! backend. All writes for a single issue are linearizable per-issue;
//! writes across issues may interleave.

use async_trait::async_trait;
use sha2::Sha256;

use crate::error::StoreError;
use crate::records::{
    CalibrationBucket, ExpertGuide, ExpertKind, FileHealth, FixId, FixOutcome, FixRecord,
    GeneratorKind, Issue, IssueAudit, IssueFilter, IssueId, IssueKind, NewIssue, Pattern, Project,
    ProjectId, ReviewStatus, Tenant, TenantId,
};

/// Result type for storage operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Hash newtypes
// ---------------------------------------------------------------------------

/// Content hash of a file (SHA-256 hex string).
///
/// The inner field is private to guarantee the string is always valid
/// lowercase hex produced by `from_bytes` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ContentHash(String);

impl ContentHash {
    /// Compute the SHA-256 hash of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentHash(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentHash {
    type Error = StoreError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StoreError::InvalidDigest(s));
        }
        Ok(ContentHash(s.to_ascii_lowercase()))
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable defect fingerprint (SHA-256 hex string).
///
/// A function of kind, normalized message, path, and detector id: the same
/// defect always hashes to the same fingerprint across runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Build a fingerprint from its defining parts.
    ///
    /// The message should already be normalized (lowercased, digits and
    /// quoted fragments stripped) so incidental variation does not split
    /// one defect into many fingerprints.
    pub fn from_parts(kind: &str, normalized_message: &str, path: &str, detector_id: &str) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(kind.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(normalized_message.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(path.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(detector_id.as_bytes());
        Fingerprint(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = StoreError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StoreError::InvalidDigest(s));
        }
        Ok(Fingerprint(s.to_ascii_lowercase()))
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// IssueStore
// ---------------------------------------------------------------------------

/// Issue persistence with fingerprint dedup and the review-status FSM.
///
/// Guarantees:
/// - At most one issue per (project, fingerprint) is in a non-terminal
///   status at any time; `upsert_issue` increments the open row's
///   occurrence count instead of inserting a duplicate.
/// - `transition_issue` enforces the state machine and writes one audit
///   row per successful transition; illegal moves fail with
///   `InvalidTransition` and leave the row unchanged.
#[async_trait]
pub trait IssueStore: Send + Sync {
    /// Insert a new issue, or bump the occurrence count of the open issue
    /// with the same (project, fingerprint). Returns the surviving id.
    async fn upsert_issue(&self, issue: NewIssue) -> StoreResult<IssueId>;

    /// Transition an issue's review status. `fix_id` links the fix
    /// responsible for `resolved`/`superseded` transitions, when one exists.
    async fn transition_issue(
        &self,
        id: &IssueId,
        to: ReviewStatus,
        actor: &str,
        fix_id: Option<&FixId>,
    ) -> StoreResult<()>;

    async fn get_issue(&self, id: &IssueId) -> StoreResult<Issue>;

    /// The open (non-terminal) issue for a fingerprint, if any.
    async fn find_open(
        &self,
        project_id: &ProjectId,
        fingerprint: &Fingerprint,
    ) -> StoreResult<Option<Issue>>;

    /// Filtered, paginated listing ordered by creation time (newest first).
    async fn list_issues(&self, filter: &IssueFilter) -> StoreResult<Vec<Issue>>;

    /// Distinct paths with at least one open issue, for crawl selection.
    async fn open_issue_paths(&self, project_id: &ProjectId) -> StoreResult<Vec<String>>;

    /// Full audit trail for an issue, oldest first.
    async fn audit_trail(&self, id: &IssueId) -> StoreResult<Vec<IssueAudit>>;
}

// ---------------------------------------------------------------------------
// FixLedger
// ---------------------------------------------------------------------------

/// Append-only fix records.
///
/// Guarantees:
/// - Records are never updated in place except `outcome` and `rollback`,
///   each of which is set exactly once; a second write fails with
///   `AlreadySet`.
#[async_trait]
pub trait FixLedger: Send + Sync {
    async fn append_fix(&self, fix: FixRecord) -> StoreResult<FixId>;

    /// Set the outcome. Fails with `AlreadySet` if the outcome has already
    /// left `Unknown`.
    async fn set_outcome(&self, id: &FixId, outcome: FixOutcome) -> StoreResult<()>;

    /// Mark the fix rolled back. Fails with `AlreadySet` on a second call.
    async fn set_rollback(&self, id: &FixId) -> StoreResult<()>;

    async fn get_fix(&self, id: &FixId) -> StoreResult<FixRecord>;

    async fn fixes_for_issue(&self, issue_id: &IssueId) -> StoreResult<Vec<FixRecord>>;

    /// Applied fixes whose monitor window is still open.
    async fn open_monitors(&self, project_id: &ProjectId) -> StoreResult<Vec<FixRecord>>;

    /// Distinct projects with at least one open monitor, for the sweeper.
    async fn monitored_projects(&self) -> StoreResult<Vec<ProjectId>>;
}

// ---------------------------------------------------------------------------
// PatternStore
// ---------------------------------------------------------------------------

/// Learned patterns keyed by fingerprint.
///
/// Guarantees:
/// - `upsert_pattern` applies its deltas, recomputes confidence and the
///   deprecation flag, and persists — all atomically.
/// - `lookup_usable` never returns a deprecated pattern.
#[async_trait]
pub trait PatternStore: Send + Sync {
    /// Apply success/failure deltas (creating the pattern if absent),
    /// recompute derived fields, and return the updated pattern.
    /// A better fix body may be recorded at the same time.
    async fn upsert_pattern(
        &self,
        fingerprint: &Fingerprint,
        delta_success: i64,
        delta_failure: i64,
        best_fix: Option<String>,
    ) -> StoreResult<Pattern>;

    /// Bump the occurrence counter (defect seen again, no fix attempt).
    async fn note_occurrence(&self, fingerprint: &Fingerprint) -> StoreResult<()>;

    async fn get_pattern(&self, fingerprint: &Fingerprint) -> StoreResult<Option<Pattern>>;

    /// A non-deprecated pattern at or above the confidence floor, if any.
    async fn lookup_usable(
        &self,
        fingerprint: &Fingerprint,
        min_confidence: f64,
    ) -> StoreResult<Option<Pattern>>;
}

// ---------------------------------------------------------------------------
// SnapshotStore
// ---------------------------------------------------------------------------

/// (project, path, content hash) crawl dedup.
///
/// Guarantees:
/// - For a given (project, path, hash), `snapshot_file` returns `true`
///   (already present) on every call after the first, so detectors never
///   re-run on unchanged content.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Record a snapshot. Returns whether it was already present.
    async fn snapshot_file(
        &self,
        project_id: &ProjectId,
        path: &str,
        hash: &ContentHash,
    ) -> StoreResult<bool>;

    /// Drop all but the latest snapshot per path. Returns rows removed.
    async fn compact(&self, project_id: &ProjectId) -> StoreResult<usize>;
}

// ---------------------------------------------------------------------------
// HealthStore
// ---------------------------------------------------------------------------

/// Append-only file-health history.
#[async_trait]
pub trait HealthStore: Send + Sync {
    async fn record_health(&self, health: FileHealth) -> StoreResult<()>;

    /// Most recent snapshot for a path, if any.
    async fn latest_health(
        &self,
        project_id: &ProjectId,
        path: &str,
    ) -> StoreResult<Option<FileHealth>>;

    /// Paths whose latest score is below `threshold`, worst first.
    async fn below_threshold(
        &self,
        project_id: &ProjectId,
        threshold: u8,
        limit: usize,
    ) -> StoreResult<Vec<FileHealth>>;

    /// All snapshots since a point in time, for trend reporting.
    async fn trend(
        &self,
        project_id: &ProjectId,
        since: chrono::DateTime<chrono::Utc>,
    ) -> StoreResult<Vec<FileHealth>>;
}

// ---------------------------------------------------------------------------
// ExpertStore
// ---------------------------------------------------------------------------

/// Expert guides and calibration buckets.
///
/// Guarantees:
/// - At most one live (non-superseded) guide per (project, kind): storing
///   a new revision supersedes the previous one atomically.
#[async_trait]
pub trait ExpertStore: Send + Sync {
    /// Store a guide, superseding any live guide of the same (project, kind).
    async fn put_guide(&self, guide: ExpertGuide) -> StoreResult<()>;

    /// All live guides for a project.
    async fn live_guides(&self, project_id: &ProjectId) -> StoreResult<Vec<ExpertGuide>>;

    /// The live guide for a (project, kind), if any.
    async fn live_guide(
        &self,
        project_id: &ProjectId,
        kind: &ExpertKind,
    ) -> StoreResult<Option<ExpertGuide>>;

    /// Record one consultation outcome; returns the updated guide.
    async fn record_consultation(&self, guide_id: &str, success: bool) -> StoreResult<ExpertGuide>;

    /// Take back one previously-recorded success (regression rollback).
    async fn revoke_success(&self, guide_id: &str) -> StoreResult<ExpertGuide>;

    /// The calibration bucket for a (generator, kind); a zeroed bucket if
    /// nothing has been observed yet.
    async fn get_bucket(
        &self,
        generator: GeneratorKind,
        kind: IssueKind,
    ) -> StoreResult<CalibrationBucket>;

    /// Record one (predicted, observed) calibration sample.
    async fn observe_bucket(
        &self,
        generator: GeneratorKind,
        kind: IssueKind,
        predicted: f64,
        success: bool,
    ) -> StoreResult<()>;
}

// ---------------------------------------------------------------------------
// TenantDirectory
// ---------------------------------------------------------------------------

/// Tenant and project registry.
///
/// Guarantees:
/// - Deleting a project cascades to every record it owns.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    async fn put_tenant(&self, tenant: Tenant) -> StoreResult<()>;

    async fn get_tenant(&self, id: &TenantId) -> StoreResult<Tenant>;

    async fn put_project(&self, project: Project) -> StoreResult<()>;

    async fn get_project(&self, id: &ProjectId) -> StoreResult<Project>;

    /// Find a tenant's project by repository URL (webhook routing).
    async fn find_project_by_repo(
        &self,
        tenant_id: &TenantId,
        repo_url: &str,
    ) -> StoreResult<Option<Project>>;

    /// Delete a project and everything it owns. Returns records removed.
    async fn delete_project(&self, id: &ProjectId) -> StoreResult<usize>;
}

/// The full object store: every persistence concern behind one handle.
pub trait ObjectStore:
    IssueStore + FixLedger + PatternStore + SnapshotStore + HealthStore + ExpertStore + TenantDirectory
{
}

impl<T> ObjectStore for T where
    T: IssueStore
        + FixLedger
        + PatternStore
        + SnapshotStore
        + HealthStore
        + ExpertStore
        + TenantDirectory
{
}
