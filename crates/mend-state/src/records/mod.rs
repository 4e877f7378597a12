//! Persisted record types for the Mend object store
//!
//! Records:
//! - `issue`: detected defects with their review-status state machine
//! - `fix`: fix-attempt records produced by the orchestrator
//! - `pattern`: learned defect-to-fix mappings with derived confidence
//! - `expert`: per-project expert guides and calibration buckets
//! - `project`: tenants and projects (the ownership roots)
//! - `health`: append-only file-health snapshots

mod expert;
mod fix;
mod health;
mod issue;
mod pattern;
mod project;

pub use expert::{CalibrationBucket, ExpertGuide, ExpertKind};
pub use fix::{
    Decision, FixId, FixOutcome, FixRecord, GeneratorKind, ImpactSummary, StageName, StageStamp,
    VerifierVerdict,
};
pub use health::{FileHealth, HealthComponents};
pub use issue::{Issue, IssueAudit, IssueFilter, IssueId, IssueKind, NewIssue, ReviewStatus, Severity};
pub use pattern::Pattern;
pub use project::{PlanTier, Project, ProjectId, Tenant, TenantId};
