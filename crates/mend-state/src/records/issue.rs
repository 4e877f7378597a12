//! Issue records and the review-status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::fix::FixId;
use super::project::ProjectId;
use crate::storage_traits::Fingerprint;

/// Unique identifier for an issue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IssueId(pub String);

impl IssueId {
    /// Generate a new random IssueId.
    pub fn new() -> Self {
        IssueId(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for IssueId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for IssueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Closed set of defect categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    Style,
    ErrorHandling,
    Security,
    Performance,
    Smell,
    Architecture,
    Other,
}

impl IssueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueKind::Style => "style",
            IssueKind::ErrorHandling => "error_handling",
            IssueKind::Security => "security",
            IssueKind::Performance => "performance",
            IssueKind::Smell => "smell",
            IssueKind::Architecture => "architecture",
            IssueKind::Other => "other",
        }
    }
}

impl std::fmt::Display for IssueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Issue severity, ordered from most to least urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    /// Weight used by cost-benefit and prioritization arithmetic.
    pub fn weight(self) -> f64 {
        match self {
            Severity::Critical => 1.0,
            Severity::High => 0.75,
            Severity::Medium => 0.5,
            Severity::Low => 0.25,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Review status of an issue.
///
/// Legal transitions:
/// - `pending -> approved` (orchestrator decision or human review)
/// - `pending -> rejected` (human review only)
/// - `pending -> deferred` (orchestrator, negative cost-benefit)
/// - `approved -> resolved` (fix outcome is success)
/// - any non-terminal -> `superseded` (defect no longer present in source)
///
/// `resolved`, `rejected`, and `superseded` are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
    Deferred,
    Resolved,
    Superseded,
}

impl ReviewStatus {
    /// Whether this status is absorbing.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ReviewStatus::Resolved | ReviewStatus::Rejected | ReviewStatus::Superseded
        )
    }

    /// Whether the state machine permits moving from `self` to `to`.
    pub fn can_transition_to(self, to: ReviewStatus) -> bool {
        use ReviewStatus::*;
        match (self, to) {
            (Pending, Approved) | (Pending, Rejected) | (Pending, Deferred) => true,
            (Approved, Resolved) => true,
            (from, Superseded) if !from.is_terminal() => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::Approved => "approved",
            ReviewStatus::Rejected => "rejected",
            ReviewStatus::Deferred => "deferred",
            ReviewStatus::Resolved => "resolved",
            ReviewStatus::Superseded => "superseded",
        }
    }
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One detected defect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub id: IssueId,
    pub project_id: ProjectId,
    pub path: String,
    pub line: u32,
    pub kind: IssueKind,
    pub severity: Severity,
    pub message: String,
    /// Stable hash identifying "the same defect" across runs.
    pub fingerprint: Fingerprint,
    /// Id of the detector that raised the issue.
    pub detector_id: String,
    /// How many times the same fingerprint has been seen while open.
    pub occurrence_count: u32,
    pub status: ReviewStatus,
    pub fix_id: Option<FixId>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Who resolved the issue: a fix id, or `None` for human resolutions.
    pub resolved_by: Option<String>,
}

/// Fields supplied by a detector when raising an issue.
///
/// The store assigns identity, occurrence count, and status on insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewIssue {
    pub project_id: ProjectId,
    pub path: String,
    pub line: u32,
    pub kind: IssueKind,
    pub severity: Severity,
    pub message: String,
    pub fingerprint: Fingerprint,
    pub detector_id: String,
}

impl NewIssue {
    /// Materialize a full issue row in `pending` status with occurrence 1.
    pub fn into_issue(self) -> Issue {
        Issue {
            id: IssueId::new(),
            project_id: self.project_id,
            path: self.path,
            line: self.line,
            kind: self.kind,
            severity: self.severity,
            message: self.message,
            fingerprint: self.fingerprint,
            detector_id: self.detector_id,
            occurrence_count: 1,
            status: ReviewStatus::Pending,
            fix_id: None,
            created_at: Utc::now(),
            resolved_at: None,
            resolved_by: None,
        }
    }
}

/// One audit row per status transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueAudit {
    pub issue_id: IssueId,
    pub from: ReviewStatus,
    pub to: ReviewStatus,
    /// "orchestrator", "crawler", or a human reviewer identity.
    pub actor: String,
    pub fix_id: Option<FixId>,
    pub at: DateTime<Utc>,
}

/// Filter for issue listing queries. All fields are conjunctive.
#[derive(Debug, Clone, Default)]
pub struct IssueFilter {
    pub project_id: Option<ProjectId>,
    pub status: Option<ReviewStatus>,
    pub severity: Option<Severity>,
    pub kind: Option<IssueKind>,
    pub path: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

impl IssueFilter {
    pub fn for_project(project_id: ProjectId) -> Self {
        Self {
            project_id: Some(project_id),
            limit: 100,
            ..Default::default()
        }
    }

    pub fn matches(&self, issue: &Issue) -> bool {
        self.project_id
            .as_ref()
            .map(|p| issue.project_id == *p)
            .unwrap_or(true)
            && self.status.map(|s| issue.status == s).unwrap_or(true)
            && self.severity.map(|s| issue.severity == s).unwrap_or(true)
            && self.kind.map(|k| issue.kind == k).unwrap_or(true)
            && self
                .path
                .as_ref()
                .map(|p| issue.path == *p)
                .unwrap_or(true)
    }
}
