//! Fix-attempt records produced by the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::expert::ExpertKind;
use super::issue::IssueId;
use super::project::ProjectId;
use crate::storage_traits::ContentHash;

/// Unique identifier for a fix record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FixId(pub String);

impl FixId {
    pub fn new() -> Self {
        FixId(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for FixId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for FixId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which generation strategy produced the candidate patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeneratorKind {
    Pattern,
    Expert,
    Model,
    Hybrid,
}

impl GeneratorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeneratorKind::Pattern => "pattern",
            GeneratorKind::Expert => "expert",
            GeneratorKind::Model => "model",
            GeneratorKind::Hybrid => "hybrid",
        }
    }
}

impl std::fmt::Display for GeneratorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Terminal decision of an orchestration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Apply,
    Skip,
    Defer,
}

/// Observed outcome of an applied fix.
///
/// `Unknown` until the monitor window closes or a regression fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixOutcome {
    Success,
    Regression,
    Unknown,
}

/// Stage-2 impact prediction, persisted on the fix record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactSummary {
    /// Files likely affected by the change (textual reachability).
    pub affected_files: Vec<String>,
    /// Whether breaking-change markers were found (public API, schema edits).
    pub breaking_change: bool,
    /// Risk score in [0, 1].
    pub risk: f64,
}

/// Verifier verdict, persisted on the fix record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifierVerdict {
    pub pass: bool,
    /// Human-readable violation descriptions; empty on pass.
    pub violations: Vec<String>,
}

impl VerifierVerdict {
    pub fn pass() -> Self {
        Self {
            pass: true,
            violations: Vec::new(),
        }
    }

    pub fn fail(violations: Vec<String>) -> Self {
        Self {
            pass: false,
            violations,
        }
    }
}

/// The ten orchestrator stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Prioritize,
    PredictImpact,
    CostBenefit,
    Generate,
    Calibrate,
    Verify,
    Explain,
    Decide,
    Apply,
    Monitor,
}

impl StageName {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Prioritize => "prioritize",
            StageName::PredictImpact => "predict_impact",
            StageName::CostBenefit => "cost_benefit",
            StageName::Generate => "generate",
            StageName::Calibrate => "calibrate",
            StageName::Verify => "verify",
            StageName::Explain => "explain",
            StageName::Decide => "decide",
            StageName::Apply => "apply",
            StageName::Monitor => "monitor",
        }
    }
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Timestamp for one completed stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageStamp {
    pub stage: StageName,
    pub at: DateTime<Utc>,
}

/// One attempted fix, written once at the end of an orchestration run.
///
/// Only `outcome` and `rollback` mutate after the append, and each is set
/// exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixRecord {
    pub id: FixId,
    pub issue_id: IssueId,
    pub project_id: ProjectId,
    pub path: String,
    pub generator: Option<GeneratorKind>,
    /// Serialized candidate patch (JSON hunk list), if generation ran.
    pub patch: Option<String>,
    pub predicted_impact: Option<ImpactSummary>,
    /// benefit / cost ratio from stage 3.
    pub cost_benefit: Option<f64>,
    pub raw_confidence: Option<f64>,
    pub calibrated_confidence: Option<f64>,
    pub verifier_verdict: Option<VerifierVerdict>,
    pub decision: Decision,
    /// Machine-readable reason code for skip/defer decisions.
    pub reason: Option<String>,
    /// Human-readable rationale from the explain stage.
    pub explanation: Option<String>,
    pub applied: bool,
    /// Set when apply aborted because the file changed under us.
    pub stale: bool,
    /// Content hash observed at generation time, re-checked at apply.
    pub base_hash: Option<ContentHash>,
    /// Pre-apply file content, kept for rollback while monitoring.
    pub pre_apply_content: Option<String>,
    /// Expert guides consulted during generation.
    pub consulted_experts: Vec<ExpertKind>,
    /// Monitor window expiry; `None` when no monitoring was registered.
    pub monitor_until: Option<DateTime<Utc>>,
    pub rollback: bool,
    pub outcome: FixOutcome,
    /// Per-stage completion timestamps, monotonic in stage order.
    pub stages: Vec<StageStamp>,
    pub created_at: DateTime<Utc>,
}

impl FixRecord {
    /// Start an empty record for an orchestration run.
    ///
    /// The record is held in memory while stages run and appended to the
    /// ledger only once a terminal decision is reached.
    pub fn begin(issue_id: IssueId, project_id: ProjectId, path: impl Into<String>) -> Self {
        Self {
            id: FixId::new(),
            issue_id,
            project_id,
            path: path.into(),
            generator: None,
            patch: None,
            predicted_impact: None,
            cost_benefit: None,
            raw_confidence: None,
            calibrated_confidence: None,
            verifier_verdict: None,
            decision: Decision::Skip,
            reason: None,
            explanation: None,
            applied: false,
            stale: false,
            base_hash: None,
            pre_apply_content: None,
            consulted_experts: Vec::new(),
            monitor_until: None,
            rollback: false,
            outcome: FixOutcome::Unknown,
            stages: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Record completion of a stage.
    ///
    /// Panics if called with a stage at or before the last recorded one:
    /// out-of-order stamps mean the orchestrator itself is broken.
    pub fn stamp(&mut self, stage: StageName) {
        if let Some(last) = self.stages.last() {
            assert!(
                stage > last.stage,
                "stage {stage} stamped after {} - orchestrator ran stages out of order",
                last.stage
            );
        }
        self.stages.push(StageStamp {
            stage,
            at: Utc::now(),
        });
    }

    /// Whether the stage stamps are monotonic in both stage order and time.
    pub fn stamps_monotonic(&self) -> bool {
        self.stages
            .windows(2)
            .all(|w| w[0].stage < w[1].stage && w[0].at <= w[1].at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> FixRecord {
        FixRecord::begin(IssueId::new(), ProjectId::new(), "src/lib.rs")
    }

    #[test]
    fn test_stamps_are_monotonic() {
        let mut fix = record();
        fix.stamp(StageName::Prioritize);
        fix.stamp(StageName::PredictImpact);
        fix.stamp(StageName::Generate);
        fix.stamp(StageName::Apply);
        assert!(fix.stamps_monotonic());
    }

    #[test]
    #[should_panic(expected = "out of order")]
    fn test_out_of_order_stamp_panics() {
        let mut fix = record();
        fix.stamp(StageName::Verify);
        fix.stamp(StageName::Generate);
    }

    #[test]
    fn test_begin_defaults() {
        let fix = record();
        assert_eq!(fix.outcome, FixOutcome::Unknown);
        assert!(!fix.applied);
        assert!(!fix.rollback);
        assert!(fix.stages.is_empty());
    }

    #[test]
    fn test_verdict_constructors() {
        assert!(VerifierVerdict::pass().pass);
        let fail = VerifierVerdict::fail(vec!["touches forbidden region".to_string()]);
        assert!(!fail.pass);
        assert_eq!(fail.violations.len(), 1);
    }
}
