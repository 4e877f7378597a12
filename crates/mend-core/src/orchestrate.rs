//! The fix orchestrator: ten stages around every automated fix.
//!
//! Given a pending issue the pipeline runs prioritize, predict-impact,
//! cost-benefit, generate, calibrate, verify, explain, decide, apply,
//! monitor — in that order. Any stage may abort with a terminal decision
//! (skip or defer) and a machine-readable reason; infrastructure failures
//! are surfaced as `Transient` so the job requeues, and no fix record is
//! written until a terminal outcome is reached.
//!
//! The advisory (project, path) lock is held for stages 9–10 only. Issue
//! status transitions happen after a successful apply, so an aborted run
//! leaves the issue pending for the next crawl.

use std::path::Path;

use tokio::time::timeout;
use tracing::{info, instrument, warn};

use mend_state::{
    ContentHash, Decision, ExpertStore, FixId, FixLedger, FixOutcome, FixRecord, HealthStore,
    Issue, IssueFilter, IssueId, IssueStore, JobQueue, PatternStore, Project, QueueName,
    ReviewStatus, StageName, TenantDirectory,
};

use crate::context::{Clock as _, ServiceContext};
use crate::error::{MendError, Result};
use crate::events::{LearningBus, LearningEvent};
use crate::experts;
use crate::generate::FixGenerator;
use crate::learning::LearningService;
use crate::verify::FixVerifier;

/// Priority class from the prioritize stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityClass {
    Now,
    Soon,
    Later,
    Drop,
}

/// Terminal result of one orchestration run.
#[derive(Debug, Clone)]
pub struct OrchestrationOutcome {
    pub decision: Decision,
    pub reason: Option<String>,
    pub fix_id: Option<FixId>,
}

/// C8: the ten-stage fix pipeline.
pub struct Orchestrator {
    ctx: ServiceContext,
    bus: LearningBus,
}

impl Orchestrator {
    /// Build an orchestrator with the learning service subscribed.
    pub fn new(ctx: ServiceContext) -> Self {
        let mut bus = LearningBus::new();
        bus.subscribe(std::sync::Arc::new(LearningService::new(ctx.clone())));
        Self { ctx, bus }
    }

    /// Run the pipeline for one issue.
    ///
    /// Idempotent under at-least-once delivery: a second run after a
    /// successful apply aborts with defer/stale and writes nothing.
    #[instrument(skip(self), fields(issue = %issue_id))]
    pub async fn run_issue(&self, issue_id: &IssueId) -> Result<OrchestrationOutcome> {
        let issue = self.ctx.store.get_issue(issue_id).await?;

        // Duplicate delivery of an already-applied fix: the base this run
        // would generate against is gone.
        let prior = self.ctx.store.fixes_for_issue(issue_id).await?;
        if prior.iter().any(|f| f.applied) {
            return Ok(OrchestrationOutcome {
                decision: Decision::Defer,
                reason: Some("stale".to_string()),
                fix_id: None,
            });
        }
        if issue.status != ReviewStatus::Pending {
            return Ok(OrchestrationOutcome {
                decision: Decision::Skip,
                reason: Some("not-pending".to_string()),
                fix_id: None,
            });
        }

        let project = self.ctx.store.get_project(&issue.project_id).await?;
        let abs_path = project.root_path.join(&issue.path);
        let mut fix = FixRecord::begin(issue.id.clone(), project.id.clone(), issue.path.clone());

        // -- 1. Prioritize ---------------------------------------------------
        let class = self.prioritize(&issue).await?;
        fix.stamp(StageName::Prioritize);
        if class == PriorityClass::Drop {
            return self.terminal(fix, &issue, Decision::Skip, "priority-drop", false).await;
        }

        // -- 2. Predict impact -----------------------------------------------
        let content = match tokio::fs::read_to_string(&abs_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // The file is gone; the defect cannot exist any more.
                self.ctx
                    .store
                    .transition_issue(&issue.id, ReviewStatus::Superseded, "orchestrator", None)
                    .await?;
                return Ok(OrchestrationOutcome {
                    decision: Decision::Skip,
                    reason: Some("file-missing".to_string()),
                    fix_id: None,
                });
            }
            Err(e) => return Err(e.into()),
        };

        let root = project.root_path.clone();
        let issue_for_impact = issue.clone();
        let content_for_impact = content.clone();
        let impact = timeout(self.ctx.config.predict_deadline, async move {
            tokio::task::spawn_blocking(move || {
                crate::impact::predict(&root, &issue_for_impact, &content_for_impact)
            })
            .await
            .map_err(|e| MendError::Transient(format!("impact task failed: {e}")))
        })
        .await
        .map_err(|_| MendError::Transient("predict deadline exceeded".to_string()))??;

        fix.predicted_impact = Some(impact.clone());
        fix.stamp(StageName::PredictImpact);
        if impact.risk >= 0.85 {
            return self.terminal(fix, &issue, Decision::Defer, "high-risk", false).await;
        }

        // -- 3. Cost-benefit -------------------------------------------------
        let occurrences = match self.ctx.store.get_pattern(&issue.fingerprint).await? {
            Some(p) => p.occurrences,
            None => issue.occurrence_count as u64,
        };
        let ratio = cost_benefit_ratio(&issue, &impact, occurrences);
        fix.cost_benefit = Some(ratio);
        fix.stamp(StageName::CostBenefit);
        if ratio < 1.0 {
            return self
                .terminal(fix, &issue, Decision::Defer, "negative-cost-benefit", false)
                .await;
        }

        // -- 4. Generate -----------------------------------------------------
        let base_hash = ContentHash::from_bytes(content.as_bytes());
        fix.base_hash = Some(base_hash.clone());

        let guides = experts::relevant_guides(&self.ctx, &project, &issue).await?;
        let generated = timeout(
            self.ctx.config.generate_deadline,
            FixGenerator::generate(&self.ctx, &issue, &guides, &content),
        )
        .await
        .map_err(|_| MendError::Transient("generate deadline exceeded".to_string()))??;

        let Some(generated) = generated else {
            return self
                .terminal(fix, &issue, Decision::Defer, "generation-exhausted", false)
                .await;
        };
        fix.generator = Some(generated.generator);
        fix.patch = Some(generated.patch_json.clone());
        fix.raw_confidence = Some(generated.raw_confidence);
        fix.consulted_experts = generated.consulted.clone();
        fix.stamp(StageName::Generate);

        // -- 5. Calibrate ----------------------------------------------------
        let bucket = self
            .ctx
            .store
            .get_bucket(generated.generator, issue.kind)
            .await?;
        let calibrated = bucket.calibrate(generated.raw_confidence);
        fix.calibrated_confidence = Some(calibrated);
        fix.stamp(StageName::Calibrate);

        // -- 6. Verify -------------------------------------------------------
        let detector = self.ctx.detectors.get(&issue.detector_id);
        let verify_project = project.clone();
        let verify_issue = issue.clone();
        let verify_patch = generated.patch_json.clone();
        let verify_content = content.clone();
        let (verdict, patched) = timeout(self.ctx.config.verify_deadline, async move {
            tokio::task::spawn_blocking(move || {
                FixVerifier::new().verify(
                    &verify_project,
                    &verify_issue,
                    &verify_patch,
                    &verify_content,
                    detector.as_deref(),
                )
            })
            .await
            .map_err(|e| MendError::Transient(format!("verify task failed: {e}")))
        })
        .await
        .map_err(|_| MendError::Transient("verify deadline exceeded".to_string()))??;
        fix.verifier_verdict = Some(verdict.clone());
        fix.stamp(StageName::Verify);
        if !verdict.pass {
            warn!(violations = ?verdict.violations, "verifier rejected candidate");
            return self
                .terminal(fix, &issue, Decision::Skip, "verifier-reject", true)
                .await;
        }
        let patched = patched.expect("passing verdict always carries patched content");

        // -- 7. Explain ------------------------------------------------------
        fix.explanation = Some(format!(
            "{kind} issue at {path}:{line} ({message}); candidate from the \
             {generator} strategy at calibrated confidence {confidence:.2}, \
             predicted risk {risk:.2} across {affected} affected file(s).",
            kind = issue.kind,
            path = issue.path,
            line = issue.line,
            message = issue.message,
            generator = generated.generator,
            confidence = calibrated,
            risk = impact.risk,
            affected = impact.affected_files.len(),
        ));
        fix.stamp(StageName::Explain);

        // -- 8. Decide -------------------------------------------------------
        let tenant = self.ctx.store.get_tenant(&project.tenant_id).await?;
        let threshold = tenant
            .apply_threshold
            .unwrap_or(self.ctx.config.apply_threshold);
        let should_apply =
            calibrated >= threshold && impact.risk < self.ctx.config.risk_cap && verdict.pass;
        fix.stamp(StageName::Decide);
        if !should_apply {
            return self
                .terminal(fix, &issue, Decision::Defer, "below-threshold", false)
                .await;
        }

        // -- 9. Apply (advisory lock held through stage 10) ------------------
        let Some(_guard) = self.ctx.locks.try_acquire(&project.id, &issue.path) else {
            return self
                .terminal(fix, &issue, Decision::Defer, "lock-contention", false)
                .await;
        };

        let current = tokio::fs::read_to_string(&abs_path).await?;
        if ContentHash::from_bytes(current.as_bytes()) != base_hash {
            fix.stale = true;
            return self.terminal(fix, &issue, Decision::Defer, "stale", false).await;
        }

        timeout(
            self.ctx.config.apply_deadline,
            write_atomic(&abs_path, &patched),
        )
        .await
        .map_err(|_| MendError::Transient("apply deadline exceeded".to_string()))??;

        fix.pre_apply_content = Some(current);
        fix.applied = true;
        fix.decision = Decision::Apply;
        fix.stamp(StageName::Apply);

        // -- 10. Monitor -----------------------------------------------------
        let window = chrono::Duration::from_std(self.ctx.config.monitor_window)
            .expect("monitor window fits chrono range");
        fix.monitor_until = Some(self.ctx.clock.now() + window);
        fix.stamp(StageName::Monitor);

        let fix_id = self.ctx.store.append_fix(fix.clone()).await?;
        self.ctx.store.set_outcome(&fix_id, FixOutcome::Success).await?;
        fix.outcome = FixOutcome::Success;

        self.ctx
            .store
            .transition_issue(&issue.id, ReviewStatus::Approved, "orchestrator", None)
            .await?;
        self.ctx
            .store
            .transition_issue(&issue.id, ReviewStatus::Resolved, "orchestrator", Some(&fix_id))
            .await?;

        // Learning runs inside this unit of work (synchronous bus).
        self.bus
            .emit(LearningEvent::FixApplied {
                fix: fix.clone(),
                issue: issue.clone(),
            })
            .await?;
        self.bus
            .emit(LearningEvent::FixOutcome {
                fix: fix.clone(),
                issue: issue.clone(),
                success: true,
            })
            .await?;
        self.bus
            .emit(LearningEvent::PatternUpdated {
                fingerprint: issue.fingerprint.clone(),
            })
            .await?;

        info!(fix = %fix_id, path = %issue.path, "fix applied");
        Ok(OrchestrationOutcome {
            decision: Decision::Apply,
            reason: None,
            fix_id: Some(fix_id),
        })
    }

    /// Revisit open monitors for a project, rolling back regressions.
    /// Returns the fixes rolled back.
    #[instrument(skip(self), fields(project = %project_id))]
    pub async fn sweep_monitors(
        &self,
        project_id: &mend_state::ProjectId,
    ) -> Result<Vec<FixId>> {
        let project = self.ctx.store.get_project(project_id).await?;
        let mut rolled_back = Vec::new();

        for fix in self.ctx.store.open_monitors(project_id).await? {
            let Some(until) = fix.monitor_until else {
                continue;
            };
            // Window expiry ends monitoring without regression.
            if self.ctx.clock.now() > until {
                continue;
            }
            let issue = self.ctx.store.get_issue(&fix.issue_id).await?;
            if self.regression_detected(&project, &fix, &issue).await? {
                self.rollback(&project, &fix, &issue).await?;
                rolled_back.push(fix.id.clone());
            }
        }
        Ok(rolled_back)
    }

    /// The concrete regression signal: the fixed fingerprint re-detected
    /// on the file, or three or more new issues opened against it inside
    /// the monitor window.
    async fn regression_detected(
        &self,
        project: &Project,
        fix: &FixRecord,
        issue: &Issue,
    ) -> Result<bool> {
        let abs_path = project.root_path.join(&fix.path);
        if let Ok(content) = tokio::fs::read_to_string(&abs_path).await {
            if let Some(detector) = self.ctx.detectors.get(&issue.detector_id) {
                let ctx = crate::detect::FileContext {
                    project,
                    path: &fix.path,
                    bytes: content.as_bytes(),
                };
                if detector.reraises(&ctx, issue) {
                    return Ok(true);
                }
            }
        }

        let filter = IssueFilter {
            project_id: Some(project.id.clone()),
            path: Some(fix.path.clone()),
            ..Default::default()
        };
        let new_issues = self
            .ctx
            .store
            .list_issues(&filter)
            .await?
            .into_iter()
            .filter(|i| i.created_at > fix.created_at && !i.status.is_terminal())
            .count();
        Ok(new_issues >= 3)
    }

    /// Restore pre-fix content and record the regression.
    async fn rollback(&self, project: &Project, fix: &FixRecord, issue: &Issue) -> Result<()> {
        let pre = fix.pre_apply_content.as_ref().ok_or_else(|| {
            MendError::Store(format!("fix {} has no pre-apply content", fix.id))
        })?;

        let abs_path = project.root_path.join(&fix.path);
        write_atomic(&abs_path, pre).await?;

        self.ctx
            .store
            .set_outcome(&fix.id, FixOutcome::Regression)
            .await?;
        self.ctx.store.set_rollback(&fix.id).await?;

        self.bus
            .emit(LearningEvent::FixRolledBack {
                fix: fix.clone(),
                issue: issue.clone(),
            })
            .await?;
        self.bus
            .emit(LearningEvent::PatternUpdated {
                fingerprint: issue.fingerprint.clone(),
            })
            .await?;

        self.ctx
            .queue
            .enqueue(
                QueueName::Notification,
                serde_json::json!({
                    "kind": "regression_rollback",
                    "severity": "critical",
                    "project_id": project.id,
                    "fix_id": fix.id,
                    "path": fix.path,
                }),
                100,
            )
            .await?;

        warn!(fix = %fix.id, path = %fix.path, "regression detected; fix rolled back");
        Ok(())
    }

    /// Stage 1: urgency from severity, pattern prevalence, and file health.
    async fn prioritize(&self, issue: &Issue) -> Result<PriorityClass> {
        let occurrences = match self.ctx.store.get_pattern(&issue.fingerprint).await? {
            Some(p) => p.occurrences,
            None => issue.occurrence_count as u64,
        };
        let health = self
            .ctx
            .store
            .latest_health(&issue.project_id, &issue.path)
            .await?
            .map(|h| h.score)
            .unwrap_or(70);

        let urgency = issue.severity.weight()
            + 0.05 * occurrences.min(10) as f64
            + (100 - health as i64).max(0) as f64 / 200.0;

        Ok(if urgency >= 0.9 {
            PriorityClass::Now
        } else if urgency >= 0.55 {
            PriorityClass::Soon
        } else if urgency >= 0.3 {
            PriorityClass::Later
        } else {
            PriorityClass::Drop
        })
    }

    /// Write the terminal fix record for an aborted run.
    ///
    /// `pattern_failure` marks verifier rejections, which feed learning as
    /// a failed attempt. A negative cost-benefit defers the issue itself.
    async fn terminal(
        &self,
        mut fix: FixRecord,
        issue: &Issue,
        decision: Decision,
        reason: &str,
        pattern_failure: bool,
    ) -> Result<OrchestrationOutcome> {
        fix.decision = decision;
        fix.reason = Some(reason.to_string());
        let fix_id = self.ctx.store.append_fix(fix.clone()).await?;

        if pattern_failure {
            self.bus
                .emit(LearningEvent::FixOutcome {
                    fix: fix.clone(),
                    issue: issue.clone(),
                    success: false,
                })
                .await?;
            self.bus
                .emit(LearningEvent::PatternUpdated {
                    fingerprint: issue.fingerprint.clone(),
                })
                .await?;
        }

        if reason == "negative-cost-benefit" {
            self.ctx
                .store
                .transition_issue(&issue.id, ReviewStatus::Deferred, "orchestrator", None)
                .await?;
        }

        info!(fix = %fix_id, decision = ?decision, reason, "orchestration aborted");
        Ok(OrchestrationOutcome {
            decision,
            reason: Some(reason.to_string()),
            fix_id: Some(fix_id),
        })
    }
}

/// Benefit/cost ratio for stage 3.
///
/// Cost: estimated human review minutes scaled by risk, plus a flat
/// generation cost. Benefit: severity weight times expected recurrence
/// reduction from pattern prevalence.
fn cost_benefit_ratio(issue: &Issue, impact: &mend_state::ImpactSummary, occurrences: u64) -> f64 {
    let review_minutes = 5.0
        + if impact.breaking_change { 10.0 } else { 0.0 }
        + 2.0 * impact.affected_files.len() as f64;
    let cost = review_minutes * impact.risk + 1.0;
    let benefit = issue.severity.weight() * (1.0 + occurrences.min(20) as f64) * 4.0;
    benefit / cost
}

/// Write-to-temp-then-rename in the target's directory.
async fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let path = path.to_path_buf();
    let content = content.to_string();
    tokio::task::spawn_blocking(move || -> Result<()> {
        use std::io::Write;
        let parent = path
            .parent()
            .ok_or_else(|| MendError::Contract(format!("{} has no parent", path.display())))?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(content.as_bytes())?;
        tmp.persist(&path)
            .map_err(|e| MendError::Io(e.error))?;
        Ok(())
    })
    .await
    .map_err(|e| MendError::Transient(format!("apply task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use mend_state::{Fingerprint, ImpactSummary, IssueKind, NewIssue, ProjectId, Severity};

    fn issue(severity: Severity) -> Issue {
        NewIssue {
            project_id: ProjectId::new(),
            path: "src/a.rs".into(),
            line: 1,
            kind: IssueKind::Smell,
            severity,
            message: "m".into(),
            fingerprint: Fingerprint::from_parts("smell", "m", "src/a.rs", "d"),
            detector_id: "d".into(),
        }
        .into_issue()
    }

    #[test]
    fn test_cost_benefit_favors_cheap_fixes() {
        let impact = ImpactSummary {
            affected_files: vec![],
            breaking_change: false,
            risk: 0.2,
        };
        let ratio = cost_benefit_ratio(&issue(Severity::Medium), &impact, 1);
        assert!(ratio >= 1.0, "trivial medium fix should clear the bar: {ratio}");
    }

    #[test]
    fn test_cost_benefit_defers_risky_wide_fixes() {
        let impact = ImpactSummary {
            affected_files: (0..8).map(|i| format!("f{i}")).collect(),
            breaking_change: true,
            risk: 0.8,
        };
        let ratio = cost_benefit_ratio(&issue(Severity::Low), &impact, 1);
        assert!(ratio < 1.0, "risky low-value fix must defer: {ratio}");
    }

    #[tokio::test]
    async fn test_write_atomic_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.rs");
        write_atomic(&path, "fn main() {}\n").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "fn main() {}\n");

        // Overwrite keeps the rename semantics.
        write_atomic(&path, "fn other() {}\n").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "fn other() {}\n");
    }
}
