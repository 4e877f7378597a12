//! Learning updates after terminal fix outcomes.
//!
//! Subscribes to the learning bus and, for every terminal outcome,
//! updates the pattern counters, the (generator, kind) calibration
//! bucket, and every expert guide consulted during generation. The bus is
//! synchronous, so these writes land in the same unit of work as the fix
//! record: a crash cannot leave statistics inconsistent with recorded
//! outcomes.

use async_trait::async_trait;
use tracing::{info, warn};

use mend_state::{ExpertStore, FixRecord, Issue, PatternStore, TenantDirectory};

use crate::context::ServiceContext;
use crate::error::Result;
use crate::events::{LearningEvent, LearningSink};
use crate::experts;
use crate::metrics::METRICS;

/// The learning subscriber (C10).
pub struct LearningService {
    ctx: ServiceContext,
}

impl LearningService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    async fn on_outcome(&self, fix: &FixRecord, issue: &Issue, success: bool) -> Result<()> {
        let (delta_success, delta_failure) = if success { (1, 0) } else { (0, 1) };
        let best_fix = if success { fix.patch.clone() } else { None };
        self.ctx
            .store
            .upsert_pattern(&issue.fingerprint, delta_success, delta_failure, best_fix)
            .await?;

        if let (Some(generator), Some(raw)) = (fix.generator, fix.raw_confidence) {
            self.ctx
                .store
                .observe_bucket(generator, issue.kind, raw, success)
                .await?;
        }

        let project = self.ctx.store.get_project(&fix.project_id).await?;
        for kind in &fix.consulted_experts {
            let Some(guide) = self.ctx.store.live_guide(&fix.project_id, kind).await? else {
                warn!(kind = %kind, "consulted guide no longer live");
                continue;
            };
            let updated = self
                .ctx
                .store
                .record_consultation(&guide.id, success)
                .await?;
            if updated.needs_revision() {
                let samples = vec![format!(
                    "{}: {} ({} at {}:{})",
                    issue.fingerprint.short(),
                    issue.message,
                    issue.kind,
                    issue.path,
                    issue.line
                )];
                experts::revise_guide(&self.ctx, &project, &updated, &samples).await?;
            }
        }
        Ok(())
    }

    async fn on_rollback(&self, fix: &FixRecord, issue: &Issue) -> Result<()> {
        // The success this fix earned is taken back and counted as a
        // failure; the pattern may deprecate as a result.
        self.ctx
            .store
            .upsert_pattern(&issue.fingerprint, -1, 1, None)
            .await?;

        if let (Some(generator), Some(raw)) = (fix.generator, fix.raw_confidence) {
            self.ctx
                .store
                .observe_bucket(generator, issue.kind, raw, false)
                .await?;
        }

        for kind in &fix.consulted_experts {
            match self.ctx.store.live_guide(&fix.project_id, kind).await? {
                Some(guide) => {
                    self.ctx.store.revoke_success(&guide.id).await?;
                }
                None => warn!(kind = %kind, "consulted guide no longer live"),
            }
        }

        METRICS.inc_fixes_rolled_back();
        info!(fix = %fix.id, fingerprint = %issue.fingerprint.short(), "learning recorded rollback");
        Ok(())
    }
}

#[async_trait]
impl LearningSink for LearningService {
    async fn handle(&self, event: &LearningEvent) -> Result<()> {
        match event {
            LearningEvent::FixApplied { .. } => {
                METRICS.inc_fixes_applied();
                Ok(())
            }
            LearningEvent::FixOutcome {
                fix,
                issue,
                success,
            } => self.on_outcome(fix, issue, *success).await,
            LearningEvent::FixRolledBack { fix, issue } => self.on_rollback(fix, issue).await,
            LearningEvent::PatternUpdated { .. } => Ok(()),
        }
    }
}
