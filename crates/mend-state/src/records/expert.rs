//! Expert guides and confidence-calibration buckets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::fix::GeneratorKind;
use super::issue::IssueKind;
use super::project::ProjectId;

/// Consultations after which a low quality score triggers a revision.
pub const REVISION_MIN_CONSULTATIONS: u64 = 10;

/// Quality floor below which a guide is revised and superseded.
pub const REVISION_QUALITY_FLOOR: f64 = 0.4;

/// Kind of expertise a guide covers, derived from the project's tech stack.
///
/// Kinds are open-ended strings with structured constructors so lookups
/// stay stable: `language-rust`, `framework-axum`, `database-postgres`,
/// `testing`, `security`, `api`, `deployment-docker`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExpertKind(pub String);

impl ExpertKind {
    pub fn language(name: &str) -> Self {
        ExpertKind(format!("language-{name}"))
    }

    pub fn framework(name: &str) -> Self {
        ExpertKind(format!("framework-{name}"))
    }

    pub fn database(name: &str) -> Self {
        ExpertKind(format!("database-{name}"))
    }

    pub fn deployment(name: &str) -> Self {
        ExpertKind(format!("deployment-{name}"))
    }

    pub fn testing() -> Self {
        ExpertKind("testing".to_string())
    }

    pub fn security() -> Self {
        ExpertKind("security".to_string())
    }

    pub fn api() -> Self {
        ExpertKind("api".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ExpertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A per-project, per-stack guide injected into fix-generation prompts.
///
/// Guide bodies are immutable: improvements produce a new revision and
/// supersede the old one. At most one live guide exists per
/// (project, kind).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpertGuide {
    pub id: String,
    pub project_id: ProjectId,
    pub kind: ExpertKind,
    pub body: String,
    /// Derived quality in [0, 1], Laplace-smoothed success/usage.
    pub quality_score: f64,
    pub usage_count: u64,
    pub success_count: u64,
    pub revision: u32,
    pub superseded: bool,
    pub created_at: DateTime<Utc>,
}

impl ExpertGuide {
    pub fn new(project_id: ProjectId, kind: ExpertKind, body: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            project_id,
            kind,
            body: body.into(),
            quality_score: 0.5,
            usage_count: 0,
            success_count: 0,
            revision: 1,
            superseded: false,
            created_at: Utc::now(),
        }
    }

    /// Record one consultation outcome and recompute quality.
    pub fn record_consultation(&mut self, success: bool) {
        self.usage_count += 1;
        if success {
            self.success_count += 1;
        }
        self.recompute_quality();
    }

    /// Take back one previously-recorded success (regression rollback).
    ///
    /// Panics if there is no success to revoke: that means rollback
    /// bookkeeping has diverged from recorded outcomes, which is fatal.
    pub fn revoke_success(&mut self) {
        assert!(
            self.success_count > 0,
            "guide {} has no success to revoke",
            self.id
        );
        self.success_count -= 1;
        self.recompute_quality();
    }

    /// Whether quality has collapsed enough to trigger a new revision.
    pub fn needs_revision(&self) -> bool {
        self.usage_count >= REVISION_MIN_CONSULTATIONS
            && self.quality_score < REVISION_QUALITY_FLOOR
    }

    fn recompute_quality(&mut self) {
        self.quality_score =
            (self.success_count as f64 + 1.0) / (self.usage_count as f64 + 2.0);
    }
}

/// Calibration bucket for one (generator, issue kind) pair.
///
/// Tracks Brier-style error between self-reported confidence and observed
/// success so the calibrate stage can correct systematic over- or
/// under-confidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationBucket {
    pub generator: GeneratorKind,
    pub kind: IssueKind,
    pub samples: u64,
    /// Sum of (predicted - observed)^2 over all samples.
    pub brier_sum: f64,
    pub predicted_sum: f64,
    pub observed_sum: f64,
}

impl CalibrationBucket {
    pub fn new(generator: GeneratorKind, kind: IssueKind) -> Self {
        Self {
            generator,
            kind,
            samples: 0,
            brier_sum: 0.0,
            predicted_sum: 0.0,
            observed_sum: 0.0,
        }
    }

    /// Record one (predicted confidence, observed success) pair.
    pub fn observe(&mut self, predicted: f64, success: bool) {
        let observed = if success { 1.0 } else { 0.0 };
        self.samples += 1;
        self.brier_sum += (predicted - observed).powi(2);
        self.predicted_sum += predicted;
        self.observed_sum += observed;
    }

    /// Mean Brier score; 0 is perfect calibration.
    pub fn brier_score(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.brier_sum / self.samples as f64
        }
    }

    /// Signed calibration error: positive means overconfident.
    pub fn calibration_error(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            (self.predicted_sum - self.observed_sum) / self.samples as f64
        }
    }

    /// Correct a raw confidence by this bucket's observed bias, clamped
    /// to [0, 1]. With no samples the raw value passes through.
    pub fn calibrate(&self, raw: f64) -> f64 {
        (raw - self.calibration_error()).clamp(0.0, 1.0)
    }
}
