//! In-memory fakes for the storage traits
//!
//! `MemoryStore` satisfies every object-store trait contract from a single
//! `Mutex`-guarded interior. It backs tests and the embedded CLI path, and
//! defines the behavior the SurrealDB backend must match. The single lock
//! makes every mutation atomic, which gives per-issue linearizability for
//! free.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::records::*;
use crate::storage_traits::*;

pub use crate::queue::MemoryQueue;

#[derive(Debug, Clone)]
struct SnapshotRow {
    project: String,
    path: String,
    hash: String,
    at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct StoreInner {
    tenants: HashMap<String, Tenant>,
    projects: HashMap<String, Project>,
    issues: HashMap<String, Issue>,
    audits: Vec<IssueAudit>,
    fixes: HashMap<String, FixRecord>,
    patterns: HashMap<String, Pattern>,
    snapshot_index: HashSet<(String, String, String)>,
    snapshot_rows: Vec<SnapshotRow>,
    health: Vec<FileHealth>,
    guides: HashMap<String, ExpertGuide>,
    buckets: HashMap<(GeneratorKind, IssueKind), CalibrationBucket>,
}

/// In-memory object store satisfying every storage trait contract.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<StoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// IssueStore
// ---------------------------------------------------------------------------

#[async_trait]
impl IssueStore for MemoryStore {
    async fn upsert_issue(&self, issue: NewIssue) -> StoreResult<IssueId> {
        let mut inner = self.inner.lock().unwrap();

        let open = inner.issues.values_mut().find(|i| {
            i.project_id == issue.project_id
                && i.fingerprint == issue.fingerprint
                && !i.status.is_terminal()
        });

        if let Some(existing) = open {
            existing.occurrence_count += 1;
            return Ok(existing.id.clone());
        }

        let row = issue.into_issue();
        let id = row.id.clone();
        inner.issues.insert(id.0.clone(), row);
        Ok(id)
    }

    async fn transition_issue(
        &self,
        id: &IssueId,
        to: ReviewStatus,
        actor: &str,
        fix_id: Option<&FixId>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();

        let issue = inner
            .issues
            .get(&id.0)
            .ok_or_else(|| StoreError::IssueNotFound(id.0.clone()))?;
        let from = issue.status;

        if !from.can_transition_to(to) {
            return Err(StoreError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        let issue = inner.issues.get_mut(&id.0).expect("checked above");
        issue.status = to;
        if let Some(fix) = fix_id {
            issue.fix_id = Some(fix.clone());
        }
        if matches!(to, ReviewStatus::Resolved | ReviewStatus::Superseded) {
            issue.resolved_at = Some(Utc::now());
            issue.resolved_by = fix_id.map(|f| f.0.clone());
        }

        inner.audits.push(IssueAudit {
            issue_id: id.clone(),
            from,
            to,
            actor: actor.to_string(),
            fix_id: fix_id.cloned(),
            at: Utc::now(),
        });
        Ok(())
    }

    async fn get_issue(&self, id: &IssueId) -> StoreResult<Issue> {
        let inner = self.inner.lock().unwrap();
        inner
            .issues
            .get(&id.0)
            .cloned()
            .ok_or_else(|| StoreError::IssueNotFound(id.0.clone()))
    }

    async fn find_open(
        &self,
        project_id: &ProjectId,
        fingerprint: &Fingerprint,
    ) -> StoreResult<Option<Issue>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .issues
            .values()
            .find(|i| {
                i.project_id == *project_id
                    && i.fingerprint == *fingerprint
                    && !i.status.is_terminal()
            })
            .cloned())
    }

    async fn list_issues(&self, filter: &IssueFilter) -> StoreResult<Vec<Issue>> {
        let inner = self.inner.lock().unwrap();
        let mut matching: Vec<Issue> = inner
            .issues
            .values()
            .filter(|i| filter.matches(i))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let iter = matching.into_iter().skip(filter.offset);
        // A zero limit means unbounded.
        Ok(if filter.limit == 0 {
            iter.collect()
        } else {
            iter.take(filter.limit).collect()
        })
    }

    async fn open_issue_paths(&self, project_id: &ProjectId) -> StoreResult<Vec<String>> {
        let inner = self.inner.lock().unwrap();
        let mut paths: Vec<String> = inner
            .issues
            .values()
            .filter(|i| i.project_id == *project_id && !i.status.is_terminal())
            .map(|i| i.path.clone())
            .collect();
        paths.sort();
        paths.dedup();
        Ok(paths)
    }

    async fn audit_trail(&self, id: &IssueId) -> StoreResult<Vec<IssueAudit>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .audits
            .iter()
            .filter(|a| a.issue_id == *id)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// FixLedger
// ---------------------------------------------------------------------------

#[async_trait]
impl FixLedger for MemoryStore {
    async fn append_fix(&self, fix: FixRecord) -> StoreResult<FixId> {
        let mut inner = self.inner.lock().unwrap();
        let id = fix.id.clone();
        inner.fixes.insert(id.0.clone(), fix);
        Ok(id)
    }

    async fn set_outcome(&self, id: &FixId, outcome: FixOutcome) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let fix = inner
            .fixes
            .get_mut(&id.0)
            .ok_or_else(|| StoreError::FixNotFound(id.0.clone()))?;

        // Each concrete value is written once: Unknown -> Success,
        // Unknown -> Regression, or Success -> Regression. Regression is
        // final.
        let legal = matches!(
            (fix.outcome, outcome),
            (FixOutcome::Unknown, FixOutcome::Success)
                | (FixOutcome::Unknown, FixOutcome::Regression)
                | (FixOutcome::Success, FixOutcome::Regression)
        );
        if !legal {
            return Err(StoreError::AlreadySet {
                fix_id: id.0.clone(),
                field: "outcome".to_string(),
            });
        }
        fix.outcome = outcome;
        Ok(())
    }

    async fn set_rollback(&self, id: &FixId) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let fix = inner
            .fixes
            .get_mut(&id.0)
            .ok_or_else(|| StoreError::FixNotFound(id.0.clone()))?;
        if fix.rollback {
            return Err(StoreError::AlreadySet {
                fix_id: id.0.clone(),
                field: "rollback".to_string(),
            });
        }
        fix.rollback = true;
        Ok(())
    }

    async fn get_fix(&self, id: &FixId) -> StoreResult<FixRecord> {
        let inner = self.inner.lock().unwrap();
        inner
            .fixes
            .get(&id.0)
            .cloned()
            .ok_or_else(|| StoreError::FixNotFound(id.0.clone()))
    }

    async fn fixes_for_issue(&self, issue_id: &IssueId) -> StoreResult<Vec<FixRecord>> {
        let inner = self.inner.lock().unwrap();
        let mut fixes: Vec<FixRecord> = inner
            .fixes
            .values()
            .filter(|f| f.issue_id == *issue_id)
            .cloned()
            .collect();
        fixes.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(fixes)
    }

    async fn open_monitors(&self, project_id: &ProjectId) -> StoreResult<Vec<FixRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .fixes
            .values()
            .filter(|f| {
                f.project_id == *project_id
                    && f.applied
                    && !f.rollback
                    && f.outcome == FixOutcome::Success
                    && f.monitor_until.is_some()
            })
            .cloned()
            .collect())
    }

    async fn monitored_projects(&self) -> StoreResult<Vec<ProjectId>> {
        let inner = self.inner.lock().unwrap();
        let mut projects: Vec<ProjectId> = Vec::new();
        for fix in inner.fixes.values() {
            let open = fix.applied
                && !fix.rollback
                && fix.outcome == FixOutcome::Success
                && fix.monitor_until.is_some();
            if open && !projects.contains(&fix.project_id) {
                projects.push(fix.project_id.clone());
            }
        }
        Ok(projects)
    }
}

// ---------------------------------------------------------------------------
// PatternStore
// ---------------------------------------------------------------------------

#[async_trait]
impl PatternStore for MemoryStore {
    async fn upsert_pattern(
        &self,
        fingerprint: &Fingerprint,
        delta_success: i64,
        delta_failure: i64,
        best_fix: Option<String>,
    ) -> StoreResult<Pattern> {
        let mut inner = self.inner.lock().unwrap();
        let pattern = inner
            .patterns
            .entry(fingerprint.as_str().to_string())
            .or_insert_with(|| Pattern::new(fingerprint.clone()));

        pattern.apply_deltas(delta_success, delta_failure);
        if let Some(fix) = best_fix {
            pattern.best_fix = Some(fix);
        }
        Ok(pattern.clone())
    }

    async fn note_occurrence(&self, fingerprint: &Fingerprint) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.patterns.get_mut(fingerprint.as_str()) {
            Some(pattern) => {
                pattern.occurrences += 1;
                pattern.last_seen = Utc::now();
            }
            None => {
                // First sighting: Pattern::new already counts it.
                inner
                    .patterns
                    .insert(fingerprint.as_str().to_string(), Pattern::new(fingerprint.clone()));
            }
        }
        Ok(())
    }

    async fn get_pattern(&self, fingerprint: &Fingerprint) -> StoreResult<Option<Pattern>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.patterns.get(fingerprint.as_str()).cloned())
    }

    async fn lookup_usable(
        &self,
        fingerprint: &Fingerprint,
        min_confidence: f64,
    ) -> StoreResult<Option<Pattern>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .patterns
            .get(fingerprint.as_str())
            .filter(|p| !p.deprecated && p.confidence >= min_confidence && p.best_fix.is_some())
            .cloned())
    }
}

// ---------------------------------------------------------------------------
// SnapshotStore
// ---------------------------------------------------------------------------

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn snapshot_file(
        &self,
        project_id: &ProjectId,
        path: &str,
        hash: &ContentHash,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.lock().unwrap();
        let key = (
            project_id.0.clone(),
            path.to_string(),
            hash.as_str().to_string(),
        );
        if inner.snapshot_index.contains(&key) {
            return Ok(true);
        }
        inner.snapshot_index.insert(key);
        inner.snapshot_rows.push(SnapshotRow {
            project: project_id.0.clone(),
            path: path.to_string(),
            hash: hash.as_str().to_string(),
            at: Utc::now(),
        });
        Ok(false)
    }

    async fn compact(&self, project_id: &ProjectId) -> StoreResult<usize> {
        let mut inner = self.inner.lock().unwrap();

        // Keep only the newest row per path.
        let mut latest: HashMap<String, DateTime<Utc>> = HashMap::new();
        for row in inner.snapshot_rows.iter().filter(|r| r.project == project_id.0) {
            let entry = latest.entry(row.path.clone()).or_insert(row.at);
            if row.at > *entry {
                *entry = row.at;
            }
        }

        let before = inner.snapshot_rows.len();
        let mut removed_keys = Vec::new();
        inner.snapshot_rows.retain(|r| {
            let keep = r.project != project_id.0 || latest.get(&r.path) == Some(&r.at);
            if !keep {
                removed_keys.push((r.project.clone(), r.path.clone(), r.hash.clone()));
            }
            keep
        });
        for key in removed_keys {
            inner.snapshot_index.remove(&key);
        }
        Ok(before - inner.snapshot_rows.len())
    }
}

// ---------------------------------------------------------------------------
// HealthStore
// ---------------------------------------------------------------------------

#[async_trait]
impl HealthStore for MemoryStore {
    async fn record_health(&self, health: FileHealth) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.health.push(health);
        Ok(())
    }

    async fn latest_health(
        &self,
        project_id: &ProjectId,
        path: &str,
    ) -> StoreResult<Option<FileHealth>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .health
            .iter()
            .filter(|h| h.project_id == *project_id && h.path == path)
            .max_by_key(|h| h.recorded_at)
            .cloned())
    }

    async fn below_threshold(
        &self,
        project_id: &ProjectId,
        threshold: u8,
        limit: usize,
    ) -> StoreResult<Vec<FileHealth>> {
        let inner = self.inner.lock().unwrap();

        // Latest snapshot per path, then filter and rank worst-first.
        let mut latest: HashMap<String, FileHealth> = HashMap::new();
        for h in inner.health.iter().filter(|h| h.project_id == *project_id) {
            match latest.get(&h.path) {
                Some(existing) if existing.recorded_at >= h.recorded_at => {}
                _ => {
                    latest.insert(h.path.clone(), h.clone());
                }
            }
        }

        let mut below: Vec<FileHealth> = latest
            .into_values()
            .filter(|h| h.score < threshold)
            .collect();
        below.sort_by_key(|h| h.score);
        below.truncate(limit);
        Ok(below)
    }

    async fn trend(
        &self,
        project_id: &ProjectId,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<FileHealth>> {
        let inner = self.inner.lock().unwrap();
        let mut rows: Vec<FileHealth> = inner
            .health
            .iter()
            .filter(|h| h.project_id == *project_id && h.recorded_at >= since)
            .cloned()
            .collect();
        rows.sort_by_key(|h| h.recorded_at);
        Ok(rows)
    }
}

// ---------------------------------------------------------------------------
// ExpertStore
// ---------------------------------------------------------------------------

#[async_trait]
impl ExpertStore for MemoryStore {
    async fn put_guide(&self, guide: ExpertGuide) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        // Supersede any live guide of the same (project, kind).
        for existing in inner.guides.values_mut() {
            if existing.project_id == guide.project_id
                && existing.kind == guide.kind
                && !existing.superseded
            {
                existing.superseded = true;
            }
        }
        inner.guides.insert(guide.id.clone(), guide);
        Ok(())
    }

    async fn live_guides(&self, project_id: &ProjectId) -> StoreResult<Vec<ExpertGuide>> {
        let inner = self.inner.lock().unwrap();
        let mut guides: Vec<ExpertGuide> = inner
            .guides
            .values()
            .filter(|g| g.project_id == *project_id && !g.superseded)
            .cloned()
            .collect();
        guides.sort_by(|a, b| a.kind.as_str().cmp(b.kind.as_str()));
        Ok(guides)
    }

    async fn live_guide(
        &self,
        project_id: &ProjectId,
        kind: &ExpertKind,
    ) -> StoreResult<Option<ExpertGuide>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .guides
            .values()
            .find(|g| g.project_id == *project_id && g.kind == *kind && !g.superseded)
            .cloned())
    }

    async fn record_consultation(&self, guide_id: &str, success: bool) -> StoreResult<ExpertGuide> {
        let mut inner = self.inner.lock().unwrap();
        let guide = inner
            .guides
            .get_mut(guide_id)
            .ok_or_else(|| StoreError::GuideNotFound(guide_id.to_string()))?;
        guide.record_consultation(success);
        Ok(guide.clone())
    }

    async fn revoke_success(&self, guide_id: &str) -> StoreResult<ExpertGuide> {
        let mut inner = self.inner.lock().unwrap();
        let guide = inner
            .guides
            .get_mut(guide_id)
            .ok_or_else(|| StoreError::GuideNotFound(guide_id.to_string()))?;
        guide.revoke_success();
        Ok(guide.clone())
    }

    async fn get_bucket(
        &self,
        generator: GeneratorKind,
        kind: IssueKind,
    ) -> StoreResult<CalibrationBucket> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .buckets
            .get(&(generator, kind))
            .cloned()
            .unwrap_or_else(|| CalibrationBucket::new(generator, kind)))
    }

    async fn observe_bucket(
        &self,
        generator: GeneratorKind,
        kind: IssueKind,
        predicted: f64,
        success: bool,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .buckets
            .entry((generator, kind))
            .or_insert_with(|| CalibrationBucket::new(generator, kind))
            .observe(predicted, success);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TenantDirectory
// ---------------------------------------------------------------------------

#[async_trait]
impl TenantDirectory for MemoryStore {
    async fn put_tenant(&self, tenant: Tenant) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.tenants.insert(tenant.id.0.clone(), tenant);
        Ok(())
    }

    async fn get_tenant(&self, id: &TenantId) -> StoreResult<Tenant> {
        let inner = self.inner.lock().unwrap();
        inner
            .tenants
            .get(&id.0)
            .cloned()
            .ok_or_else(|| StoreError::TenantNotFound(id.0.clone()))
    }

    async fn put_project(&self, project: Project) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.projects.insert(project.id.0.clone(), project);
        Ok(())
    }

    async fn get_project(&self, id: &ProjectId) -> StoreResult<Project> {
        let inner = self.inner.lock().unwrap();
        inner
            .projects
            .get(&id.0)
            .cloned()
            .ok_or_else(|| StoreError::ProjectNotFound(id.0.clone()))
    }

    async fn find_project_by_repo(
        &self,
        tenant_id: &TenantId,
        repo_url: &str,
    ) -> StoreResult<Option<Project>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .projects
            .values()
            .find(|p| p.tenant_id == *tenant_id && p.repo_url == repo_url)
            .cloned())
    }

    async fn delete_project(&self, id: &ProjectId) -> StoreResult<usize> {
        let mut inner = self.inner.lock().unwrap();
        if inner.projects.remove(&id.0).is_none() {
            return Err(StoreError::ProjectNotFound(id.0.clone()));
        }

        let mut removed = 1usize;

        let issue_ids: HashSet<String> = inner
            .issues
            .values()
            .filter(|i| i.project_id == *id)
            .map(|i| i.id.0.clone())
            .collect();
        removed += issue_ids.len();
        inner.issues.retain(|k, _| !issue_ids.contains(k));
        inner.audits.retain(|a| !issue_ids.contains(&a.issue_id.0));

        let before_fixes = inner.fixes.len();
        inner.fixes.retain(|_, f| f.project_id != *id);
        removed += before_fixes - inner.fixes.len();

        let before_rows = inner.snapshot_rows.len();
        inner.snapshot_rows.retain(|r| r.project != id.0);
        removed += before_rows - inner.snapshot_rows.len();
        inner.snapshot_index.retain(|(p, _, _)| p != &id.0);

        let before_health = inner.health.len();
        inner.health.retain(|h| h.project_id != *id);
        removed += before_health - inner.health.len();

        let before_guides = inner.guides.len();
        inner.guides.retain(|_, g| g.project_id != *id);
        removed += before_guides - inner.guides.len();

        Ok(removed)
    }
}
