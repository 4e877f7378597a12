//! SurrealDB-backed object store
//!
//! Implements every storage trait against a `SurrealHandle`, converting
//! between `records` types and table rows at the boundary. Records are
//! stored under a `data` document field so their own `id` fields never
//! collide with SurrealDB record ids. Invariant checks (state machine,
//! write-once fields, counter bounds) run in this layer, mirroring the
//! in-memory fake exactly.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StoreError;
use crate::handle::SurrealHandle;
use crate::records::*;
use crate::storage_traits::*;

/// Document wrapper: the record lives under `data`, the SurrealDB record
/// id stays out of the record's own fields.
#[derive(Debug, Serialize, Deserialize)]
struct Row<T> {
    data: T,
}

impl<T> Row<T> {
    fn new(data: T) -> Self {
        Self { data }
    }
}

/// SurrealDB-backed implementation of the Mend object store.
pub struct SurrealStore {
    handle: SurrealHandle,
}

impl SurrealStore {
    pub fn new(handle: SurrealHandle) -> Self {
        Self { handle }
    }

    /// In-memory instance for tests and local runs.
    pub async fn in_memory() -> StoreResult<Self> {
        Ok(Self::new(SurrealHandle::in_memory().await?))
    }

    /// Connect to the configured endpoint (`OBJECT_STORE_URL` / `_KEY`).
    pub async fn connect(url: &str, key: Option<&str>) -> StoreResult<Self> {
        Ok(Self::new(SurrealHandle::connect(url, key).await?))
    }

    fn db(&self) -> &surrealdb::Surreal<surrealdb::engine::any::Any> {
        self.handle.db()
    }

    /// Fetch a record by table and record id.
    async fn fetch<T: DeserializeOwned + Serialize + Send + Sync>(
        &self,
        table: &'static str,
        record_id: String,
    ) -> StoreResult<Option<T>> {
        let row: Option<Row<T>> = self.db().select((table, record_id)).await?;
        Ok(row.map(|r| r.data))
    }

    /// Replace a record wholesale by table and record id.
    async fn put<T: DeserializeOwned + Serialize + Send + Sync + 'static>(
        &self,
        table: &'static str,
        record_id: String,
        data: T,
    ) -> StoreResult<()> {
        let _row: Option<Row<T>> = self
            .db()
            .upsert((table, record_id))
            .content(Row::new(data))
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// IssueStore
// ---------------------------------------------------------------------------

#[async_trait]
impl IssueStore for SurrealStore {
    async fn upsert_issue(&self, issue: NewIssue) -> StoreResult<IssueId> {
        if let Some(mut open) = self.find_open(&issue.project_id, &issue.fingerprint).await? {
            open.occurrence_count += 1;
            let id = open.id.clone();
            self.put("issue", id.0.clone(), open).await?;
            return Ok(id);
        }

        let row = issue.into_issue();
        let id = row.id.clone();
        self.put("issue", id.0.clone(), row).await?;
        debug!(issue_id = %id, "issue created");
        Ok(id)
    }

    async fn transition_issue(
        &self,
        id: &IssueId,
        to: ReviewStatus,
        actor: &str,
        fix_id: Option<&FixId>,
    ) -> StoreResult<()> {
        let mut issue = self.get_issue(id).await?;
        let from = issue.status;

        if !from.can_transition_to(to) {
            return Err(StoreError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        issue.status = to;
        if let Some(fix) = fix_id {
            issue.fix_id = Some(fix.clone());
        }
        if matches!(to, ReviewStatus::Resolved | ReviewStatus::Superseded) {
            issue.resolved_at = Some(Utc::now());
            issue.resolved_by = fix_id.map(|f| f.0.clone());
        }
        self.put("issue", id.0.clone(), issue).await?;

        let audit = IssueAudit {
            issue_id: id.clone(),
            from,
            to,
            actor: actor.to_string(),
            fix_id: fix_id.cloned(),
            at: Utc::now(),
        };
        let _created: Option<Row<IssueAudit>> =
            self.db().create("issue_audit").content(Row::new(audit)).await?;
        Ok(())
    }

    async fn get_issue(&self, id: &IssueId) -> StoreResult<Issue> {
        self.fetch("issue", id.0.clone())
            .await?
            .ok_or_else(|| StoreError::IssueNotFound(id.0.clone()))
    }

    async fn find_open(
        &self,
        project_id: &ProjectId,
        fingerprint: &Fingerprint,
    ) -> StoreResult<Option<Issue>> {
        let pid = project_id.0.clone();
        let fp = fingerprint.as_str().to_string();
        let mut res = self
            .db()
            .query(
                "SELECT * FROM issue WHERE data.project_id = $pid AND data.fingerprint = $fp \
                 AND data.status NOT IN ['resolved', 'rejected', 'superseded']",
            )
            .bind(("pid", pid))
            .bind(("fp", fp))
            .await?;
        let rows: Vec<Row<Issue>> = res.take(0)?;
        Ok(rows.into_iter().next().map(|r| r.data))
    }

    async fn list_issues(&self, filter: &IssueFilter) -> StoreResult<Vec<Issue>> {
        // Push the project scope down; remaining filters are cheap in Rust.
        let mut res = match &filter.project_id {
            Some(pid) => {
                let pid = pid.0.clone();
                self.db()
                    .query("SELECT * FROM issue WHERE data.project_id = $pid")
                    .bind(("pid", pid))
                    .await?
            }
            None => self.db().query("SELECT * FROM issue").await?,
        };
        let rows: Vec<Row<Issue>> = res.take(0)?;

        let mut matching: Vec<Issue> = rows
            .into_iter()
            .map(|r| r.data)
            .filter(|i| filter.matches(i))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let iter = matching.into_iter().skip(filter.offset);
        Ok(if filter.limit == 0 {
            iter.collect()
        } else {
            iter.take(filter.limit).collect()
        })
    }

    async fn open_issue_paths(&self, project_id: &ProjectId) -> StoreResult<Vec<String>> {
        let pid = project_id.0.clone();
        let mut res = self
            .db()
            .query(
                "SELECT VALUE data.path FROM issue WHERE data.project_id = $pid \
                 AND data.status NOT IN ['resolved', 'rejected', 'superseded']",
            )
            .bind(("pid", pid))
            .await?;
        let mut paths: Vec<String> = res.take(0)?;
        paths.sort();
        paths.dedup();
        Ok(paths)
    }

    async fn audit_trail(&self, id: &IssueId) -> StoreResult<Vec<IssueAudit>> {
        let iid = id.0.clone();
        let mut res = self
            .db()
            .query("SELECT * FROM issue_audit WHERE data.issue_id = $iid ORDER BY data.at")
            .bind(("iid", iid))
            .await?;
        let rows: Vec<Row<IssueAudit>> = res.take(0)?;
        Ok(rows.into_iter().map(|r| r.data).collect())
    }
}

// ---------------------------------------------------------------------------
// FixLedger
// ---------------------------------------------------------------------------

#[async_trait]
impl FixLedger for SurrealStore {
    async fn append_fix(&self, fix: FixRecord) -> StoreResult<FixId> {
        let id = fix.id.clone();
        self.put("fix_record", id.0.clone(), fix).await?;
        Ok(id)
    }

    async fn set_outcome(&self, id: &FixId, outcome: FixOutcome) -> StoreResult<()> {
        let mut fix = self.get_fix(id).await?;
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
        self.put("fix_record", id.0.clone(), fix).await
    }

    async fn set_rollback(&self, id: &FixId) -> StoreResult<()> {
        let mut fix = self.get_fix(id).await?;
        if fix.rollback {
            return Err(StoreError::AlreadySet {
                fix_id: id.0.clone(),
                field: "rollback".to_string(),
            });
        }
        fix.rollback = true;
        self.put("fix_record", id.0.clone(), fix).await
    }

    async fn get_fix(&self, id: &FixId) -> StoreResult<FixRecord> {
        self.fetch("fix_record", id.0.clone())
            .await?
            .ok_or_else(|| StoreError::FixNotFound(id.0.clone()))
    }

    async fn fixes_for_issue(&self, issue_id: &IssueId) -> StoreResult<Vec<FixRecord>> {
        let iid = issue_id.0.clone();
        let mut res = self
            .db()
            .query(
                "SELECT * FROM fix_record WHERE data.issue_id = $iid ORDER BY data.created_at",
            )
            .bind(("iid", iid))
            .await?;
        let rows: Vec<Row<FixRecord>> = res.take(0)?;
        Ok(rows.into_iter().map(|r| r.data).collect())
    }

    async fn open_monitors(&self, project_id: &ProjectId) -> StoreResult<Vec<FixRecord>> {
        let pid = project_id.0.clone();
        let mut res = self
            .db()
            .query(
                "SELECT * FROM fix_record WHERE data.project_id = $pid \
                 AND data.applied = true AND data.rollback = false \
                 AND data.outcome = 'success' \
                 AND data.monitor_until != NONE AND data.monitor_until != null",
            )
            .bind(("pid", pid))
            .await?;
        let rows: Vec<Row<FixRecord>> = res.take(0)?;
        Ok(rows.into_iter().map(|r| r.data).collect())
    }

    async fn monitored_projects(&self) -> StoreResult<Vec<ProjectId>> {
        let mut res = self
            .db()
            .query(
                "SELECT VALUE data.project_id FROM fix_record WHERE data.applied = true \
                 AND data.rollback = false AND data.outcome = 'success' \
                 AND data.monitor_until != NONE AND data.monitor_until != null",
            )
            .await?;
        let ids: Vec<ProjectId> = res.take(0)?;
        let mut projects: Vec<ProjectId> = Vec::new();
        for id in ids {
            if !projects.contains(&id) {
                projects.push(id);
            }
        }
        Ok(projects)
    }
}

// ---------------------------------------------------------------------------
// PatternStore
// ---------------------------------------------------------------------------

#[async_trait]
impl PatternStore for SurrealStore {
    async fn upsert_pattern(
        &self,
        fingerprint: &Fingerprint,
        delta_success: i64,
        delta_failure: i64,
        best_fix: Option<String>,
    ) -> StoreResult<Pattern> {
        let mut pattern = self
            .get_pattern(fingerprint)
            .await?
            .unwrap_or_else(|| Pattern::new(fingerprint.clone()));

        pattern.apply_deltas(delta_success, delta_failure);
        if let Some(fix) = best_fix {
            pattern.best_fix = Some(fix);
        }

        self.put("pattern", fingerprint.as_str().to_string(), pattern.clone())
            .await?;
        Ok(pattern)
    }

    async fn note_occurrence(&self, fingerprint: &Fingerprint) -> StoreResult<()> {
        // First sighting: Pattern::new already counts it.
        let pattern = match self.get_pattern(fingerprint).await? {
            Some(mut p) => {
                p.occurrences += 1;
                p.last_seen = Utc::now();
                p
            }
            None => Pattern::new(fingerprint.clone()),
        };
        self.put("pattern", fingerprint.as_str().to_string(), pattern)
            .await
    }

    async fn get_pattern(&self, fingerprint: &Fingerprint) -> StoreResult<Option<Pattern>> {
        self.fetch("pattern", fingerprint.as_str().to_string()).await
    }

    async fn lookup_usable(
        &self,
        fingerprint: &Fingerprint,
        min_confidence: f64,
    ) -> StoreResult<Option<Pattern>> {
        Ok(self
            .get_pattern(fingerprint)
            .await?
            .filter(|p| !p.deprecated && p.confidence >= min_confidence && p.best_fix.is_some()))
    }
}

// ---------------------------------------------------------------------------
// SnapshotStore
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotDoc {
    project_id: String,
    path: String,
    hash: String,
    at: DateTime<Utc>,
}

fn snapshot_record_id(project_id: &ProjectId, path: &str, hash: &ContentHash) -> String {
    ContentHash::from_bytes(
        format!("{}\x1f{}\x1f{}", project_id.0, path, hash.as_str()).as_bytes(),
    )
    .as_str()
    .to_string()
}

#[async_trait]
impl SnapshotStore for SurrealStore {
    async fn snapshot_file(
        &self,
        project_id: &ProjectId,
        path: &str,
        hash: &ContentHash,
    ) -> StoreResult<bool> {
        // A deterministic record id makes the second insert collide, which
        // is exactly the dedup signal we need.
        let key = snapshot_record_id(project_id, path, hash);
        let doc = SnapshotDoc {
            project_id: project_id.0.clone(),
            path: path.to_string(),
            hash: hash.as_str().to_string(),
            at: Utc::now(),
        };

        match self
            .db()
            .create::<Option<Row<SnapshotDoc>>>(("file_snapshot", key))
            .content(Row::new(doc))
            .await
        {
            Ok(_) => Ok(false),
            Err(surrealdb::Error::Db(surrealdb::error::Db::RecordExists { .. })) => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    async fn compact(&self, project_id: &ProjectId) -> StoreResult<usize> {
        let pid = project_id.0.clone();
        let mut res = self
            .db()
            .query(
                "SELECT * FROM file_snapshot WHERE data.project_id = $pid \
                 ORDER BY data.at DESC",
            )
            .bind(("pid", pid))
            .await?;
        let rows: Vec<Row<SnapshotDoc>> = res.take(0)?;

        let mut seen_paths = std::collections::HashSet::new();
        let mut removed = 0usize;
        for row in rows {
            let doc = row.data;
            if !seen_paths.insert(doc.path.clone()) {
                let key = snapshot_record_id(
                    &ProjectId(doc.project_id.clone()),
                    &doc.path,
                    &ContentHash::try_from(doc.hash.clone())?,
                );
                let _old: Option<Row<SnapshotDoc>> =
                    self.db().delete(("file_snapshot", key)).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// HealthStore
// ---------------------------------------------------------------------------

#[async_trait]
impl HealthStore for SurrealStore {
    async fn record_health(&self, health: FileHealth) -> StoreResult<()> {
        let _created: Option<Row<FileHealth>> =
            self.db().create("file_health").content(Row::new(health)).await?;
        Ok(())
    }

    async fn latest_health(
        &self,
        project_id: &ProjectId,
        path: &str,
    ) -> StoreResult<Option<FileHealth>> {
        let pid = project_id.0.clone();
        let path = path.to_string();
        let mut res = self
            .db()
            .query(
                "SELECT * FROM file_health WHERE data.project_id = $pid \
                 AND data.path = $path ORDER BY data.recorded_at DESC LIMIT 1",
            )
            .bind(("pid", pid))
            .bind(("path", path))
            .await?;
        let rows: Vec<Row<FileHealth>> = res.take(0)?;
        Ok(rows.into_iter().next().map(|r| r.data))
    }

    async fn below_threshold(
        &self,
        project_id: &ProjectId,
        threshold: u8,
        limit: usize,
    ) -> StoreResult<Vec<FileHealth>> {
        let pid = project_id.0.clone();
        let mut res = self
            .db()
            .query(
                "SELECT * FROM file_health WHERE data.project_id = $pid \
                 ORDER BY data.recorded_at DESC",
            )
            .bind(("pid", pid))
            .await?;
        let rows: Vec<Row<FileHealth>> = res.take(0)?;

        // Latest per path (rows are newest-first), then rank worst-first.
        let mut latest: std::collections::HashMap<String, FileHealth> = Default::default();
        for row in rows {
            let h = row.data;
            latest.entry(h.path.clone()).or_insert(h);
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
        let pid = project_id.0.clone();
        let mut res = self
            .db()
            .query(
                "SELECT * FROM file_health WHERE data.project_id = $pid \
                 ORDER BY data.recorded_at",
            )
            .bind(("pid", pid))
            .await?;
        let rows: Vec<Row<FileHealth>> = res.take(0)?;
        Ok(rows
            .into_iter()
            .map(|r| r.data)
            .filter(|h| h.recorded_at >= since)
            .collect())
    }
}

// ---------------------------------------------------------------------------
// ExpertStore
// ---------------------------------------------------------------------------

#[async_trait]
impl ExpertStore for SurrealStore {
    async fn put_guide(&self, guide: ExpertGuide) -> StoreResult<()> {
        // Supersede the live guide of the same (project, kind), if any.
        if let Some(mut live) = self.live_guide(&guide.project_id, &guide.kind).await? {
            live.superseded = true;
            let live_id = live.id.clone();
            self.put("expert_guide", live_id, live).await?;
        }
        self.put("expert_guide", guide.id.clone(), guide).await
    }

    async fn live_guides(&self, project_id: &ProjectId) -> StoreResult<Vec<ExpertGuide>> {
        let pid = project_id.0.clone();
        let mut res = self
            .db()
            .query(
                "SELECT * FROM expert_guide WHERE data.project_id = $pid \
                 AND data.superseded = false",
            )
            .bind(("pid", pid))
            .await?;
        let rows: Vec<Row<ExpertGuide>> = res.take(0)?;
        let mut guides: Vec<ExpertGuide> = rows.into_iter().map(|r| r.data).collect();
        guides.sort_by(|a, b| a.kind.as_str().cmp(b.kind.as_str()));
        Ok(guides)
    }

    async fn live_guide(
        &self,
        project_id: &ProjectId,
        kind: &ExpertKind,
    ) -> StoreResult<Option<ExpertGuide>> {
        let pid = project_id.0.clone();
        let kind = kind.as_str().to_string();
        let mut res = self
            .db()
            .query(
                "SELECT * FROM expert_guide WHERE data.project_id = $pid \
                 AND data.kind = $kind AND data.superseded = false",
            )
            .bind(("pid", pid))
            .bind(("kind", kind))
            .await?;
        let rows: Vec<Row<ExpertGuide>> = res.take(0)?;
        Ok(rows.into_iter().next().map(|r| r.data))
    }

    async fn record_consultation(&self, guide_id: &str, success: bool) -> StoreResult<ExpertGuide> {
        let mut guide: ExpertGuide = self
            .fetch("expert_guide", guide_id.to_string())
            .await?
            .ok_or_else(|| StoreError::GuideNotFound(guide_id.to_string()))?;
        guide.record_consultation(success);
        self.put("expert_guide", guide_id.to_string(), guide.clone())
            .await?;
        Ok(guide)
    }

    async fn revoke_success(&self, guide_id: &str) -> StoreResult<ExpertGuide> {
        let mut guide: ExpertGuide = self
            .fetch("expert_guide", guide_id.to_string())
            .await?
            .ok_or_else(|| StoreError::GuideNotFound(guide_id.to_string()))?;
        guide.revoke_success();
        self.put("expert_guide", guide_id.to_string(), guide.clone())
            .await?;
        Ok(guide)
    }

    async fn get_bucket(
        &self,
        generator: GeneratorKind,
        kind: IssueKind,
    ) -> StoreResult<CalibrationBucket> {
        let id = format!("{}:{}", generator.as_str(), kind.as_str());
        Ok(self
            .fetch("calibration_bucket", id)
            .await?
            .unwrap_or_else(|| CalibrationBucket::new(generator, kind)))
    }

    async fn observe_bucket(
        &self,
        generator: GeneratorKind,
        kind: IssueKind,
        predicted: f64,
        success: bool,
    ) -> StoreResult<()> {
        let mut bucket = self.get_bucket(generator, kind).await?;
        bucket.observe(predicted, success);
        let id = format!("{}:{}", generator.as_str(), kind.as_str());
        self.put("calibration_bucket", id, bucket).await
    }
}

// ---------------------------------------------------------------------------
// TenantDirectory
// ---------------------------------------------------------------------------

#[async_trait]
impl TenantDirectory for SurrealStore {
    async fn put_tenant(&self, tenant: Tenant) -> StoreResult<()> {
        let id = tenant.id.0.clone();
        self.put("tenant", id, tenant).await
    }

    async fn get_tenant(&self, id: &TenantId) -> StoreResult<Tenant> {
        self.fetch("tenant", id.0.clone())
            .await?
            .ok_or_else(|| StoreError::TenantNotFound(id.0.clone()))
    }

    async fn put_project(&self, project: Project) -> StoreResult<()> {
        let id = project.id.0.clone();
        self.put("project", id, project).await
    }

    async fn get_project(&self, id: &ProjectId) -> StoreResult<Project> {
        self.fetch("project", id.0.clone())
            .await?
            .ok_or_else(|| StoreError::ProjectNotFound(id.0.clone()))
    }

    async fn find_project_by_repo(
        &self,
        tenant_id: &TenantId,
        repo_url: &str,
    ) -> StoreResult<Option<Project>> {
        let tid = tenant_id.0.clone();
        let url = repo_url.to_string();
        let mut res = self
            .db()
            .query(
                "SELECT * FROM project WHERE data.tenant_id = $tid AND data.repo_url = $url",
            )
            .bind(("tid", tid))
            .bind(("url", url))
            .await?;
        let rows: Vec<Row<Project>> = res.take(0)?;
        Ok(rows.into_iter().next().map(|r| r.data))
    }

    async fn delete_project(&self, id: &ProjectId) -> StoreResult<usize> {
        // Confirm existence first so the error matches the fake.
        let _project = self.get_project(id).await?;
        let pid = id.0.clone();

        // Audit rows go first: the subquery needs the issues still present.
        self.db()
            .query(
                "BEGIN TRANSACTION; \
                 DELETE issue_audit WHERE data.issue_id IN \
                     (SELECT VALUE data.id FROM issue WHERE data.project_id = $pid); \
                 DELETE issue WHERE data.project_id = $pid; \
                 DELETE fix_record WHERE data.project_id = $pid; \
                 DELETE file_snapshot WHERE data.project_id = $pid; \
                 DELETE file_health WHERE data.project_id = $pid; \
                 DELETE expert_guide WHERE data.project_id = $pid; \
                 DELETE project WHERE data.id = $pid; \
                 COMMIT TRANSACTION;",
            )
            .bind(("pid", pid))
            .await?;
        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_issue_roundtrip() {
        let store = SurrealStore::in_memory().await.unwrap();
        let project = ProjectId::new();
        let fp = Fingerprint::from_parts("style", "line too long", "src/a.rs", "long-line");

        let id = store
            .upsert_issue(NewIssue {
                project_id: project.clone(),
                path: "src/a.rs".into(),
                line: 3,
                kind: IssueKind::Style,
                severity: Severity::Low,
                message: "line too long".into(),
                fingerprint: fp.clone(),
                detector_id: "long-line".into(),
            })
            .await
            .unwrap();

        let issue = store.get_issue(&id).await.unwrap();
        assert_eq!(issue.status, ReviewStatus::Pending);
        assert_eq!(issue.occurrence_count, 1);

        let open = store.find_open(&project, &fp).await.unwrap();
        assert_eq!(open.unwrap().id, id);
    }

    #[tokio::test]
    async fn test_upsert_bumps_occurrence() {
        let store = SurrealStore::in_memory().await.unwrap();
        let project = ProjectId::new();
        let fp = Fingerprint::from_parts("smell", "todo", "a.rs", "todo-scanner");
        let new_issue = || NewIssue {
            project_id: project.clone(),
            path: "a.rs".into(),
            line: 1,
            kind: IssueKind::Smell,
            severity: Severity::Low,
            message: "todo".into(),
            fingerprint: fp.clone(),
            detector_id: "todo-scanner".into(),
        };

        let first = store.upsert_issue(new_issue()).await.unwrap();
        let second = store.upsert_issue(new_issue()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.get_issue(&first).await.unwrap().occurrence_count, 2);
    }

    #[tokio::test]
    async fn test_snapshot_dedup() {
        let store = SurrealStore::in_memory().await.unwrap();
        let project = ProjectId::new();
        let hash = ContentHash::from_bytes(b"contents");

        assert!(!store.snapshot_file(&project, "a.rs", &hash).await.unwrap());
        assert!(store.snapshot_file(&project, "a.rs", &hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_pattern_upsert_recomputes() {
        let store = SurrealStore::in_memory().await.unwrap();
        let fp = Fingerprint::from_parts("smell", "todo", "a.rs", "todo-scanner");

        let p = store
            .upsert_pattern(&fp, 1, 0, Some("patch".into()))
            .await
            .unwrap();
        assert!((p.confidence - 2.0 / 3.0).abs() < 1e-9);

        let usable = store.lookup_usable(&fp, 0.5).await.unwrap();
        assert!(usable.is_some());
    }

    #[tokio::test]
    async fn test_transition_enforces_fsm() {
        let store = SurrealStore::in_memory().await.unwrap();
        let project = ProjectId::new();
        let fp = Fingerprint::from_parts("smell", "todo", "a.rs", "todo-scanner");
        let id = store
            .upsert_issue(NewIssue {
                project_id: project,
                path: "a.rs".into(),
                line: 1,
                kind: IssueKind::Smell,
                severity: Severity::Low,
                message: "todo".into(),
                fingerprint: fp,
                detector_id: "todo-scanner".into(),
            })
            .await
            .unwrap();

        store
            .transition_issue(&id, ReviewStatus::Rejected, "human", None)
            .await
            .unwrap();
        let err = store
            .transition_issue(&id, ReviewStatus::Approved, "human", None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));

        let trail = store.audit_trail(&id).await.unwrap();
        assert_eq!(trail.len(), 1);
    }
}
