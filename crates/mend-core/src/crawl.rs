//! The crawl pipeline: file selection, dedup, detection, fix hand-off.
//!
//! File selection runs cheapest-first and stops when the budget is full:
//! 1. files changed since the last crawl (webhook payload or watcher)
//! 2. files referenced by currently-open issues
//! 3. files whose latest health score is below the rescan threshold
//! 4. semantic neighbors of recent issues (same-directory siblings)
//!
//! A first crawl with no history walks the whole checkout, budget-capped.
//! Per-file work holds the advisory (project, path) lock during detection;
//! the lock is released before fix orchestration, which re-acquires it for
//! the apply stages.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use mend_state::{
    ContentHash, Decision, HealthStore, IssueId, IssueStore, PatternStore, ProjectId,
    SnapshotStore, TenantDirectory,
};

use crate::context::ServiceContext;
use crate::detect::FileContext;
use crate::error::Result;
use crate::health::score_file;
use crate::metrics::METRICS;
use crate::orchestrate::Orchestrator;

/// Directories never crawled.
const SKIP_DIRS: &[&str] = &[
    ".git",
    "target",
    "node_modules",
    "dist",
    "build",
    ".venv",
    "__pycache__",
    "vendor",
];

/// Extensions considered source code.
const SOURCE_EXTENSIONS: &[&str] = &[
    "rs", "js", "jsx", "ts", "tsx", "py", "go", "java", "rb", "php", "c", "cc", "cpp", "h",
    "hpp", "cs", "sql", "sh", "toml", "yaml", "yml",
];

/// Options for one crawl run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlOptions {
    /// Hand detected issues to the orchestrator.
    pub auto_fix: bool,
    /// Override the configured file budget.
    pub budget: Option<usize>,
    /// Paths known changed (webhook payload or watcher batch).
    pub changed_paths: Vec<String>,
}

/// Result counters for one crawl run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlStats {
    pub files_selected: usize,
    pub files_scanned: usize,
    pub files_skipped_unchanged: usize,
    pub issues_found: usize,
    pub fixes_applied: usize,
    pub fixes_deferred: usize,
    pub fixes_skipped: usize,
}

/// Walk a checkout for source files, bounded by `limit`.
pub fn list_source_files(root: &Path, limit: usize) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        if files.len() >= limit {
            break;
        }
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        let mut entries: Vec<_> = entries.flatten().collect();
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            if files.len() >= limit {
                break;
            }
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();

            if path.is_dir() {
                if !SKIP_DIRS.contains(&name.as_ref()) && !name.starts_with('.') {
                    stack.push(path);
                }
            } else if path
                .extension()
                .map(|e| SOURCE_EXTENSIONS.contains(&e.to_string_lossy().as_ref()))
                .unwrap_or(false)
            {
                files.push(path);
            }
        }
    }
    files
}

/// C9: scans a project and routes issues through the fix flow.
pub struct Crawler {
    ctx: ServiceContext,
}

impl Crawler {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    /// Select files for this crawl, cheapest source first, budget-capped.
    async fn select_files(
        &self,
        project_id: &ProjectId,
        root: &Path,
        options: &CrawlOptions,
    ) -> Result<Vec<String>> {
        let budget = options
            .budget
            .unwrap_or(self.ctx.config.crawl_file_budget)
            .max(1);
        let mut selected: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        let mut push = |path: String, selected: &mut Vec<String>, seen: &mut HashSet<String>| {
            if selected.len() < budget && seen.insert(path.clone()) {
                selected.push(path);
            }
        };

        // 1. explicitly changed paths
        for path in &options.changed_paths {
            push(path.clone(), &mut selected, &mut seen);
        }

        // 2. files with open issues
        for path in self.ctx.store.open_issue_paths(project_id).await? {
            push(path, &mut selected, &mut seen);
        }

        // 3. unhealthy files, worst first
        let threshold = self.ctx.config.health_rescan_threshold;
        for health in self
            .ctx
            .store
            .below_threshold(project_id, threshold, budget)
            .await?
        {
            push(health.path, &mut selected, &mut seen);
        }

        // 4. semantic neighborhood: siblings of recent issue paths
        let recent = self.ctx.store.open_issue_paths(project_id).await?;
        for issue_path in recent {
            let Some(parent) = Path::new(&issue_path).parent() else {
                continue;
            };
            for file in list_source_files(&root.join(parent), 50) {
                if let Ok(rel) = file.strip_prefix(root) {
                    push(rel.to_string_lossy().to_string(), &mut selected, &mut seen);
                }
            }
        }

        // First crawl with no history: walk the whole checkout.
        if selected.is_empty() {
            for file in list_source_files(root, budget) {
                if let Ok(rel) = file.strip_prefix(root) {
                    push(rel.to_string_lossy().to_string(), &mut selected, &mut seen);
                }
            }
        }

        Ok(selected)
    }

    /// Run one crawl for a project.
    #[instrument(skip(self, orchestrator, options), fields(project = %project_id))]
    pub async fn crawl_project(
        &self,
        orchestrator: &Orchestrator,
        project_id: &ProjectId,
        options: CrawlOptions,
    ) -> Result<CrawlStats> {
        let project = self.ctx.store.get_project(project_id).await?;
        let root = project.root_path.clone();
        let mut stats = CrawlStats::default();

        let selected = self.select_files(project_id, &root, &options).await?;
        stats.files_selected = selected.len();
        info!(files = selected.len(), "crawl selection complete");

        let mut issue_ids: Vec<IssueId> = Vec::new();

        for rel_path in selected {
            let abs = root.join(&rel_path);
            let Ok(bytes) = std::fs::read(&abs) else {
                debug!(path = %rel_path, "selected file unreadable; skipped");
                continue;
            };

            // Hold the advisory lock for detection only; orchestration
            // re-acquires it for apply.
            let Some(_guard) = self.ctx.locks.try_acquire(project_id, &rel_path) else {
                debug!(path = %rel_path, "file locked by another worker; skipped");
                continue;
            };

            let hash = ContentHash::from_bytes(&bytes);
            if self
                .ctx
                .store
                .snapshot_file(project_id, &rel_path, &hash)
                .await?
            {
                stats.files_skipped_unchanged += 1;
                continue;
            }
            stats.files_scanned += 1;

            let ctx = FileContext {
                project: &project,
                path: &rel_path,
                bytes: &bytes,
            };

            let mut open_on_path = 0usize;
            for detector in self.ctx.detectors.all() {
                for new_issue in detector.detect(&ctx) {
                    let fingerprint = new_issue.fingerprint.clone();
                    let id = self.ctx.store.upsert_issue(new_issue).await?;
                    self.ctx.store.note_occurrence(&fingerprint).await?;
                    METRICS.inc_issues_detected();
                    stats.issues_found += 1;
                    open_on_path += 1;
                    if !issue_ids.contains(&id) {
                        issue_ids.push(id);
                    }
                }
            }

            let content = String::from_utf8_lossy(&bytes);
            self.ctx
                .store
                .record_health(score_file(
                    project_id.clone(),
                    &rel_path,
                    &content,
                    open_on_path,
                    0,
                ))
                .await?;
        }

        if options.auto_fix {
            for issue_id in issue_ids {
                let outcome = orchestrator.run_issue(&issue_id).await?;
                match outcome.decision {
                    Decision::Apply => stats.fixes_applied += 1,
                    Decision::Defer => stats.fixes_deferred += 1,
                    Decision::Skip => stats.fixes_skipped += 1,
                }
            }
        }

        METRICS.inc_crawl_jobs_processed();
        info!(
            scanned = stats.files_scanned,
            skipped = stats.files_skipped_unchanged,
            issues = stats.issues_found,
            applied = stats.fixes_applied,
            "crawl complete"
        );
        Ok(stats)
    }
}
