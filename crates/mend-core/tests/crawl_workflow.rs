//! Crawl pipeline behavior: hash dedup, occurrence counting, budget caps,
//! duplicate crawls, and the cache-outage degraded mode.

use std::sync::Arc;

use mend_core::{CrawlOptions, Crawler, Orchestrator, ScriptedModel, ServiceContext};
use mend_state::{
    CacheHandle, HealthStore, IssueFilter, IssueStore, MemoryCache, PlanTier, Project,
    ReviewStatus, Tenant, TenantDirectory,
};

async fn setup() -> (ServiceContext, Orchestrator, Crawler, Project, tempfile::TempDir) {
    // The model is never consulted in these tests.
    let model = Arc::new(ScriptedModel::always("unused".to_string()));
    let dir = tempfile::tempdir().unwrap();
    let ctx = ServiceContext::in_memory(model);

    let tenant = Tenant::new("acme", PlanTier::Team, "s");
    ctx.store.put_tenant(tenant.clone()).await.unwrap();
    let project = Project::new(tenant.id, "api", "https://git.example/a", dir.path());
    ctx.store.put_project(project.clone()).await.unwrap();

    let orchestrator = Orchestrator::new(ctx.clone());
    let crawler = Crawler::new(ctx.clone());
    (ctx, orchestrator, crawler, project, dir)
}

#[tokio::test]
async fn unchanged_files_are_never_rescanned() {
    let (ctx, orchestrator, crawler, project, dir) = setup().await;
    std::fs::write(dir.path().join("a.rs"), "// TODO: one\n").unwrap();

    let first = crawler
        .crawl_project(&orchestrator, &project.id, CrawlOptions::default())
        .await
        .unwrap();
    assert_eq!(first.files_scanned, 1);
    assert_eq!(first.issues_found, 1);

    // Same content: the snapshot store reports it already present.
    let second = crawler
        .crawl_project(&orchestrator, &project.id, CrawlOptions::default())
        .await
        .unwrap();
    assert_eq!(second.files_scanned, 0);
    assert_eq!(second.files_skipped_unchanged, 1);
    assert_eq!(second.issues_found, 0);

    // Occurrence count untouched by the skipped crawl.
    let issues = ctx
        .store
        .list_issues(&IssueFilter::for_project(project.id.clone()))
        .await
        .unwrap();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].occurrence_count, 1);
}

#[tokio::test]
async fn changed_file_with_same_defect_bumps_occurrence() {
    let (ctx, orchestrator, crawler, project, dir) = setup().await;
    let file = dir.path().join("a.rs");
    std::fs::write(&file, "// TODO: one\n").unwrap();

    crawler
        .crawl_project(&orchestrator, &project.id, CrawlOptions::default())
        .await
        .unwrap();

    // New content, same defect: one row, occurrence 2.
    std::fs::write(&file, "fn extra() {}\n// TODO: one\n").unwrap();
    crawler
        .crawl_project(&orchestrator, &project.id, CrawlOptions::default())
        .await
        .unwrap();

    let issues = ctx
        .store
        .list_issues(&IssueFilter::for_project(project.id.clone()))
        .await
        .unwrap();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].occurrence_count, 2);
    assert_eq!(issues[0].status, ReviewStatus::Pending);
}

#[tokio::test]
async fn budget_caps_files_per_crawl() {
    let (_ctx, orchestrator, crawler, project, dir) = setup().await;
    for i in 0..5 {
        std::fs::write(dir.path().join(format!("f{i}.rs")), "// TODO: x\n").unwrap();
    }

    let stats = crawler
        .crawl_project(
            &orchestrator,
            &project.id,
            CrawlOptions {
                budget: Some(2),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(stats.files_selected, 2);
    assert_eq!(stats.files_scanned, 2);
}

#[tokio::test]
async fn changed_paths_steer_selection() {
    let (_ctx, orchestrator, crawler, project, dir) = setup().await;
    std::fs::write(dir.path().join("touched.rs"), "// TODO: here\n").unwrap();
    std::fs::write(dir.path().join("untouched.rs"), "// TODO: there\n").unwrap();

    let stats = crawler
        .crawl_project(
            &orchestrator,
            &project.id,
            CrawlOptions {
                budget: Some(1),
                changed_paths: vec!["touched.rs".to_string()],
                ..Default::default()
            },
        )
        .await
        .unwrap();
    // The explicit change wins the single budget slot.
    assert_eq!(stats.files_scanned, 1);
    assert_eq!(stats.issues_found, 1);
}

#[tokio::test]
async fn s5_duplicate_crawls_yield_identical_issue_set() {
    let (ctx, orchestrator, crawler, project, dir) = setup().await;
    std::fs::write(dir.path().join("a.rs"), "// TODO: one\nlet password = \"x\";\n").unwrap();

    for _ in 0..3 {
        crawler
            .crawl_project(&orchestrator, &project.id, CrawlOptions::default())
            .await
            .unwrap();
    }

    let issues = ctx
        .store
        .list_issues(&IssueFilter::for_project(project.id.clone()))
        .await
        .unwrap();
    // One row per fingerprint, exactly as a single crawl would produce.
    assert_eq!(issues.len(), 2);
    for issue in issues {
        assert_eq!(issue.occurrence_count, 1);
    }
}

#[tokio::test]
async fn s6_cache_outage_does_not_change_results() {
    // Run the same crawl against a live cache and a dead one.
    let (with_cache_issues, without_cache_issues) = {
        let mut results = Vec::new();
        for use_cache in [true, false] {
            let model = Arc::new(ScriptedModel::always("unused".to_string()));
            let dir = tempfile::tempdir().unwrap();
            let mut ctx = ServiceContext::in_memory(model);
            if use_cache {
                ctx = ctx.with_cache(CacheHandle::new(Arc::new(MemoryCache::new())));
            }

            let tenant = Tenant::new("acme", PlanTier::Team, "s");
            ctx.store.put_tenant(tenant.clone()).await.unwrap();
            let project = Project::new(tenant.id, "api", "https://git.example/a", dir.path());
            ctx.store.put_project(project.clone()).await.unwrap();

            std::fs::write(dir.path().join("a.rs"), "// TODO: one\n.unwrap()\n").unwrap();

            let orchestrator = Orchestrator::new(ctx.clone());
            let crawler = Crawler::new(ctx.clone());
            crawler
                .crawl_project(&orchestrator, &project.id, CrawlOptions::default())
                .await
                .unwrap();

            let mut issues = ctx
                .store
                .list_issues(&IssueFilter::for_project(project.id.clone()))
                .await
                .unwrap();
            issues.sort_by(|a, b| a.fingerprint.as_str().cmp(b.fingerprint.as_str()));
            results.push(
                issues
                    .into_iter()
                    .map(|i| (i.kind, i.message, i.line))
                    .collect::<Vec<_>>(),
            );
        }
        (results.remove(0), results.remove(0))
    };

    assert_eq!(with_cache_issues, without_cache_issues);
    assert!(!with_cache_issues.is_empty());
}

#[tokio::test]
async fn crawl_records_health_snapshots() {
    let (ctx, orchestrator, crawler, project, dir) = setup().await;
    std::fs::write(dir.path().join("a.rs"), "// TODO: one\n").unwrap();

    crawler
        .crawl_project(&orchestrator, &project.id, CrawlOptions::default())
        .await
        .unwrap();

    let health = ctx
        .store
        .latest_health(&project.id, "a.rs")
        .await
        .unwrap()
        .expect("health recorded during crawl");
    assert!(health.score < 100, "a file with an issue is not perfect");
}
