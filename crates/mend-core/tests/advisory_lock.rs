//! Advisory-lock behavior around the apply stage: a held lock aborts the
//! pipeline with a lock-contention reason, and concurrent orchestrations
//! of the same file never both apply.

use std::sync::Arc;

use mend_core::{CrawlOptions, Crawler, Orchestrator, Patch, ScriptedModel, ServiceContext};
use mend_state::{Decision, IssueFilter, IssueStore, PlanTier, Project, Tenant, TenantDirectory};

fn patch_reply(line: u32, count: u32, replacement: &str, confidence: f64) -> String {
    let patch = Patch::single(line, count, replacement);
    serde_json::json!({ "patch": patch, "confidence": confidence }).to_string()
}

async fn setup() -> (ServiceContext, Orchestrator, Project, tempfile::TempDir) {
    let model = Arc::new(ScriptedModel::always(patch_reply(2, 1, "// resolved", 0.9)));
    let dir = tempfile::tempdir().unwrap();
    let ctx = ServiceContext::in_memory(model);

    let tenant = Tenant::new("acme", PlanTier::Team, "s");
    ctx.store.put_tenant(tenant.clone()).await.unwrap();
    let project = Project::new(tenant.id, "api", "https://git.example/a", dir.path());
    ctx.store.put_project(project.clone()).await.unwrap();

    std::fs::write(dir.path().join("main.rs"), "fn main() {}\n// TODO: fix\n").unwrap();

    let orchestrator = Orchestrator::new(ctx.clone());
    let crawler = Crawler::new(ctx.clone());
    crawler
        .crawl_project(&orchestrator, &project.id, CrawlOptions::default())
        .await
        .unwrap();

    (ctx, orchestrator, project, dir)
}

#[tokio::test]
async fn held_lock_aborts_with_lock_contention() {
    let (ctx, orchestrator, project, dir) = setup().await;
    let issue = ctx
        .store
        .list_issues(&IssueFilter::for_project(project.id.clone()))
        .await
        .unwrap()
        .remove(0);

    // Another worker is applying to this file.
    let guard = ctx
        .locks
        .try_acquire(&project.id, "main.rs")
        .expect("lock free");

    let outcome = orchestrator.run_issue(&issue.id).await.unwrap();
    assert_eq!(outcome.decision, Decision::Defer);
    assert_eq!(outcome.reason.as_deref(), Some("lock-contention"));

    // File untouched while the other worker held the lock.
    assert_eq!(
        std::fs::read_to_string(dir.path().join("main.rs")).unwrap(),
        "fn main() {}\n// TODO: fix\n"
    );

    // Once released, the fix goes through.
    drop(guard);
    let outcome = orchestrator.run_issue(&issue.id).await.unwrap();
    assert_eq!(outcome.decision, Decision::Apply);
    assert_eq!(
        std::fs::read_to_string(dir.path().join("main.rs")).unwrap(),
        "fn main() {}\n// resolved\n"
    );
}

#[tokio::test]
async fn concurrent_orchestrations_never_both_apply() {
    let (ctx, orchestrator, project, dir) = setup().await;
    let issue = ctx
        .store
        .list_issues(&IssueFilter::for_project(project.id.clone()))
        .await
        .unwrap()
        .remove(0);

    let orchestrator = Arc::new(orchestrator);
    let a = {
        let orchestrator = Arc::clone(&orchestrator);
        let id = issue.id.clone();
        tokio::spawn(async move { orchestrator.run_issue(&id).await.unwrap() })
    };
    let b = {
        let orchestrator = Arc::clone(&orchestrator);
        let id = issue.id.clone();
        tokio::spawn(async move { orchestrator.run_issue(&id).await.unwrap() })
    };

    let (a, b) = (a.await.unwrap(), b.await.unwrap());
    let applied = [&a, &b]
        .iter()
        .filter(|o| o.decision == Decision::Apply)
        .count();
    assert_eq!(applied, 1, "exactly one orchestration may apply: {a:?} {b:?}");

    // The loser aborted before mutating the file: one mutation total.
    assert_eq!(
        std::fs::read_to_string(dir.path().join("main.rs")).unwrap(),
        "fn main() {}\n// resolved\n"
    );

    let loser = if a.decision == Decision::Apply { &b } else { &a };
    let reason = loser.reason.as_deref().unwrap_or_default();
    assert!(
        ["lock-contention", "stale", "not-pending"].contains(&reason),
        "loser reason was {reason:?}"
    );
}
