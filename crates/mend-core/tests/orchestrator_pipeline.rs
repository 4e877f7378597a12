//! End-to-end orchestrator scenarios: first-seen fix applied, stale hash
//! at apply, duplicate delivery, verifier rejection, threshold deferral.

use std::sync::Arc;

use mend_core::{
    CrawlOptions, Crawler, FnModel, ModelClient, Orchestrator, Patch, ScriptedModel,
    ServiceContext,
};
use mend_state::{
    Decision, FixLedger, FixOutcome, IssueFilter, IssueStore, PatternStore, PlanTier, Project,
    ReviewStatus, Severity, Tenant, TenantDirectory,
};

/// A model completion wrapping a single-hunk patch with a confidence.
fn patch_reply(line: u32, count: u32, replacement: &str, confidence: f64) -> String {
    let patch = Patch::single(line, count, replacement);
    serde_json::json!({ "patch": patch, "confidence": confidence }).to_string()
}

async fn setup(
    model: Arc<dyn ModelClient>,
) -> (ServiceContext, Orchestrator, Crawler, Project, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let ctx = ServiceContext::in_memory(model);

    let tenant = Tenant::new("acme", PlanTier::Team, "hook-secret");
    ctx.store.put_tenant(tenant.clone()).await.unwrap();
    let project = Project::new(
        tenant.id,
        "api",
        "https://git.example/acme/api",
        dir.path(),
    );
    ctx.store.put_project(project.clone()).await.unwrap();

    let orchestrator = Orchestrator::new(ctx.clone());
    let crawler = Crawler::new(ctx.clone());
    (ctx, orchestrator, crawler, project, dir)
}

#[tokio::test]
async fn s1_first_seen_issue_safe_fix_applied() {
    let model = Arc::new(ScriptedModel::always(patch_reply(2, 1, "// resolved", 0.9)));
    let (ctx, orchestrator, crawler, project, dir) = setup(model).await;

    let file = dir.path().join("main.rs");
    std::fs::write(&file, "fn main() {}\n// TODO: fix\n").unwrap();

    let stats = crawler
        .crawl_project(&orchestrator, &project.id, CrawlOptions::default())
        .await
        .unwrap();
    assert_eq!(stats.issues_found, 1);

    let issues = ctx
        .store
        .list_issues(&IssueFilter::for_project(project.id.clone()))
        .await
        .unwrap();
    let issue = &issues[0];
    assert_eq!(issue.status, ReviewStatus::Pending);
    assert_eq!(issue.severity, Severity::Low);

    let outcome = orchestrator.run_issue(&issue.id).await.unwrap();
    assert_eq!(outcome.decision, Decision::Apply);

    // Issue: pending -> approved -> resolved, referencing the fix.
    let resolved = ctx.store.get_issue(&issue.id).await.unwrap();
    assert_eq!(resolved.status, ReviewStatus::Resolved);
    assert_eq!(resolved.fix_id, outcome.fix_id);
    let trail = ctx.store.audit_trail(&issue.id).await.unwrap();
    let steps: Vec<(ReviewStatus, ReviewStatus)> =
        trail.iter().map(|a| (a.from, a.to)).collect();
    assert_eq!(
        steps,
        vec![
            (ReviewStatus::Pending, ReviewStatus::Approved),
            (ReviewStatus::Approved, ReviewStatus::Resolved),
        ]
    );

    // Exactly one fix record: decision apply, outcome success.
    let fixes = ctx.store.fixes_for_issue(&issue.id).await.unwrap();
    assert_eq!(fixes.len(), 1);
    let fix = &fixes[0];
    assert_eq!(fix.decision, Decision::Apply);
    assert_eq!(fix.outcome, FixOutcome::Success);
    assert!(fix.applied);
    assert!(fix.stamps_monotonic());

    // Pattern learned: success 1, failure 0, confidence 2/3.
    let pattern = ctx
        .store
        .get_pattern(&issue.fingerprint)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pattern.success_count, 1);
    assert_eq!(pattern.failure_count, 0);
    assert!((pattern.confidence - 2.0 / 3.0).abs() < 1e-9);

    // File on disk equals the patched content.
    assert_eq!(
        std::fs::read_to_string(&file).unwrap(),
        "fn main() {}\n// resolved\n"
    );
}

#[tokio::test]
async fn s2_stale_hash_at_apply_defers() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("main.rs");
    std::fs::write(&file, "fn main() {}\n// TODO: fix\n").unwrap();

    // The model call is the slow stage; an external edit lands while it
    // runs. The orchestrator must notice at apply time.
    let file_for_model = file.clone();
    let model = Arc::new(FnModel(
        move |_prompt: &str| -> mend_core::Result<String> {
            std::fs::write(&file_for_model, "fn main() {}\n// TODO: fix\n// external edit\n")
                .unwrap();
            Ok(patch_reply(2, 1, "// resolved", 0.9))
        },
    ));

    let ctx = ServiceContext::in_memory(model);
    let tenant = Tenant::new("acme", PlanTier::Team, "hook-secret");
    ctx.store.put_tenant(tenant.clone()).await.unwrap();
    let project = Project::new(tenant.id, "api", "https://git.example/a", dir.path());
    ctx.store.put_project(project.clone()).await.unwrap();
    let orchestrator = Orchestrator::new(ctx.clone());
    let crawler = Crawler::new(ctx.clone());

    crawler
        .crawl_project(&orchestrator, &project.id, CrawlOptions::default())
        .await
        .unwrap();
    let issue = ctx
        .store
        .list_issues(&IssueFilter::for_project(project.id.clone()))
        .await
        .unwrap()
        .remove(0);

    let outcome = orchestrator.run_issue(&issue.id).await.unwrap();
    assert_eq!(outcome.decision, Decision::Defer);
    assert_eq!(outcome.reason.as_deref(), Some("stale"));

    // The orchestrator wrote nothing: the external edit is untouched.
    assert_eq!(
        std::fs::read_to_string(&file).unwrap(),
        "fn main() {}\n// TODO: fix\n// external edit\n"
    );

    // Fix record marked stale, not applied; issue remains pending.
    let fix = ctx
        .store
        .get_fix(outcome.fix_id.as_ref().unwrap())
        .await
        .unwrap();
    assert!(fix.stale);
    assert!(!fix.applied);
    assert_eq!(
        ctx.store.get_issue(&issue.id).await.unwrap().status,
        ReviewStatus::Pending
    );
}

#[tokio::test]
async fn idempotent_apply_second_run_aborts_stale() {
    let model = Arc::new(ScriptedModel::always(patch_reply(2, 1, "// resolved", 0.9)));
    let (ctx, orchestrator, crawler, project, dir) = setup(model).await;

    let file = dir.path().join("main.rs");
    std::fs::write(&file, "fn main() {}\n// TODO: fix\n").unwrap();

    crawler
        .crawl_project(&orchestrator, &project.id, CrawlOptions::default())
        .await
        .unwrap();
    let issue = ctx
        .store
        .list_issues(&IssueFilter::for_project(project.id.clone()))
        .await
        .unwrap()
        .remove(0);

    let first = orchestrator.run_issue(&issue.id).await.unwrap();
    assert_eq!(first.decision, Decision::Apply);
    let after_first = std::fs::read_to_string(&file).unwrap();

    // At-least-once delivery re-runs the job.
    let second = orchestrator.run_issue(&issue.id).await.unwrap();
    assert_eq!(second.decision, Decision::Defer);
    assert_eq!(second.reason.as_deref(), Some("stale"));

    // Exactly one fix record and one file mutation.
    assert_eq!(ctx.store.fixes_for_issue(&issue.id).await.unwrap().len(), 1);
    assert_eq!(std::fs::read_to_string(&file).unwrap(), after_first);
}

#[tokio::test]
async fn verifier_rejection_skips_and_marks_pattern_failure() {
    // The "fix" keeps the defect, so the detector re-raises.
    let model = Arc::new(ScriptedModel::always(patch_reply(
        2,
        1,
        "// TODO: still broken",
        0.9,
    )));
    let (ctx, orchestrator, crawler, project, dir) = setup(model).await;

    let file = dir.path().join("main.rs");
    std::fs::write(&file, "fn main() {}\n// TODO: fix\n").unwrap();

    crawler
        .crawl_project(&orchestrator, &project.id, CrawlOptions::default())
        .await
        .unwrap();
    let issue = ctx
        .store
        .list_issues(&IssueFilter::for_project(project.id.clone()))
        .await
        .unwrap()
        .remove(0);

    let outcome = orchestrator.run_issue(&issue.id).await.unwrap();
    assert_eq!(outcome.decision, Decision::Skip);
    assert_eq!(outcome.reason.as_deref(), Some("verifier-reject"));

    // File untouched, pattern charged a failure.
    assert_eq!(
        std::fs::read_to_string(&file).unwrap(),
        "fn main() {}\n// TODO: fix\n"
    );
    let pattern = ctx
        .store
        .get_pattern(&issue.fingerprint)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pattern.failure_count, 1);
    assert_eq!(pattern.success_count, 0);

    let fix = ctx
        .store
        .get_fix(outcome.fix_id.as_ref().unwrap())
        .await
        .unwrap();
    assert!(!fix.verifier_verdict.as_ref().unwrap().pass);
}

#[tokio::test]
async fn low_confidence_defers_for_human_review() {
    let model = Arc::new(ScriptedModel::always(patch_reply(2, 1, "// resolved", 0.5)));
    let (ctx, orchestrator, crawler, project, dir) = setup(model).await;

    let file = dir.path().join("main.rs");
    std::fs::write(&file, "fn main() {}\n// TODO: fix\n").unwrap();

    crawler
        .crawl_project(&orchestrator, &project.id, CrawlOptions::default())
        .await
        .unwrap();
    let issue = ctx
        .store
        .list_issues(&IssueFilter::for_project(project.id.clone()))
        .await
        .unwrap()
        .remove(0);

    let outcome = orchestrator.run_issue(&issue.id).await.unwrap();
    assert_eq!(outcome.decision, Decision::Defer);
    assert_eq!(outcome.reason.as_deref(), Some("below-threshold"));

    // Queued for human review: still pending, file untouched.
    assert_eq!(
        ctx.store.get_issue(&issue.id).await.unwrap().status,
        ReviewStatus::Pending
    );
    assert_eq!(
        std::fs::read_to_string(&file).unwrap(),
        "fn main() {}\n// TODO: fix\n"
    );
}

#[tokio::test]
async fn tenant_threshold_override_is_honored() {
    let model = Arc::new(ScriptedModel::always(patch_reply(2, 1, "// resolved", 0.7)));
    let dir = tempfile::tempdir().unwrap();
    let ctx = ServiceContext::in_memory(model);

    // This tenant auto-applies anything at or above 0.6.
    let mut tenant = Tenant::new("lenient", PlanTier::Enterprise, "s");
    tenant.apply_threshold = Some(0.6);
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
    let issue = ctx
        .store
        .list_issues(&IssueFilter::for_project(project.id.clone()))
        .await
        .unwrap()
        .remove(0);

    let outcome = orchestrator.run_issue(&issue.id).await.unwrap();
    assert_eq!(outcome.decision, Decision::Apply);
}
