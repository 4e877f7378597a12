//! HTTP surface tests: webhook authentication, backpressure behavior,
//! crawl intake, issue listing and review transitions.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use mend_core::{CrawlOptions, Crawler, Orchestrator, ScriptedModel, ServiceContext};
use mend_state::{
    FixLedger, IssueFilter, IssueStore, JobQueue, PlanTier, Project, QueueName, ReviewStatus,
    Tenant, TenantDirectory,
};
use mendd::webhook::sign;
use mendd::{router, AppState};

struct Harness {
    state: AppState,
    tenant: Tenant,
    project: Project,
    _dir: tempfile::TempDir,
}

async fn setup() -> Harness {
    let model = Arc::new(ScriptedModel::always("unused".to_string()));
    let dir = tempfile::tempdir().unwrap();
    let ctx = ServiceContext::in_memory(model);

    let tenant = Tenant::new("acme", PlanTier::Team, "hook-secret");
    ctx.store.put_tenant(tenant.clone()).await.unwrap();
    let project = Project::new(
        tenant.id.clone(),
        "api",
        "https://git.example/acme/api",
        dir.path(),
    );
    ctx.store.put_project(project.clone()).await.unwrap();

    Harness {
        state: AppState::new(ctx),
        tenant,
        project,
        _dir: dir,
    }
}

fn push_payload() -> String {
    serde_json::json!({
        "repository": {
            "clone_url": "https://git.example/acme/api",
            "default_branch": "main"
        },
        "commits": [ { "modified": ["src/lib.rs"] } ]
    })
    .to_string()
}

fn webhook_request(tenant_id: &str, body: &str, signature: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/webhook/{tenant_id}"))
        .header("content-type", "application/json")
        .header("x-signature", signature)
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
}

// ---------------------------------------------------------------------------
// Webhooks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn bad_signature_returns_401_and_enqueues_nothing() {
    let h = setup().await;
    let body = push_payload();

    for signature in [
        "deadbeef",
        "",
        &sign("wrong-secret", body.as_bytes()),
        "not even hex",
    ] {
        let response = router(h.state.clone())
            .oneshot(webhook_request(&h.tenant.id.0, &body, signature))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    // Nothing reached the queue.
    assert_eq!(h.state.ctx.queue.depth(QueueName::Crawl).await.unwrap(), 0);
}

#[tokio::test]
async fn missing_signature_header_returns_401() {
    let h = setup().await;
    let body = push_payload();
    let request = Request::builder()
        .method("POST")
        .uri(format!("/webhook/{}", h.tenant.id.0))
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap();

    let response = router(h.state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(h.state.ctx.queue.depth(QueueName::Crawl).await.unwrap(), 0);
}

#[tokio::test]
async fn unknown_tenant_returns_401() {
    let h = setup().await;
    let body = push_payload();
    let signature = sign("hook-secret", body.as_bytes());

    let response = router(h.state.clone())
        .oneshot(webhook_request("no-such-tenant", &body, &signature))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn valid_webhook_enqueues_scoped_crawl() {
    let h = setup().await;
    let body = push_payload();
    let signature = sign("hook-secret", body.as_bytes());

    let response = router(h.state.clone())
        .oneshot(webhook_request(&h.tenant.id.0, &body, &signature))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    assert_eq!(h.state.ctx.queue.depth(QueueName::Crawl).await.unwrap(), 1);
    let lease = h
        .state
        .ctx
        .queue
        .lease(QueueName::Crawl, std::time::Duration::from_secs(60))
        .await
        .unwrap()
        .unwrap();
    let changed = lease.job.payload["options"]["changed_paths"].clone();
    assert_eq!(changed, serde_json::json!(["src/lib.rs"]));
}

#[tokio::test]
async fn s5_duplicate_webhooks_converge_to_one_issue_set() {
    let h = setup().await;
    std::fs::write(h.project.root_path.join("src_lib.rs"), "// TODO: fix\n").unwrap();

    let body = serde_json::json!({
        "repository": { "clone_url": "https://git.example/acme/api" },
        "commits": [ { "modified": ["src_lib.rs"] } ]
    })
    .to_string();
    let signature = sign("hook-secret", body.as_bytes());

    for _ in 0..3 {
        let response = router(h.state.clone())
            .oneshot(webhook_request(&h.tenant.id.0, &body, &signature))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    // At most three crawl jobs were enqueued.
    let depth = h.state.ctx.queue.depth(QueueName::Crawl).await.unwrap();
    assert!(depth <= 3);

    // Processing every job produces the same issue set as processing one.
    let crawler = Crawler::new(h.state.ctx.clone());
    let orchestrator = Orchestrator::new(h.state.ctx.clone());
    while let Some(lease) = h
        .state
        .ctx
        .queue
        .lease(QueueName::Crawl, std::time::Duration::from_secs(60))
        .await
        .unwrap()
    {
        let options: CrawlOptions =
            serde_json::from_value(lease.job.payload["options"].clone()).unwrap();
        crawler
            .crawl_project(&orchestrator, &h.project.id, options)
            .await
            .unwrap();
        h.state.ctx.queue.ack(&lease.token).await.unwrap();
    }

    let issues = h
        .state
        .ctx
        .store
        .list_issues(&IssueFilter::for_project(h.project.id.clone()))
        .await
        .unwrap();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].occurrence_count, 1);
    // The model declined to produce a patch, so at most one deferred fix
    // attempt exists; duplicate webhooks never add more.
    let fixes = h
        .state
        .ctx
        .store
        .fixes_for_issue(&issues[0].id)
        .await
        .unwrap();
    assert!(fixes.len() <= 1, "duplicate fix records: {}", fixes.len());
}

#[tokio::test]
async fn pr_webhook_under_backpressure_gets_retry_advice() {
    let h = setup().await;
    let state = h.state.clone().with_high_water(0);

    // Saturate the queue past the zero high-water mark.
    state
        .ctx
        .queue
        .enqueue(QueueName::Crawl, serde_json::json!({}), 0)
        .await
        .unwrap();

    let body = serde_json::json!({
        "repository": { "clone_url": "https://git.example/acme/api" },
        "pull_request": { "head": "feature" },
        "changed_files": ["src/lib.rs"]
    })
    .to_string();
    let signature = sign("hook-secret", body.as_bytes());

    let response = router(state.clone())
        .oneshot(webhook_request(&h.tenant.id.0, &body, &signature))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    assert_eq!(json["code"], "backpressure");

    // Push events are still absorbed under the same pressure.
    let push = push_payload();
    let push_sig = sign("hook-secret", push.as_bytes());
    let response = router(state.clone())
        .oneshot(webhook_request(&h.tenant.id.0, &push, &push_sig))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

// ---------------------------------------------------------------------------
// Crawl intake
// ---------------------------------------------------------------------------

#[tokio::test]
async fn crawl_accepts_and_reports_status() {
    let h = setup().await;

    let response = router(h.state.clone())
        .oneshot(json_request(
            "POST",
            "/crawl",
            serde_json::json!({
                "project_id": h.project.id.0,
                "options": { "auto_fix": false, "budget": 10 }
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    let job_id = json["job_id"].as_str().unwrap().to_string();

    let response = router(h.state.clone())
        .oneshot(
            Request::builder()
                .uri(format!("/crawl/{job_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "queued");
}

#[tokio::test]
async fn crawl_unknown_project_is_404() {
    let h = setup().await;
    let response = router(h.state.clone())
        .oneshot(json_request(
            "POST",
            "/crawl",
            serde_json::json!({ "project_id": "nope" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn crawl_over_high_water_is_429() {
    let h = setup().await;
    let state = h.state.clone().with_high_water(0);
    state
        .ctx
        .queue
        .enqueue(QueueName::Crawl, serde_json::json!({}), 0)
        .await
        .unwrap();

    let response = router(state)
        .oneshot(json_request(
            "POST",
            "/crawl",
            serde_json::json!({ "project_id": h.project.id.0 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

// ---------------------------------------------------------------------------
// Issues and review
// ---------------------------------------------------------------------------

async fn seed_issue(h: &Harness) -> mend_state::IssueId {
    std::fs::write(h.project.root_path.join("a.rs"), "// TODO: fix\n").unwrap();
    let crawler = Crawler::new(h.state.ctx.clone());
    let orchestrator = Orchestrator::new(h.state.ctx.clone());
    crawler
        .crawl_project(&orchestrator, &h.project.id, CrawlOptions::default())
        .await
        .unwrap();
    h.state
        .ctx
        .store
        .list_issues(&IssueFilter::for_project(h.project.id.clone()))
        .await
        .unwrap()
        .remove(0)
        .id
}

#[tokio::test]
async fn issues_listing_filters_by_status() {
    let h = setup().await;
    seed_issue(&h).await;

    let response = router(h.state.clone())
        .oneshot(
            Request::builder()
                .uri(format!(
                    "/issues?project_id={}&status=pending&severity=low",
                    h.project.id.0
                ))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["count"], 1);

    let response = router(h.state.clone())
        .oneshot(
            Request::builder()
                .uri(format!(
                    "/issues?project_id={}&status=resolved",
                    h.project.id.0
                ))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["count"], 0);
}

#[tokio::test]
async fn review_transitions_and_rejects_illegal_moves() {
    let h = setup().await;
    let issue_id = seed_issue(&h).await;

    // pending -> rejected by human review.
    let response = router(h.state.clone())
        .oneshot(json_request(
            "POST",
            &format!("/issues/{}/review", issue_id.0),
            serde_json::json!({ "action": "reject", "notes": "false positive" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let issue = h.state.ctx.store.get_issue(&issue_id).await.unwrap();
    assert_eq!(issue.status, ReviewStatus::Rejected);

    // rejected is terminal: a second review returns 409 and changes nothing.
    let response = router(h.state.clone())
        .oneshot(json_request(
            "POST",
            &format!("/issues/{}/review", issue_id.0),
            serde_json::json!({ "action": "approve" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let json = body_json(response).await;
    assert_eq!(json["code"], "invalid_transition");

    let issue = h.state.ctx.store.get_issue(&issue_id).await.unwrap();
    assert_eq!(issue.status, ReviewStatus::Rejected);
}

#[tokio::test]
async fn review_notes_land_in_the_audit_trail() {
    let h = setup().await;
    let issue_id = seed_issue(&h).await;

    router(h.state.clone())
        .oneshot(json_request(
            "POST",
            &format!("/issues/{}/review", issue_id.0),
            serde_json::json!({ "action": "approve", "notes": "looks safe" }),
        ))
        .await
        .unwrap();

    let trail = h.state.ctx.store.audit_trail(&issue_id).await.unwrap();
    assert_eq!(trail.len(), 1);
    assert!(trail[0].actor.contains("looks safe"));
}

// ---------------------------------------------------------------------------
// Fixes and analytics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_fix_is_404() {
    let h = setup().await;
    let response = router(h.state.clone())
        .oneshot(
            Request::builder()
                .uri("/fixes/no-such-fix")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn analytics_returns_health_series() {
    let h = setup().await;
    seed_issue(&h).await;

    let response = router(h.state.clone())
        .oneshot(
            Request::builder()
                .uri(format!("/analytics?project_id={}&range=7d", h.project.id.0))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["series"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn analytics_rejects_bad_range() {
    let h = setup().await;
    let response = router(h.state.clone())
        .oneshot(
            Request::builder()
                .uri(format!(
                    "/analytics?project_id={}&range=fortnight",
                    h.project.id.0
                ))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
