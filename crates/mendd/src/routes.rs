//! HTTP API routes.
//!
//! Every failure maps to a stable machine-readable code plus a human
//! message, mirroring the core error taxonomy. Webhook overflow is never
//! refused for pushes; pull-request events get retry advice under
//! backpressure; plain crawl requests get 429.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use mend_core::{CrawlOptions, CrawlStats, MendError, METRICS};
use mend_state::{
    FixLedger, HealthStore, IssueFilter, IssueId, IssueKind, IssueStore, JobId, JobQueue,
    JobState, ProjectId, QueueName, ReviewStatus, Severity, StoreError, TenantDirectory,
    TenantId,
};

use crate::state::AppState;
use crate::webhook;

/// Machine-readable error envelope.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "contract_violation", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "code": self.code, "message": self.message }));
        (self.status, body).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match &err {
            StoreError::InvalidTransition { .. } => {
                ApiError::new(StatusCode::CONFLICT, "invalid_transition", err.to_string())
            }
            StoreError::IssueNotFound(_)
            | StoreError::FixNotFound(_)
            | StoreError::ProjectNotFound(_)
            | StoreError::TenantNotFound(_) => ApiError::not_found(err.to_string()),
            _ => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "storage_error",
                err.to_string(),
            ),
        }
    }
}

impl From<MendError> for ApiError {
    fn from(err: MendError) -> Self {
        let status = match &err {
            MendError::InvalidTransition { .. } => StatusCode::CONFLICT,
            MendError::Contract(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError::new(status, err.code(), err.to_string())
    }
}

impl From<mend_state::QueueError> for ApiError {
    fn from(err: mend_state::QueueError) -> Self {
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "queue_error",
            err.to_string(),
        )
    }
}

/// Build the daemon router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/crawl", post(post_crawl))
        .route("/crawl/:job_id", get(get_crawl))
        .route("/issues", get(get_issues))
        .route("/issues/:id/review", post(post_review))
        .route("/fixes/:id", get(get_fix))
        .route("/webhook/:tenant_id", post(post_webhook))
        .route("/analytics", get(get_analytics))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// POST /crawl
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CrawlRequest {
    project_id: String,
    #[serde(default)]
    options: CrawlRequestOptions,
}

#[derive(Debug, Default, Deserialize)]
struct CrawlRequestOptions {
    #[serde(default)]
    auto_fix: bool,
    budget: Option<usize>,
}

async fn post_crawl(
    State(state): State<AppState>,
    Json(req): Json<CrawlRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let project_id = ProjectId(req.project_id);
    state.ctx.store.get_project(&project_id).await?;

    let depth = state.ctx.queue.depth(QueueName::Crawl).await?;
    if depth > state.high_water {
        return Err(ApiError::new(
            StatusCode::TOO_MANY_REQUESTS,
            "backpressure",
            format!("crawl queue depth {depth} over high-water mark"),
        ));
    }

    let options = CrawlOptions {
        auto_fix: req.options.auto_fix,
        budget: req.options.budget,
        changed_paths: Vec::new(),
    };
    let job_id = state
        .ctx
        .queue
        .enqueue(
            QueueName::Crawl,
            json!({ "project_id": project_id, "options": options }),
            10,
        )
        .await?;

    info!(job = %job_id, project = %project_id, "crawl accepted");
    Ok((StatusCode::ACCEPTED, Json(json!({ "job_id": job_id }))))
}

// ---------------------------------------------------------------------------
// GET /crawl/:job_id
// ---------------------------------------------------------------------------

async fn get_crawl(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = JobId(job_id.clone());
    let status = match state.ctx.queue.job_state(&id).await {
        Ok(JobState::Queued) => "queued",
        Ok(JobState::Running) => "running",
        Ok(JobState::Done) => "done",
        Ok(JobState::Dead) => "failed",
        Err(_) => return Err(ApiError::not_found(format!("job {job_id} not found"))),
    };

    // Stats land in the cache when the worker finishes; absence is fine.
    let stats = state
        .ctx
        .cache
        .get(&format!("crawl-stats:{job_id}"))
        .await
        .and_then(|bytes| serde_json::from_slice::<CrawlStats>(&bytes).ok());

    Ok(Json(json!({ "status": status, "stats": stats })))
}

// ---------------------------------------------------------------------------
// GET /issues
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct IssuesQuery {
    project_id: String,
    status: Option<String>,
    severity: Option<String>,
    kind: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

fn parse_status(raw: &str) -> Result<ReviewStatus, ApiError> {
    match raw {
        "pending" => Ok(ReviewStatus::Pending),
        "approved" => Ok(ReviewStatus::Approved),
        "rejected" => Ok(ReviewStatus::Rejected),
        "deferred" => Ok(ReviewStatus::Deferred),
        "resolved" => Ok(ReviewStatus::Resolved),
        "superseded" => Ok(ReviewStatus::Superseded),
        other => Err(ApiError::bad_request(format!("unknown status {other:?}"))),
    }
}

fn parse_severity(raw: &str) -> Result<Severity, ApiError> {
    match raw {
        "critical" => Ok(Severity::Critical),
        "high" => Ok(Severity::High),
        "medium" => Ok(Severity::Medium),
        "low" => Ok(Severity::Low),
        other => Err(ApiError::bad_request(format!("unknown severity {other:?}"))),
    }
}

fn parse_kind(raw: &str) -> Result<IssueKind, ApiError> {
    match raw {
        "style" => Ok(IssueKind::Style),
        "error_handling" | "error-handling" => Ok(IssueKind::ErrorHandling),
        "security" => Ok(IssueKind::Security),
        "performance" => Ok(IssueKind::Performance),
        "smell" => Ok(IssueKind::Smell),
        "architecture" => Ok(IssueKind::Architecture),
        "other" => Ok(IssueKind::Other),
        other => Err(ApiError::bad_request(format!("unknown kind {other:?}"))),
    }
}

async fn get_issues(
    State(state): State<AppState>,
    Query(query): Query<IssuesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let project_id = ProjectId(query.project_id);
    state.ctx.store.get_project(&project_id).await?;

    let filter = IssueFilter {
        project_id: Some(project_id),
        status: query.status.as_deref().map(parse_status).transpose()?,
        severity: query.severity.as_deref().map(parse_severity).transpose()?,
        kind: query.kind.as_deref().map(parse_kind).transpose()?,
        path: None,
        limit: query.limit.unwrap_or(100),
        offset: query.offset.unwrap_or(0),
    };

    let issues = state.ctx.store.list_issues(&filter).await?;
    let count = issues.len();
    Ok(Json(json!({ "issues": issues, "count": count })))
}

// ---------------------------------------------------------------------------
// POST /issues/:id/review
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ReviewAction {
    Approve,
    Reject,
    Defer,
}

#[derive(Debug, Deserialize)]
struct ReviewRequest {
    action: ReviewAction,
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Debug, Serialize)]
struct ReviewResponse {
    status: ReviewStatus,
}

async fn post_review(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ReviewRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let issue_id = IssueId(id);
    let to = match req.action {
        ReviewAction::Approve => ReviewStatus::Approved,
        ReviewAction::Reject => ReviewStatus::Rejected,
        ReviewAction::Defer => ReviewStatus::Deferred,
    };

    let actor = match req.notes.as_deref() {
        Some(notes) if !notes.is_empty() => format!("human-review: {notes}"),
        _ => "human-review".to_string(),
    };

    state
        .ctx
        .store
        .transition_issue(&issue_id, to, &actor, None)
        .await?;

    Ok(Json(ReviewResponse { status: to }))
}

// ---------------------------------------------------------------------------
// GET /fixes/:id
// ---------------------------------------------------------------------------

async fn get_fix(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let fix = state.ctx.store.get_fix(&mend_state::FixId(id)).await?;
    Ok(Json(fix))
}

// ---------------------------------------------------------------------------
// POST /webhook/:tenant_id
// ---------------------------------------------------------------------------

async fn post_webhook(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let unauthorized = || {
        METRICS.inc_webhooks_rejected();
        ApiError::new(StatusCode::UNAUTHORIZED, "bad_signature", "signature mismatch")
    };

    // Unknown tenant and bad signature are indistinguishable on purpose.
    let tenant = match state.ctx.store.get_tenant(&TenantId(tenant_id)).await {
        Ok(tenant) => tenant,
        Err(_) => return Err(unauthorized()),
    };
    let signature = headers
        .get("x-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(unauthorized)?;
    if !webhook::verify_signature(&tenant.webhook_secret, &body, signature) {
        return Err(unauthorized());
    }

    let payload: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("malformed webhook body: {e}")))?;
    let event = webhook::extract_event(&payload)
        .ok_or_else(|| ApiError::bad_request("payload carries no repository"))?;

    let project = state
        .ctx
        .store
        .find_project_by_repo(&tenant.id, &event.repo_url)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("no project for {}", event.repo_url)))?;

    // Backpressure: PR events get retry advice; pushes always enqueue and
    // overflow is absorbed by the dead-letter queue.
    let depth = state.ctx.queue.depth(QueueName::Crawl).await?;
    if event.is_pull_request && depth > state.high_water {
        return Ok((
            StatusCode::ACCEPTED,
            Json(json!({
                "code": "backpressure",
                "message": "crawl queue saturated; retry the PR event later",
                "retry_after_seconds": 60,
            })),
        )
            .into_response());
    }

    let options = CrawlOptions {
        auto_fix: true,
        budget: None,
        changed_paths: event.changed_paths,
    };
    state
        .ctx
        .queue
        .enqueue(
            QueueName::Crawl,
            json!({ "project_id": project.id, "options": options }),
            20,
        )
        .await?;

    info!(project = %project.id, "webhook accepted");
    Ok(StatusCode::NO_CONTENT.into_response())
}

// ---------------------------------------------------------------------------
// GET /analytics
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AnalyticsQuery {
    project_id: String,
    /// e.g. "7d", "24h"; defaults to seven days.
    range: Option<String>,
}

fn parse_range(raw: &str) -> Result<chrono::Duration, ApiError> {
    let (value, unit) = raw.split_at(raw.len().saturating_sub(1));
    let value: i64 = value
        .parse()
        .map_err(|_| ApiError::bad_request(format!("bad range {raw:?}")))?;
    match unit {
        "d" => Ok(chrono::Duration::days(value)),
        "h" => Ok(chrono::Duration::hours(value)),
        _ => Err(ApiError::bad_request(format!("bad range unit {raw:?}"))),
    }
}

async fn get_analytics(
    State(state): State<AppState>,
    Query(query): Query<AnalyticsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let project_id = ProjectId(query.project_id);
    state.ctx.store.get_project(&project_id).await?;

    let range = parse_range(query.range.as_deref().unwrap_or("7d"))?;
    let since = chrono::Utc::now() - range;
    let series = state.ctx.store.trend(&project_id, since).await?;

    if series.is_empty() {
        warn!(project = %project_id, "analytics query over empty trend");
    }
    Ok(Json(json!({ "series": series })))
}
