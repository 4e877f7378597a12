//! Queue workers hosted by the daemon.
//!
//! Each worker task leases jobs, renews the lease while working, and acks
//! or nacks on completion. Handlers are idempotent at the (project,
//! fingerprint) level, so at-least-once delivery is safe. Retriable
//! errors nack (the queue applies backoff); everything else acks with the
//! terminal outcome already recorded by the core.

use std::time::Duration;

use serde::Deserialize;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use mend_core::{CrawlOptions, METRICS};
use mend_state::{FixLedger, IssueId, JobQueue, ProjectId, QueueName};

use crate::state::AppState;

/// Poll interval when a queue is empty.
const IDLE_POLL: Duration = Duration::from_millis(500);

/// Lease visibility for crawl and fix jobs.
const VISIBILITY: Duration = Duration::from_secs(60);

/// Interval between monitor sweeps.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct CrawlPayload {
    project_id: ProjectId,
    #[serde(default)]
    options: CrawlOptions,
}

#[derive(Debug, Deserialize)]
struct FixPayload {
    issue_id: IssueId,
}

/// Spawn the worker fleet: `worker_concurrency` crawl workers, one fix
/// worker, one notification drainer, and the monitor sweeper.
pub fn spawn_workers(state: AppState) {
    for worker in 0..state.ctx.config.worker_concurrency {
        let state = state.clone();
        tokio::spawn(async move {
            crawl_worker(state, worker).await;
        });
    }

    {
        let state = state.clone();
        tokio::spawn(async move {
            fix_worker(state).await;
        });
    }
    {
        let state = state.clone();
        tokio::spawn(async move {
            notification_worker(state).await;
        });
    }
    tokio::spawn(async move {
        monitor_sweeper(state).await;
    });
}

async fn crawl_worker(state: AppState, worker: usize) {
    info!(worker, "crawl worker started");
    loop {
        let lease = match state.ctx.queue.lease(QueueName::Crawl, VISIBILITY).await {
            Ok(Some(lease)) => lease,
            Ok(None) => {
                sleep(IDLE_POLL).await;
                continue;
            }
            Err(e) => {
                error!(error = %e, "crawl lease failed");
                sleep(IDLE_POLL).await;
                continue;
            }
        };

        let payload: CrawlPayload = match serde_json::from_value(lease.job.payload.clone()) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(job = %lease.job.id, error = %e, "unparsable crawl payload");
                let _ = state
                    .ctx
                    .queue
                    .nack(&lease.token, &format!("unparsable payload: {e}"))
                    .await;
                continue;
            }
        };

        debug!(job = %lease.job.id, project = %payload.project_id, "crawl job leased");
        let result = state
            .crawler
            .crawl_project(&state.orchestrator, &payload.project_id, payload.options)
            .await;

        match result {
            Ok(stats) => {
                // Stats are best-effort: served by GET /crawl/:job_id.
                if let Ok(bytes) = serde_json::to_vec(&stats) {
                    state
                        .ctx
                        .cache
                        .set(
                            &format!("crawl-stats:{}", lease.job.id),
                            bytes,
                            Duration::from_secs(3_600),
                        )
                        .await;
                }
                if let Err(e) = state.ctx.queue.ack(&lease.token).await {
                    warn!(job = %lease.job.id, error = %e, "ack failed");
                }
            }
            Err(e) if e.is_retriable() => {
                warn!(job = %lease.job.id, error = %e, "crawl retrying");
                let _ = state.ctx.queue.nack(&lease.token, &e.to_string()).await;
            }
            Err(e) => {
                error!(job = %lease.job.id, error = %e, "crawl failed terminally");
                let _ = state.ctx.queue.nack(&lease.token, &e.to_string()).await;
            }
        }
    }
}

async fn fix_worker(state: AppState) {
    info!("fix worker started");
    loop {
        let lease = match state.ctx.queue.lease(QueueName::Fix, VISIBILITY).await {
            Ok(Some(lease)) => lease,
            Ok(None) => {
                sleep(IDLE_POLL).await;
                continue;
            }
            Err(e) => {
                error!(error = %e, "fix lease failed");
                sleep(IDLE_POLL).await;
                continue;
            }
        };

        let payload: FixPayload = match serde_json::from_value(lease.job.payload.clone()) {
            Ok(payload) => payload,
            Err(e) => {
                let _ = state
                    .ctx
                    .queue
                    .nack(&lease.token, &format!("unparsable payload: {e}"))
                    .await;
                continue;
            }
        };

        match state.orchestrator.run_issue(&payload.issue_id).await {
            Ok(outcome) => {
                debug!(issue = %payload.issue_id, decision = ?outcome.decision, "fix job done");
                let _ = state.ctx.queue.ack(&lease.token).await;
            }
            Err(e) if e.is_retriable() => {
                let _ = state.ctx.queue.nack(&lease.token, &e.to_string()).await;
            }
            Err(e) => {
                error!(issue = %payload.issue_id, error = %e, "fix job failed");
                let _ = state.ctx.queue.nack(&lease.token, &e.to_string()).await;
            }
        }
    }
}

/// Notification delivery is a collaborator; the core logs and drains.
async fn notification_worker(state: AppState) {
    info!("notification worker started");
    loop {
        match state.ctx.queue.lease(QueueName::Notification, VISIBILITY).await {
            Ok(Some(lease)) => {
                info!(payload = %lease.job.payload, "notification dispatched");
                let _ = state.ctx.queue.ack(&lease.token).await;
            }
            Ok(None) => sleep(IDLE_POLL).await,
            Err(e) => {
                error!(error = %e, "notification lease failed");
                sleep(IDLE_POLL).await;
            }
        }
    }
}

/// Periodic monitor sweep across every project with open monitors.
async fn monitor_sweeper(state: AppState) {
    info!("monitor sweeper started");
    loop {
        sleep(SWEEP_INTERVAL).await;
        let projects = match state.ctx.store.monitored_projects().await {
            Ok(projects) => projects,
            Err(e) => {
                error!(error = %e, "monitor sweep project scan failed");
                continue;
            }
        };
        for project_id in projects {
            match state.orchestrator.sweep_monitors(&project_id).await {
                Ok(rolled) if !rolled.is_empty() => {
                    METRICS.flush();
                    warn!(project = %project_id, count = rolled.len(), "regressions rolled back");
                }
                Ok(_) => {}
                Err(e) => error!(project = %project_id, error = %e, "monitor sweep failed"),
            }
        }
    }
}
