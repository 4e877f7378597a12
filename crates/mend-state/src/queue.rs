//! Durable, prioritized job queues with leases and dead-lettering
//!
//! Guarantees:
//! - At-least-once delivery: a worker that stops renewing its visibility
//!   timeout loses the lease and the job becomes eligible again, so
//!   handlers must be idempotent at the (project, fingerprint) level.
//! - Priority ordering: larger priorities lease first within a queue.
//! - Bounded retry: jobs exceeding `max_attempts` move to a dead-letter
//!   queue carrying the last error.
//! - Backoff: retries wait `base * 2^(attempt-1)` capped at five minutes,
//!   with full jitter.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// Result type for queue operations
pub type QueueResult<T> = std::result::Result<T, QueueError>;

/// Default maximum delivery attempts before dead-lettering.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default visibility timeout for a lease.
pub const DEFAULT_VISIBILITY: Duration = Duration::from_secs(60);

/// Retry backoff base.
pub const BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Retry backoff cap.
pub const BACKOFF_CAP: Duration = Duration::from_secs(300);

/// The named queues the platform runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    Crawl,
    Fix,
    Analysis,
    Notification,
}

impl QueueName {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Crawl => "crawl",
            QueueName::Fix => "fix",
            QueueName::Analysis => "analysis",
            QueueName::Notification => "notification",
        }
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

impl JobId {
    pub fn new() -> Self {
        JobId(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque lease token proving a worker holds a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeaseToken(pub String);

impl LeaseToken {
    fn new() -> Self {
        LeaseToken(uuid::Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for LeaseToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One unit of queued work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub queue: QueueName,
    pub payload: serde_json::Value,
    /// Larger runs first.
    pub priority: i32,
    /// Delivery attempts so far (incremented at lease time).
    pub attempt: u32,
    pub max_attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

/// An active lease on a job.
#[derive(Debug, Clone)]
pub struct Lease {
    pub job: Job,
    pub token: LeaseToken,
    pub expires_at: DateTime<Utc>,
}

/// Coarse lifecycle state of a job, for status queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Done,
    Dead,
}

/// A job that exhausted its attempts, kept for inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadJob {
    pub job: Job,
    pub last_error: String,
    pub died_at: DateTime<Utc>,
}

/// Compute the retry delay for a given attempt with full jitter.
///
/// Exponential in the attempt number, capped, then a uniform draw from
/// [0, capped] so synchronized retries spread out.
pub fn backoff_delay(attempt: u32) -> Duration {
    use rand::Rng;
    let exp = BACKOFF_BASE.as_millis() as u64 * 2u64.saturating_pow(attempt.saturating_sub(1));
    let capped = exp.min(BACKOFF_CAP.as_millis() as u64);
    let jittered = rand::thread_rng().gen_range(0..=capped);
    Duration::from_millis(jittered)
}

/// Prioritized job queues with leases.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a payload. Jobs with larger priority lease first.
    async fn enqueue(
        &self,
        queue: QueueName,
        payload: serde_json::Value,
        priority: i32,
    ) -> QueueResult<JobId>;

    /// Lease the highest-priority eligible job, or `None` if the queue is
    /// empty. The lease expires after `visibility` unless renewed.
    async fn lease(&self, queue: QueueName, visibility: Duration) -> QueueResult<Option<Lease>>;

    /// Extend an active lease.
    async fn renew(&self, token: &LeaseToken, visibility: Duration) -> QueueResult<()>;

    /// Acknowledge successful completion; the job is done.
    async fn ack(&self, token: &LeaseToken) -> QueueResult<()>;

    /// Report failure; the job retries with backoff or dead-letters.
    async fn nack(&self, token: &LeaseToken, error: &str) -> QueueResult<()>;

    /// Number of jobs waiting (not leased, not dead) in a queue.
    async fn depth(&self, queue: QueueName) -> QueueResult<usize>;

    /// Lifecycle state of a job.
    async fn job_state(&self, id: &JobId) -> QueueResult<JobState>;

    /// Dead-lettered jobs for a queue.
    async fn dead_letters(&self, queue: QueueName) -> QueueResult<Vec<DeadJob>>;
}

// ---------------------------------------------------------------------------
// MemoryQueue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct ReadyJob {
    job: Job,
    not_before: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct LeasedJob {
    job: Job,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct QueueInner {
    ready: HashMap<QueueName, Vec<ReadyJob>>,
    leased: HashMap<String, LeasedJob>,
    dead: HashMap<QueueName, Vec<DeadJob>>,
    states: HashMap<String, JobState>,
}

/// In-memory queue backing the embedded runtime and all tests.
///
/// Satisfies the full `JobQueue` contract, including lease expiry and
/// dead-lettering, from a single `Mutex<QueueInner>`.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    inner: Mutex<QueueInner>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move expired leases back to their ready queues, dead-lettering jobs
    /// that have exhausted their attempts. Called on every lease.
    fn reclaim_expired(inner: &mut QueueInner, now: DateTime<Utc>) {
        let expired: Vec<String> = inner
            .leased
            .iter()
            .filter(|(_, l)| l.expires_at <= now)
            .map(|(t, _)| t.clone())
            .collect();

        for token in expired {
            let leased = inner.leased.remove(&token).expect("token collected above");
            let job = leased.job;
            if job.attempt >= job.max_attempts {
                inner.states.insert(job.id.0.clone(), JobState::Dead);
                inner.dead.entry(job.queue).or_default().push(DeadJob {
                    last_error: "lease expired after final attempt".to_string(),
                    died_at: now,
                    job,
                });
            } else {
                inner.states.insert(job.id.0.clone(), JobState::Queued);
                inner.ready.entry(job.queue).or_default().push(ReadyJob {
                    job,
                    not_before: now,
                });
            }
        }
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(
        &self,
        queue: QueueName,
        payload: serde_json::Value,
        priority: i32,
    ) -> QueueResult<JobId> {
        let job = Job {
            id: JobId::new(),
            queue,
            payload,
            priority,
            attempt: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            enqueued_at: Utc::now(),
        };
        let id = job.id.clone();

        let mut inner = self.inner.lock().unwrap();
        inner.states.insert(id.0.clone(), JobState::Queued);
        inner.ready.entry(queue).or_default().push(ReadyJob {
            job,
            not_before: Utc::now(),
        });
        Ok(id)
    }

    async fn lease(&self, queue: QueueName, visibility: Duration) -> QueueResult<Option<Lease>> {
        let now = Utc::now();
        let mut inner = self.inner.lock().unwrap();
        Self::reclaim_expired(&mut inner, now);

        let ready = inner.ready.entry(queue).or_default();
        // Highest priority first; FIFO within a priority via enqueue order.
        let best = ready
            .iter()
            .enumerate()
            .filter(|(_, r)| r.not_before <= now)
            .max_by_key(|(idx, r)| (r.job.priority, std::cmp::Reverse(*idx)))
            .map(|(idx, _)| idx);

        let Some(idx) = best else {
            return Ok(None);
        };

        let mut job = ready.remove(idx).job;
        job.attempt += 1;
        let token = LeaseToken::new();
        let expires_at = now + chrono::Duration::from_std(visibility).unwrap_or_default();

        inner.states.insert(job.id.0.clone(), JobState::Running);
        inner.leased.insert(
            token.0.clone(),
            LeasedJob {
                job: job.clone(),
                expires_at,
            },
        );

        Ok(Some(Lease {
            job,
            token,
            expires_at,
        }))
    }

    async fn renew(&self, token: &LeaseToken, visibility: Duration) -> QueueResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let leased = inner
            .leased
            .get_mut(&token.0)
            .ok_or_else(|| QueueError::LeaseNotHeld(token.0.clone()))?;
        leased.expires_at =
            Utc::now() + chrono::Duration::from_std(visibility).unwrap_or_default();
        Ok(())
    }

    async fn ack(&self, token: &LeaseToken) -> QueueResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let leased = inner
            .leased
            .remove(&token.0)
            .ok_or_else(|| QueueError::LeaseNotHeld(token.0.clone()))?;
        inner.states.insert(leased.job.id.0, JobState::Done);
        Ok(())
    }

    async fn nack(&self, token: &LeaseToken, error: &str) -> QueueResult<()> {
        let now = Utc::now();
        let mut inner = self.inner.lock().unwrap();
        let leased = inner
            .leased
            .remove(&token.0)
            .ok_or_else(|| QueueError::LeaseNotHeld(token.0.clone()))?;
        let job = leased.job;

        if job.attempt >= job.max_attempts {
            inner.states.insert(job.id.0.clone(), JobState::Dead);
            inner.dead.entry(job.queue).or_default().push(DeadJob {
                last_error: error.to_string(),
                died_at: now,
                job,
            });
        } else {
            let delay = backoff_delay(job.attempt);
            inner.states.insert(job.id.0.clone(), JobState::Queued);
            inner.ready.entry(job.queue).or_default().push(ReadyJob {
                job,
                not_before: now + chrono::Duration::from_std(delay).unwrap_or_default(),
            });
        }
        Ok(())
    }

    async fn depth(&self, queue: QueueName) -> QueueResult<usize> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.ready.get(&queue).map(|q| q.len()).unwrap_or(0))
    }

    async fn job_state(&self, id: &JobId) -> QueueResult<JobState> {
        let inner = self.inner.lock().unwrap();
        inner
            .states
            .get(&id.0)
            .copied()
            .ok_or_else(|| QueueError::JobNotFound(id.0.clone()))
    }

    async fn dead_letters(&self, queue: QueueName) -> QueueResult<Vec<DeadJob>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.dead.get(&queue).cloned().unwrap_or_default())
    }
}
