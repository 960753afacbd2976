//! Deduplicating job queue.
//!
//! This module provides the queue contract and an in-process implementation:
//! - [`JobQueue`] - Enqueue with dedupe coalescing, dequeue, completion marks
//! - [`InMemoryJobQueue`] - Single-lock queue with a dedupe-key index
//! - [`RetryPolicy`] - Attempts and exponential backoff for retryable failures
//!
//! # Dedupe
//!
//! At most one *pending* job exists per dedupe key. Enqueueing a job whose key
//! matches a pending one supersedes it in place: the queue position is kept,
//! the data is replaced. Once a worker dequeued a job its key is released, so
//! a new job with that key queues up behind the running one.
//!
//! # Retention
//!
//! Statuses of finished jobs (succeeded, failed, superseded, dead-lettered)
//! and dead letters are kept for the most recent `retention` jobs only.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::{FailureKind, JobError};
use crate::job::{Job, JobStatus, Prepared};

/// Result type for enqueue operations that handles dedupe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueResult {
    /// Job was enqueued, returns new job ID
    Created(Uuid),
    /// A pending job with the same dedupe key was replaced by this one
    Superseded {
        /// The new job ID
        id: Uuid,
        /// The pending job that will never run
        replaced: Uuid,
    },
}

impl EnqueueResult {
    /// Get the job ID regardless of whether it was created or superseded
    pub fn job_id(&self) -> Uuid {
        match self {
            EnqueueResult::Created(id) | EnqueueResult::Superseded { id, .. } => *id,
        }
    }

    /// Returns true if no pending job shared the key
    pub fn is_created(&self) -> bool {
        matches!(self, EnqueueResult::Created(_))
    }
}

/// Trait for job queue operations.
///
/// Implementations must make the dedupe check-and-insert atomic: two
/// concurrent enqueues with the same key never both end up pending.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a prepared job, coalescing with a pending job of the same key.
    async fn enqueue(&self, prepared: Prepared) -> Result<EnqueueResult, JobError>;

    /// Claim the next ready job for `worker_id`.
    ///
    /// The returned job is exclusive to the caller until it is marked.
    async fn dequeue(&self, worker_id: &str) -> Result<Option<Job>, JobError>;

    /// Mark a running job as completed.
    async fn mark_succeeded(&self, job_id: Uuid) -> Result<(), JobError>;

    /// Mark a running job as failed.
    ///
    /// Returns the resulting status: [`JobStatus::Failed`] when a retry was
    /// scheduled, [`JobStatus::DeadLetter`] otherwise.
    async fn mark_failed(
        &self,
        job_id: Uuid,
        error: &str,
        kind: FailureKind,
    ) -> Result<JobStatus, JobError>;

    /// Current status of a job, if the queue has seen it.
    async fn status(&self, job_id: Uuid) -> Option<JobStatus>;
}

/// Retry policy applied by the queue to retryable failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, first one included.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles on every further attempt.
    pub base_delay: Duration,
    /// Upper bound for a single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(3600), // Max 1 hour
        }
    }
}

impl RetryPolicy {
    /// Delay before running `attempt` (1-based), once attempt `attempt - 1` failed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(2).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

/// Finished jobs whose status stays observable, by default.
pub const DEFAULT_RETENTION: usize = 1024;

/// A dead-lettered job with its last error.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub job: Job,
    pub error: String,
}

struct PendingEntry {
    job: Job,
    run_after: Option<Instant>,
}

#[derive(Default)]
struct QueueState {
    order: VecDeque<Uuid>,
    pending: HashMap<Uuid, PendingEntry>,
    by_key: HashMap<String, Uuid>,
    running: HashMap<Uuid, (String, Job)>,
    dead_letters: VecDeque<DeadLetter>,
    /// Finished job ids, oldest first
    finished: VecDeque<Uuid>,
}

impl QueueState {
    fn push(&mut self, job: Job, run_after: Option<Instant>) -> EnqueueResult {
        let id = job.id();

        if let Some(key) = job.dedupe_key().map(str::to_owned) {
            if let Some(replaced) = self.by_key.insert(key, id) {
                if let Some(position) = self.order.iter().position(|queued| *queued == replaced) {
                    self.order[position] = id;
                }
                self.pending.remove(&replaced);
                self.pending.insert(id, PendingEntry { job, run_after });
                return EnqueueResult::Superseded { id, replaced };
            }
        }

        self.order.push_back(id);
        self.pending.insert(id, PendingEntry { job, run_after });
        EnqueueResult::Created(id)
    }

    fn pop_ready(&mut self, now: Instant) -> Option<Job> {
        let position = self.order.iter().position(|id| {
            self.pending
                .get(id)
                .is_some_and(|entry| entry.run_after.map_or(true, |at| at <= now))
        })?;
        let id = self.order.remove(position)?;
        let entry = self.pending.remove(&id)?;

        if let Some(key) = entry.job.dedupe_key() {
            if self.by_key.get(key) == Some(&id) {
                self.by_key.remove(key);
            }
        }

        Some(entry.job)
    }
}

/// In-process job queue.
///
/// All structural state sits behind one lock so the dedupe index is updated
/// atomically with insertion. Statuses are mirrored in a concurrent map so
/// observers never contend with workers.
pub struct InMemoryJobQueue {
    state: Mutex<QueueState>,
    statuses: DashMap<Uuid, JobStatus>,
    retry: RetryPolicy,
    retention: usize,
}

impl InMemoryJobQueue {
    /// Create a queue with the default retry policy.
    pub fn new() -> Self {
        Self::with_retry_policy(RetryPolicy::default())
    }

    /// Create with a custom retry policy.
    pub fn with_retry_policy(retry: RetryPolicy) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            statuses: DashMap::new(),
            retry,
            retention: DEFAULT_RETENTION,
        }
    }

    /// Keep the statuses and dead letters of at most `retention` finished jobs.
    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention.max(1);
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Number of jobs waiting for a worker.
    pub async fn pending_len(&self) -> usize {
        self.state.lock().await.order.len()
    }

    /// Number of jobs currently held by workers.
    pub async fn running_len(&self) -> usize {
        self.state.lock().await.running.len()
    }

    /// Snapshot of the pending jobs in queue order.
    pub async fn pending_jobs(&self) -> Vec<Job> {
        let state = self.state.lock().await;
        state
            .order
            .iter()
            .filter_map(|id| state.pending.get(id).map(|entry| entry.job.clone()))
            .collect()
    }

    /// Snapshot of the retained dead-lettered jobs, oldest first.
    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.lock().await.dead_letters.iter().cloned().collect()
    }

    /// Number of jobs whose status is still observable.
    pub fn tracked_len(&self) -> usize {
        self.statuses.len()
    }

    fn set_status(&self, job_id: Uuid, status: JobStatus) {
        self.statuses.insert(job_id, status);
    }

    /// Record a terminal status, forgetting the oldest finished jobs beyond
    /// the retention.
    fn finish(&self, state: &mut QueueState, job_id: Uuid, status: JobStatus) {
        debug_assert!(status.is_terminal());
        self.set_status(job_id, status);
        state.finished.push_back(job_id);

        while state.finished.len() > self.retention {
            if let Some(evicted) = state.finished.pop_front() {
                self.statuses.remove(&evicted);
            }
        }
        while state.dead_letters.len() > self.retention {
            state.dead_letters.pop_front();
        }
    }
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, prepared: Prepared) -> Result<EnqueueResult, JobError> {
        let job = Job::from_prepared(prepared);
        let discriminator = job.discriminator();

        let result = {
            let mut state = self.state.lock().await;
            let result = state.push(job, None);
            // Statuses are written under the lock so a superseded job is never
            // observed as pending after its replacement is.
            if let EnqueueResult::Superseded { replaced, .. } = result {
                self.finish(&mut state, replaced, JobStatus::Superseded);
            }
            self.set_status(result.job_id(), JobStatus::Pending);
            result
        };

        match result {
            EnqueueResult::Created(id) => {
                debug!(job_id = %id, job_type = discriminator, "job enqueued");
            }
            EnqueueResult::Superseded { id, replaced } => {
                debug!(
                    job_id = %id,
                    replaced = %replaced,
                    job_type = discriminator,
                    "pending job superseded"
                );
            }
        }

        Ok(result)
    }

    async fn dequeue(&self, worker_id: &str) -> Result<Option<Job>, JobError> {
        let mut state = self.state.lock().await;
        let Some(job) = state.pop_ready(Instant::now()) else {
            return Ok(None);
        };

        state
            .running
            .insert(job.id(), (worker_id.to_owned(), job.clone()));
        self.set_status(job.id(), JobStatus::Running);

        Ok(Some(job))
    }

    async fn mark_succeeded(&self, job_id: Uuid) -> Result<(), JobError> {
        let mut state = self.state.lock().await;
        state
            .running
            .remove(&job_id)
            .ok_or_else(|| anyhow::anyhow!("job {} is not running", job_id))?;
        self.finish(&mut state, job_id, JobStatus::Succeeded);

        Ok(())
    }

    async fn mark_failed(
        &self,
        job_id: Uuid,
        error: &str,
        kind: FailureKind,
    ) -> Result<JobStatus, JobError> {
        let mut state = self.state.lock().await;
        let (worker_id, job) = state
            .running
            .remove(&job_id)
            .ok_or_else(|| anyhow::anyhow!("job {} is not running", job_id))?;

        if kind == FailureKind::Retryable && job.attempt() < self.retry.max_attempts {
            self.finish(&mut state, job_id, JobStatus::Failed);

            // A pending job with the same key is newer work for the same
            // target; it already covers this retry.
            if let Some(pending) = job.dedupe_key().and_then(|key| state.by_key.get(key)) {
                warn!(
                    job_id = %job_id,
                    pending_id = %pending,
                    worker_id = %worker_id,
                    error = %error,
                    "job failed, retry coalesced into pending job"
                );
                return Ok(JobStatus::Failed);
            }

            let retry = job.create_retry();
            let delay = self.retry.delay_for(retry.attempt());
            let retry_id = retry.id();
            state.push(retry, Some(Instant::now() + delay));
            self.set_status(retry_id, JobStatus::Pending);

            warn!(
                job_id = %job_id,
                retry_id = %retry_id,
                worker_id = %worker_id,
                attempt = job.attempt(),
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "job failed, retry scheduled"
            );

            return Ok(JobStatus::Failed);
        }

        error!(
            job_id = %job_id,
            worker_id = %worker_id,
            attempt = job.attempt(),
            error = %error,
            "job dead-lettered"
        );
        state.dead_letters.push_back(DeadLetter {
            job,
            error: error.to_owned(),
        });
        self.finish(&mut state, job_id, JobStatus::DeadLetter);

        Ok(JobStatus::DeadLetter)
    }

    async fn status(&self, job_id: Uuid) -> Option<JobStatus> {
        self.statuses.get(&job_id).map(|status| *status)
    }
}

impl std::fmt::Debug for InMemoryJobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryJobQueue")
            .field("known_jobs", &self.statuses.len())
            .field("retry", &self.retry)
            .field("retention", &self.retention)
            .finish()
    }
}
