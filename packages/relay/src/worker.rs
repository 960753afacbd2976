//! Job worker pool.
//!
//! The `JobWorker` is a long-running service that:
//! - Polls the queue for ready jobs
//! - Routes each job to the claiming handler via the `HandlerRegistry`
//! - Hands every execution a context carrying the shutdown token and an
//!   optional deadline, and abandons it only when the handler ignores a stop
//! - Reports the outcome to the queue, which owns retries and dead-lettering
//!
//! # Architecture
//!
//! ```text
//! JobWorker
//!     │
//!     ├─► loop 0..concurrency
//!     │       ├─► Dequeue (JobQueue)
//!     │       ├─► Process (HandlerRegistry → Handler.process(ctx, job))
//!     │       └─► Mark succeeded/failed (JobQueue)
//!     └─► Join all loops on shutdown
//! ```
//!
//! # Example
//!
//! ```ignore
//! let worker = JobWorker::with_config(queue, registry, JobWorkerConfig {
//!     concurrency: 4,
//!     ..Default::default()
//! });
//!
//! let shutdown = CancellationToken::new();
//! tokio::spawn(worker.run(shutdown.clone()));
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::context::JobContext;
use crate::error::JobError;
use crate::job::{HandlerRegistry, JobStatus};
use crate::queue::JobQueue;

/// Configuration for the job worker.
#[derive(Debug, Clone)]
pub struct JobWorkerConfig {
    /// Number of jobs processed in parallel
    pub concurrency: usize,
    /// How long to wait when no jobs are available
    pub poll_interval: Duration,
    /// Upper bound for a single execution, none by default
    pub job_timeout: Option<Duration>,
    /// How long a stopped handler may take to wind down before it is dropped
    pub stop_grace: Duration,
    /// Worker ID for this instance
    pub worker_id: String,
}

impl Default for JobWorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval: Duration::from_secs(1),
            job_timeout: None,
            stop_grace: Duration::from_secs(30),
            worker_id: format!("worker-{}", Uuid::new_v4()),
        }
    }
}

impl JobWorkerConfig {
    /// Create a new config with a specific worker ID.
    pub fn with_worker_id(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            ..Default::default()
        }
    }
}

/// A pool of loops taking jobs off a queue and running their handlers.
///
/// Distinct jobs run in parallel up to `concurrency`. A single job is only
/// ever held by one loop, the queue guarantees that.
#[derive(Clone)]
pub struct JobWorker {
    queue: Arc<dyn JobQueue>,
    registry: Arc<HandlerRegistry>,
    config: JobWorkerConfig,
}

impl JobWorker {
    /// Create a new job worker.
    pub fn new(queue: Arc<dyn JobQueue>, registry: Arc<HandlerRegistry>) -> Self {
        Self::with_config(queue, registry, JobWorkerConfig::default())
    }

    /// Create with custom configuration.
    pub fn with_config(
        queue: Arc<dyn JobQueue>,
        registry: Arc<HandlerRegistry>,
        config: JobWorkerConfig,
    ) -> Self {
        Self {
            queue,
            registry,
            config,
        }
    }

    pub fn config(&self) -> &JobWorkerConfig {
        &self.config
    }

    /// Take one ready job and run it to a status.
    ///
    /// Returns `None` when nothing was ready. Errors are queue failures only;
    /// handler failures end up in the returned status.
    pub async fn process_next(
        &self,
        worker_id: &str,
        shutdown: &CancellationToken,
    ) -> Result<Option<(Uuid, JobStatus)>, JobError> {
        let Some(job) = self.queue.dequeue(worker_id).await? else {
            return Ok(None);
        };

        let job_id = job.id();
        let job_type = job.discriminator();
        debug!(job_id = %job_id, job_type, attempt = job.attempt(), worker_id, "executing job");

        let deadline = self.config.job_timeout.map(|timeout| Instant::now() + timeout);
        let ctx = JobContext::new(shutdown.child_token(), deadline);

        // The handler sees the stop through its context and records its own
        // outcome; it is only dropped once the grace period is over.
        let process = self.registry.process(&ctx, &job);
        tokio::pin!(process);

        let finished = tokio::select! {
            biased;
            outcome = &mut process => Ok(outcome),
            reason = ctx.stopped() => Err(reason),
        };

        let result = match finished {
            Ok(outcome) => outcome,
            Err(reason) => {
                debug!(job_id = %job_id, job_type, reason = %reason, "job stopped, waiting for handler");
                match tokio::time::timeout(self.config.stop_grace, &mut process).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        warn!(
                            job_id = %job_id,
                            job_type,
                            grace_ms = self.config.stop_grace.as_millis() as u64,
                            "handler ignored stop, abandoning job"
                        );
                        Err(reason)
                    }
                }
            }
        };

        let status = match result {
            Ok(()) => {
                debug!(job_id = %job_id, job_type, "job succeeded");
                self.queue.mark_succeeded(job_id).await?;
                JobStatus::Succeeded
            }
            Err(e) => {
                warn!(job_id = %job_id, job_type, error = %e, "job failed");
                self.queue
                    .mark_failed(job_id, &e.to_string(), e.failure_kind())
                    .await?
            }
        };

        Ok(Some((job_id, status)))
    }

    /// Process ready jobs one after another until none is left.
    ///
    /// Jobs waiting on a retry backoff are not ready and are left queued.
    pub async fn drain(&self) -> Result<Vec<(Uuid, JobStatus)>, JobError> {
        let shutdown = CancellationToken::new();
        let mut outcomes = Vec::new();
        while let Some(outcome) = self
            .process_next(&self.config.worker_id, &shutdown)
            .await?
        {
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Run the pool until `shutdown` is cancelled.
    ///
    /// In-flight jobs observe the cancellation through their context; their
    /// failures are reported as retryable so the work is picked up again.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        info!(
            worker_id = %self.config.worker_id,
            concurrency = self.config.concurrency,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "job worker starting"
        );

        let mut loops = JoinSet::new();
        for slot in 0..self.config.concurrency.max(1) {
            let worker = self.clone();
            let shutdown = shutdown.clone();
            let worker_id = format!("{}-{}", self.config.worker_id, slot);
            loops.spawn(async move { worker.poll_loop(worker_id, shutdown).await });
        }

        while let Some(joined) = loops.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "job worker loop panicked");
            }
        }

        info!(worker_id = %self.config.worker_id, "job worker stopped");
        Ok(())
    }

    async fn poll_loop(&self, worker_id: String, shutdown: CancellationToken) {
        loop {
            if shutdown.is_cancelled() {
                break;
            }

            match self.process_next(&worker_id, &shutdown).await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => error!(worker_id = %worker_id, error = %e, "failed to process job"),
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }
}

impl std::fmt::Debug for JobWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobWorker")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::job::{AnyJobData, Handler, Job, JobData, Prepared};
    use crate::queue::{InMemoryJobQueue, RetryPolicy};

    #[derive(Debug)]
    enum Step {
        Succeed,
        FailInfra,
        Hang,
        /// Waits on its context, then records that it wound down.
        Observe,
    }

    impl JobData for Step {
        fn discriminator(&self) -> &'static str {
            "test.step"
        }
    }

    #[derive(Debug)]
    struct Unclaimed;

    impl JobData for Unclaimed {
        fn discriminator(&self) -> &'static str {
            "test.unclaimed"
        }
    }

    struct StepHandler {
        runs: Arc<AtomicUsize>,
        wound_down: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Handler for StepHandler {
        fn can_prepare(&self, _payload: &dyn Any) -> bool {
            false
        }

        fn can_process(&self, data: &dyn AnyJobData) -> bool {
            data.is::<Step>()
        }

        fn prepare(&self, _payload: &dyn Any) -> Result<Prepared, JobError> {
            Err(JobError::invalid_payload::<Step>())
        }

        async fn process(&self, ctx: &JobContext, job: &Job) -> Result<(), JobError> {
            let step = job
                .data_as::<Step>()
                .ok_or_else(JobError::invalid_payload::<Step>)?;
            self.runs.fetch_add(1, Ordering::SeqCst);
            match step {
                Step::Succeed => Ok(()),
                Step::FailInfra => Err(anyhow::anyhow!("db down").into()),
                Step::Hang => std::future::pending().await,
                Step::Observe => {
                    let stopped = ctx.guard(std::future::pending::<()>()).await;
                    tokio::task::yield_now().await;
                    self.wound_down.fetch_add(1, Ordering::SeqCst);
                    stopped
                }
            }
        }
    }

    struct Fixture {
        worker: JobWorker,
        queue: Arc<InMemoryJobQueue>,
        runs: Arc<AtomicUsize>,
        wound_down: Arc<AtomicUsize>,
    }

    fn fixture(config: JobWorkerConfig) -> Fixture {
        let runs = Arc::new(AtomicUsize::new(0));
        let wound_down = Arc::new(AtomicUsize::new(0));
        let mut registry = HandlerRegistry::new();
        registry.register(StepHandler {
            runs: runs.clone(),
            wound_down: wound_down.clone(),
        });
        let queue = Arc::new(InMemoryJobQueue::with_retry_policy(RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }));
        let worker = JobWorker::with_config(queue.clone(), Arc::new(registry), config);
        Fixture {
            worker,
            queue,
            runs,
            wound_down,
        }
    }

    fn worker(config: JobWorkerConfig) -> (JobWorker, Arc<InMemoryJobQueue>, Arc<AtomicUsize>) {
        let fixture = fixture(config);
        (fixture.worker, fixture.queue, fixture.runs)
    }

    #[test]
    fn test_config_defaults() {
        let config = JobWorkerConfig::default();
        assert_eq!(config.concurrency, 4);
        assert!(config.job_timeout.is_none());
        assert_eq!(config.stop_grace, Duration::from_secs(30));
        assert!(config.worker_id.starts_with("worker-"));
    }

    #[test]
    fn test_config_with_worker_id() {
        let config = JobWorkerConfig::with_worker_id("my-worker");
        assert_eq!(config.worker_id, "my-worker");
    }

    #[tokio::test]
    async fn test_process_next_on_empty_queue() {
        let (worker, _queue, _runs) = worker(JobWorkerConfig::default());
        let outcome = worker
            .process_next("w", &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn test_successful_job_is_marked_succeeded() {
        let (worker, queue, runs) = worker(JobWorkerConfig::default());
        let id = queue
            .enqueue(Prepared::new(Step::Succeed))
            .await
            .unwrap()
            .job_id();

        let outcomes = worker.drain().await.unwrap();

        assert_eq!(outcomes, vec![(id, JobStatus::Succeeded)]);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_infra_failure_is_retried_then_dead_lettered() {
        let (worker, queue, runs) = worker(JobWorkerConfig::default());
        queue.enqueue(Prepared::new(Step::FailInfra)).await.unwrap();

        let outcomes = worker.drain().await.unwrap();

        let statuses: Vec<_> = outcomes.iter().map(|(_, status)| *status).collect();
        assert_eq!(statuses, vec![JobStatus::Failed, JobStatus::DeadLetter]);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(queue.dead_letters().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unclaimed_job_is_dead_lettered_without_retry() {
        let (worker, queue, _runs) = worker(JobWorkerConfig::default());
        queue.enqueue(Prepared::new(Unclaimed)).await.unwrap();

        let outcomes = worker.drain().await.unwrap();

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].1, JobStatus::DeadLetter);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_ignoring_stop_is_abandoned_after_grace() {
        let (worker, queue, _runs) = worker(JobWorkerConfig {
            job_timeout: Some(Duration::from_secs(5)),
            stop_grace: Duration::from_secs(1),
            ..Default::default()
        });
        let id = queue
            .enqueue(Prepared::new(Step::Hang))
            .await
            .unwrap()
            .job_id();

        let outcome = worker
            .process_next("w", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, Some((id, JobStatus::Failed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_winds_down_after_deadline() {
        let fixture = fixture(JobWorkerConfig {
            job_timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        });
        let id = fixture
            .queue
            .enqueue(Prepared::new(Step::Observe))
            .await
            .unwrap()
            .job_id();

        let outcome = fixture
            .worker
            .process_next("w", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, Some((id, JobStatus::Failed)));
        assert_eq!(fixture.wound_down.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handler_winds_down_on_shutdown() {
        let fixture = fixture(JobWorkerConfig::default());
        let id = fixture
            .queue
            .enqueue(Prepared::new(Step::Observe))
            .await
            .unwrap()
            .job_id();
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let outcome = fixture.worker.process_next("w", &shutdown).await.unwrap();

        assert_eq!(outcome, Some((id, JobStatus::Failed)));
        assert_eq!(fixture.wound_down.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_processes_jobs_until_shutdown() {
        let (worker, queue, runs) = worker(JobWorkerConfig {
            concurrency: 2,
            poll_interval: Duration::from_millis(10),
            ..Default::default()
        });
        for _ in 0..4 {
            queue.enqueue(Prepared::new(Step::Succeed)).await.unwrap();
        }

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(worker.run(shutdown.clone()));

        for _ in 0..100 {
            if runs.load(Ordering::SeqCst) == 4 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 4);
        assert_eq!(queue.pending_len().await, 0);
    }
}
