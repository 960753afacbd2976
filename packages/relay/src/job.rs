//! Job model, handler contract and handler registry.
//!
//! This module provides policy-light building blocks for background work:
//! - [`JobData`] - Typed payload private to the handler pair producing/consuming it
//! - [`Job`] - Identity, opaque data and optional dedupe key
//! - [`Handler`] - Prepare (event → data) and Process (job → domain command)
//! - [`HandlerRegistry`] - Ordered handler list, first matching guard wins
//!
//! # Design Philosophy
//!
//! Handlers shape payloads and run commands. Queueing, dedupe coalescing,
//! concurrency and retry policy belong to the queue and the worker.
//!
//! # Example
//!
//! ```ignore
//! let mut registry = HandlerRegistry::new();
//! registry.register(DeployHandler::new(span, deploy));
//!
//! // Producer side, on the dispatching task
//! if let Some(prepared) = registry.prepare(event.payload())? {
//!     queue.enqueue(prepared).await?;
//! }
//!
//! // Consumer side, on a worker
//! registry.process(&ctx, &job).await?;
//! ```

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::context::JobContext;
use crate::error::JobError;

/// Typed job payload.
///
/// The concrete type is private to the handler producing and consuming it.
/// Producers and the queue only see [`AnyJobData`].
pub trait JobData: fmt::Debug + Send + Sync + 'static {
    /// Stable tag identifying the job kind, also the first component of
    /// dedupe keys.
    fn discriminator(&self) -> &'static str;
}

/// Type-erased [`JobData`].
///
/// This trait is automatically implemented for all types that implement [`JobData`].
pub trait AnyJobData: fmt::Debug + Send + Sync + 'static {
    fn discriminator(&self) -> &'static str;

    /// Downcast to concrete type.
    fn as_any(&self) -> &dyn Any;
}

impl<D: JobData> AnyJobData for D {
    fn discriminator(&self) -> &'static str {
        JobData::discriminator(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl dyn AnyJobData {
    pub fn is<D: JobData>(&self) -> bool {
        self.as_any().is::<D>()
    }

    pub fn downcast_ref<D: JobData>(&self) -> Option<&D> {
        self.as_any().downcast_ref::<D>()
    }
}

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    /// Enqueued, waiting for a worker; coalesces with same-key jobs.
    Pending,
    /// Dequeued and held exclusively by one worker.
    Running,
    /// Process returned, including swallowed business outcomes.
    Succeeded,
    /// Process returned an infra error. Final for this job id: any retry
    /// runs as a new job.
    Failed,
    /// Replaced by a newer same-key job before any worker reached it.
    Superseded,
    /// No retry left, or the failure was not retryable.
    DeadLetter,
}

impl JobStatus {
    /// Whether this job id will change status again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Superseded | JobStatus::DeadLetter | JobStatus::Failed
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Succeeded => write!(f, "succeeded"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Superseded => write!(f, "superseded"),
            JobStatus::DeadLetter => write!(f, "dead_letter"),
        }
    }
}

/// Result of a successful [`Handler::prepare`].
#[derive(Debug, Clone)]
pub struct Prepared {
    data: Arc<dyn AnyJobData>,
    dedupe_key: Option<String>,
}

impl Prepared {
    pub fn new<D: JobData>(data: D) -> Self {
        Self {
            data: Arc::new(data),
            dedupe_key: None,
        }
    }

    /// Coalesce with any pending job carrying the same key.
    pub fn with_dedupe_key(mut self, key: impl Into<String>) -> Self {
        self.dedupe_key = Some(key.into());
        self
    }

    pub fn data(&self) -> &dyn AnyJobData {
        self.data.as_ref()
    }

    pub fn dedupe_key(&self) -> Option<&str> {
        self.dedupe_key.as_deref()
    }
}

/// A unit of work owned by the queue between Prepare and Process.
#[derive(Debug, Clone)]
pub struct Job {
    id: Uuid,
    data: Arc<dyn AnyJobData>,
    dedupe_key: Option<String>,
    attempt: u32,
    enqueued_at: DateTime<Utc>,
}

impl Job {
    /// Turns a prepared payload into a first-attempt job.
    pub fn from_prepared(prepared: Prepared) -> Self {
        Self {
            id: Uuid::now_v7(),
            data: prepared.data,
            dedupe_key: prepared.dedupe_key,
            attempt: 1,
            enqueued_at: Utc::now(),
        }
    }

    /// A new job carrying the same data and key, for the next attempt.
    pub fn create_retry(&self) -> Self {
        Self {
            id: Uuid::now_v7(),
            data: Arc::clone(&self.data),
            dedupe_key: self.dedupe_key.clone(),
            attempt: self.attempt + 1,
            enqueued_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn data(&self) -> &dyn AnyJobData {
        self.data.as_ref()
    }

    /// Typed access to the data, `None` when the job carries another shape.
    pub fn data_as<D: JobData>(&self) -> Option<&D> {
        self.data().downcast_ref::<D>()
    }

    pub fn discriminator(&self) -> &'static str {
        self.data.discriminator()
    }

    pub fn dedupe_key(&self) -> Option<&str> {
        self.dedupe_key.as_deref()
    }

    /// The attempt number (1-based).
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }
}

/// A pair of producer and consumer steps for one job kind.
///
/// `prepare` runs synchronously on the task dispatching the event. It must be
/// cheap and free of side effects. `process` runs on a worker and may block on
/// I/O.
///
/// # Error contract for `process`
///
/// - Data of another shape → [`JobError::InvalidPayload`], before any side effect
/// - Business rejection already recorded on an aggregate → log it, return `Ok(())`
/// - Persistence/transport failure → return it so the runner can retry
#[async_trait]
pub trait Handler: Send + Sync {
    /// Whether this handler turns `payload` into a job.
    fn can_prepare(&self, payload: &dyn Any) -> bool;

    /// Whether this handler processes jobs carrying `data`.
    fn can_process(&self, data: &dyn AnyJobData) -> bool;

    /// Shape `payload` into job data plus an optional dedupe key.
    fn prepare(&self, payload: &dyn Any) -> Result<Prepared, JobError>;

    /// Execute the domain command the job stands for.
    async fn process(&self, ctx: &JobContext, job: &Job) -> Result<(), JobError>;
}

/// Ordered set of handlers.
///
/// Registration order is guard-check precedence: the first handler whose
/// guard matches owns the payload or job.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Vec<Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler after every previously registered one.
    pub fn register<H: Handler + 'static>(&mut self, handler: H) -> &mut Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    /// Returns the first handler claiming `payload`.
    pub fn preparer_for(&self, payload: &dyn Any) -> Option<&Arc<dyn Handler>> {
        self.handlers.iter().find(|h| h.can_prepare(payload))
    }

    /// Returns the first handler claiming `data`.
    pub fn processor_for(&self, data: &dyn AnyJobData) -> Option<&Arc<dyn Handler>> {
        self.handlers.iter().find(|h| h.can_process(data))
    }

    /// Prepare a job from `payload`.
    ///
    /// Returns `Ok(None)` when no handler claims the payload, which is the
    /// normal outcome for most events.
    pub fn prepare(&self, payload: &dyn Any) -> Result<Option<Prepared>, JobError> {
        match self.preparer_for(payload) {
            Some(handler) => handler.prepare(payload).map(Some),
            None => Ok(None),
        }
    }

    /// Process `job` with the handler claiming its data.
    pub async fn process(&self, ctx: &JobContext, job: &Job) -> Result<(), JobError> {
        let handler = self
            .processor_for(job.data())
            .ok_or(JobError::NoHandler {
                discriminator: job.discriminator(),
            })?;

        handler.process(ctx, job).await
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone)]
    struct Ping {
        target: u32,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct PingData {
        target: u32,
    }

    impl JobData for PingData {
        fn discriminator(&self) -> &'static str {
            "test.ping"
        }
    }

    #[derive(Debug)]
    struct OtherData;

    impl JobData for OtherData {
        fn discriminator(&self) -> &'static str {
            "test.other"
        }
    }

    struct PingHandler {
        label: &'static str,
        processed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Handler for PingHandler {
        fn can_prepare(&self, payload: &dyn Any) -> bool {
            payload.is::<Ping>()
        }

        fn can_process(&self, data: &dyn AnyJobData) -> bool {
            data.is::<PingData>()
        }

        fn prepare(&self, payload: &dyn Any) -> Result<Prepared, JobError> {
            let ping = payload
                .downcast_ref::<Ping>()
                .ok_or_else(JobError::invalid_payload::<Ping>)?;
            Ok(Prepared::new(PingData {
                target: ping.target,
            })
            .with_dedupe_key(format!("{}.{}", self.label, ping.target)))
        }

        async fn process(&self, _ctx: &JobContext, job: &Job) -> Result<(), JobError> {
            job.data_as::<PingData>()
                .ok_or_else(JobError::invalid_payload::<PingData>)?;
            self.processed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn handler(label: &'static str) -> (PingHandler, Arc<AtomicUsize>) {
        let processed = Arc::new(AtomicUsize::new(0));
        (
            PingHandler {
                label,
                processed: processed.clone(),
            },
            processed,
        )
    }

    #[test]
    fn test_only_pending_and_running_change_again() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Superseded.is_terminal());
        assert!(JobStatus::DeadLetter.is_terminal());
    }

    #[test]
    fn test_prepare_unclaimed_payload_is_none() {
        let mut registry = HandlerRegistry::new();
        registry.register(handler("first").0);

        let prepared = registry.prepare(&"not a ping").unwrap();
        assert!(prepared.is_none());
    }

    #[test]
    fn test_registration_order_is_precedence() {
        let mut registry = HandlerRegistry::new();
        registry.register(handler("first").0);
        registry.register(handler("second").0);
        assert_eq!(registry.len(), 2);

        let prepared = registry.prepare(&Ping { target: 7 }).unwrap().unwrap();
        assert_eq!(prepared.dedupe_key(), Some("first.7"));
        assert_eq!(prepared.data().discriminator(), "test.ping");
    }

    #[tokio::test]
    async fn test_process_routes_to_first_matching_handler() {
        let (first, first_count) = handler("first");
        let (second, second_count) = handler("second");
        let mut registry = HandlerRegistry::new();
        registry.register(first).register(second);

        let job = Job::from_prepared(Prepared::new(PingData { target: 1 }));
        registry
            .process(&JobContext::background(), &job)
            .await
            .unwrap();

        assert_eq!(first_count.load(Ordering::SeqCst), 1);
        assert_eq!(second_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_process_unclaimed_data_is_no_handler() {
        let mut registry = HandlerRegistry::new();
        registry.register(handler("first").0);

        let job = Job::from_prepared(Prepared::new(OtherData));
        let err = registry
            .process(&JobContext::background(), &job)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            JobError::NoHandler {
                discriminator: "test.other"
            }
        ));
    }

    #[tokio::test]
    async fn test_handler_rejects_foreign_data_without_side_effect() {
        let (ping, count) = handler("first");
        let job = Job::from_prepared(Prepared::new(OtherData));

        let err = ping
            .process(&JobContext::background(), &job)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::InvalidPayload { .. }));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_retry_keeps_data_and_key() {
        let job = Job::from_prepared(
            Prepared::new(PingData { target: 3 }).with_dedupe_key("test.ping.3"),
        );
        let retry = job.create_retry();

        assert_ne!(retry.id(), job.id());
        assert_eq!(retry.attempt(), 2);
        assert_eq!(retry.dedupe_key(), Some("test.ping.3"));
        assert_eq!(retry.data_as::<PingData>(), Some(&PingData { target: 3 }));
    }
}
