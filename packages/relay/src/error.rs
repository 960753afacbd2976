//! Structured error types for dispatch and job execution.
//!
//! # The Retry Boundary Rule
//!
//! > **Only the runner decides to retry.**
//!
//! - Handlers classify, they never loop
//! - [`JobError::failure_kind`] is the single place deciding what is retryable
//! - Business rejections never reach this layer: handlers log and swallow them
//!   because the outcome is already recorded on the aggregate
//!
//! # Example
//!
//! ```ignore
//! match registry.process(&ctx, &job).await {
//!     Ok(()) => queue.mark_succeeded(job.id()).await?,
//!     Err(e) => queue.mark_failed(job.id(), &e.to_string(), e.failure_kind()).await?,
//! };
//! ```

use thiserror::Error;

/// Classification of job failures for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Failure may be transient; the job should be retried.
    ///
    /// Examples: database unavailable, transaction conflict, shutdown mid-job
    Retryable,

    /// Failure is permanent; the job should not be retried.
    ///
    /// Examples: payload owned by another handler, no handler registered
    NonRetryable,
}

/// Errors surfaced by job handlers and the registry.
#[derive(Debug, Error)]
pub enum JobError {
    /// A handler received a payload or job data shape it does not own.
    ///
    /// This is a wiring defect, never retried.
    #[error("invalid payload: expected {expected}")]
    InvalidPayload {
        /// The type the handler owns.
        expected: &'static str,
    },

    /// No registered handler claims the job data.
    #[error("no handler registered for job {discriminator}")]
    NoHandler {
        /// Discriminator of the unclaimed job kind.
        discriminator: &'static str,
    },

    /// The job context was cancelled while processing.
    #[error("job cancelled")]
    Cancelled,

    /// The job context deadline elapsed while processing.
    #[error("job deadline exceeded")]
    DeadlineExceeded,

    /// Persistence or transport failure underneath the domain command.
    #[error("infrastructure failure: {0}")]
    Infra(#[from] anyhow::Error),
}

impl JobError {
    /// Builds an [`JobError::InvalidPayload`] naming the expected type.
    pub fn invalid_payload<T: ?Sized>() -> Self {
        JobError::InvalidPayload {
            expected: std::any::type_name::<T>(),
        }
    }

    /// Returns the failure classification used by the runner.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            JobError::InvalidPayload { .. } | JobError::NoHandler { .. } => {
                FailureKind::NonRetryable
            }
            JobError::Cancelled | JobError::DeadlineExceeded | JobError::Infra(_) => {
                FailureKind::Retryable
            }
        }
    }
}

/// Errors raised while dispatching committed events to subscribers.
///
/// These are reported separately from persistence failures: when one of them
/// reaches the writer, the events are already committed.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The claiming handler failed to prepare a job from the event.
    #[error("failed to prepare job from {event}: {source}")]
    Prepare {
        /// Name of the dispatched event.
        event: &'static str,
        #[source]
        source: JobError,
    },

    /// The queue refused the prepared job.
    #[error("failed to enqueue job from {event}: {source}")]
    Enqueue {
        /// Name of the dispatched event.
        event: &'static str,
        #[source]
        source: JobError,
    },

    /// Any other subscriber failure.
    #[error("subscriber failed on {event}: {source}")]
    Subscriber {
        /// Name of the dispatched event.
        event: &'static str,
        #[source]
        source: anyhow::Error,
    },
}
