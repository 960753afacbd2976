//! Cancellable, deadline-bearing context handed to job processing.

use std::future::Future;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::JobError;

/// Context for a single job execution.
///
/// Cancellation comes from the worker (shutdown or per-job token); the deadline
/// comes from the runner's timeout policy. Neither is imposed by handlers.
#[derive(Debug, Clone)]
pub struct JobContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl JobContext {
    pub fn new(cancel: CancellationToken, deadline: Option<Instant>) -> Self {
        Self { cancel, deadline }
    }

    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::new(CancellationToken::new(), None)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
            || self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Returns the reason this context stopped, if it did.
    pub fn check(&self) -> Result<(), JobError> {
        if self.cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(JobError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Resolves once the context is cancelled or its deadline elapsed, with
    /// the reason.
    pub async fn stopped(&self) -> JobError {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => JobError::Cancelled,
            _ = until(self.deadline) => JobError::DeadlineExceeded,
        }
    }

    /// Run `fut` until it completes or the context stops, whichever happens
    /// first.
    ///
    /// A future dropped this way stops at its next await point. Work it already
    /// committed stays committed.
    pub async fn guard<F, T>(&self, fut: F) -> Result<T, JobError>
    where
        F: Future<Output = T>,
    {
        tokio::select! {
            biased;
            reason = self.stopped() => Err(reason),
            out = fut => Ok(out),
        }
    }
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_guard_returns_output() {
        let ctx = JobContext::background();
        let out = ctx.guard(async { 42 }).await.unwrap();
        assert_eq!(out, 42);
        assert!(ctx.check().is_ok());
    }

    #[tokio::test]
    async fn test_guard_observes_cancellation() {
        let token = CancellationToken::new();
        let ctx = JobContext::new(token.clone(), None);
        token.cancel();

        let result = ctx.guard(std::future::pending::<()>()).await;
        assert!(matches!(result, Err(JobError::Cancelled)));
        assert!(ctx.is_cancelled());
        assert!(matches!(ctx.check(), Err(JobError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_observes_deadline() {
        let ctx = JobContext::new(
            CancellationToken::new(),
            Some(Instant::now() + Duration::from_secs(5)),
        );

        let result = ctx
            .guard(tokio::time::sleep(Duration::from_secs(60)))
            .await;
        assert!(matches!(result, Err(JobError::DeadlineExceeded)));
        assert!(matches!(ctx.check(), Err(JobError::DeadlineExceeded)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_prefers_cancellation_over_deadline() {
        let token = CancellationToken::new();
        let ctx = JobContext::new(token.clone(), Some(Instant::now() + Duration::from_secs(5)));

        tokio::time::advance(Duration::from_secs(10)).await;
        token.cancel();

        assert!(matches!(ctx.stopped().await, JobError::Cancelled));
    }
}
