//! Producer side of the job subsystem: committed events become queued jobs.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::bus::Dispatcher;
use crate::core::Event;
use crate::error::DispatchError;
use crate::job::HandlerRegistry;
use crate::queue::{EnqueueResult, JobQueue};

/// Subscriber offering every dispatched event to the handler registry and
/// enqueueing whatever the claiming handler prepares.
///
/// Preparing is synchronous and runs on the dispatching task. Dispatching the
/// same committed event twice yields the same data and dedupe key, so at most
/// one pending job results.
pub struct JobScheduler {
    registry: Arc<HandlerRegistry>,
    queue: Arc<dyn JobQueue>,
}

impl JobScheduler {
    pub fn new(registry: Arc<HandlerRegistry>, queue: Arc<dyn JobQueue>) -> Self {
        Self { registry, queue }
    }

    /// Prepare and enqueue a job from `event`, if a handler claims it.
    pub async fn schedule(&self, event: &dyn Event) -> Result<Option<EnqueueResult>, DispatchError> {
        let prepared = self
            .registry
            .prepare(event.payload())
            .map_err(|source| DispatchError::Prepare {
                event: event.name(),
                source,
            })?;

        let Some(prepared) = prepared else {
            return Ok(None);
        };

        let result = self
            .queue
            .enqueue(prepared)
            .await
            .map_err(|source| DispatchError::Enqueue {
                event: event.name(),
                source,
            })?;

        debug!(
            event = event.name(),
            job_id = %result.job_id(),
            created = result.is_created(),
            "job scheduled from event"
        );

        Ok(Some(result))
    }
}

#[async_trait]
impl Dispatcher for JobScheduler {
    async fn dispatch(&self, event: &dyn Event) -> Result<(), DispatchError> {
        self.schedule(event).await.map(|_| ())
    }
}

impl std::fmt::Debug for JobScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobScheduler")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
