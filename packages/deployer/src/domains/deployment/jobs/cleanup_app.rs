//! Cleanup job - claims `AppCleanupRequested` and removes the app.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use relay::{AnyJobData, Handler, Job, JobContext, JobData, JobError, Prepared};
use tracing::{error, Span};

use crate::common::AppId;
use crate::domains::deployment::actions::{CleanupApp, CleanupAppCommand};
use crate::domains::deployment::errors::CommandError;
use crate::domains::deployment::events::AppCleanupRequested;

pub const CLEANUP_APP_JOB: &str = "deployment.cleanup_app";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupAppData {
    pub app_id: AppId,
}

impl JobData for CleanupAppData {
    fn discriminator(&self) -> &'static str {
        CLEANUP_APP_JOB
    }
}

pub fn dedupe_key(app_id: AppId) -> String {
    format!("{}.{}", CLEANUP_APP_JOB, app_id)
}

pub struct CleanupAppHandler {
    span: Span,
    cleanup: Arc<dyn CleanupApp>,
}

impl CleanupAppHandler {
    pub fn new(span: Span, cleanup: Arc<dyn CleanupApp>) -> Self {
        Self { span, cleanup }
    }
}

#[async_trait]
impl Handler for CleanupAppHandler {
    fn can_prepare(&self, payload: &dyn Any) -> bool {
        payload.is::<AppCleanupRequested>()
    }

    fn can_process(&self, data: &dyn AnyJobData) -> bool {
        data.is::<CleanupAppData>()
    }

    fn prepare(&self, payload: &dyn Any) -> Result<Prepared, JobError> {
        let event = payload
            .downcast_ref::<AppCleanupRequested>()
            .ok_or_else(JobError::invalid_payload::<AppCleanupRequested>)?;

        Ok(Prepared::new(CleanupAppData { app_id: event.id }).with_dedupe_key(dedupe_key(event.id)))
    }

    async fn process(&self, ctx: &JobContext, job: &Job) -> Result<(), JobError> {
        let data = job
            .data_as::<CleanupAppData>()
            .ok_or_else(JobError::invalid_payload::<CleanupAppData>)?;

        match self
            .cleanup
            .cleanup_app(ctx, CleanupAppCommand { app_id: data.app_id })
            .await
        {
            Ok(()) => Ok(()),
            Err(CommandError::Cancelled) => Err(JobError::Cancelled),
            Err(e) if e.is_infra() => Err(JobError::Infra(e.into())),
            Err(e) => {
                error!(
                    parent: &self.span,
                    error = %e,
                    app_id = %data.app_id,
                    "cleanup job has failed"
                );
                Ok(())
            }
        }
    }
}
