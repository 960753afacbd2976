//! Cleanup command - removes an app's artifacts, then the app itself.

use std::sync::Arc;

use async_trait::async_trait;
use relay::JobContext;
use tracing::{debug, info};

use crate::common::AppId;
use crate::domains::deployment::artifact::ArtifactManager;
use crate::domains::deployment::data::AppsStore;
use crate::domains::deployment::errors::{AppError, CommandError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupAppCommand {
    pub app_id: AppId,
}

#[async_trait]
pub trait CleanupApp: Send + Sync {
    async fn cleanup_app(&self, ctx: &JobContext, cmd: CleanupAppCommand) -> Result<(), CommandError>;
}

pub struct CleanupAppAction {
    apps: AppsStore,
    artifacts: Arc<dyn ArtifactManager>,
}

impl CleanupAppAction {
    pub fn new(apps: AppsStore, artifacts: Arc<dyn ArtifactManager>) -> Self {
        Self { apps, artifacts }
    }
}

#[async_trait]
impl CleanupApp for CleanupAppAction {
    async fn cleanup_app(&self, ctx: &JobContext, cmd: CleanupAppCommand) -> Result<(), CommandError> {
        ctx.check().map_err(|_| CommandError::Cancelled)?;

        let mut app = match self.apps.get_by_id(cmd.app_id).await {
            Ok(app) => app,
            Err(e) if e.is_not_found() => {
                debug!(app_id = %cmd.app_id, "app already removed");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        // Refuse before touching the filesystem.
        if app.cleanup_requested().is_none() {
            return Err(AppError::CleanupNotRequested.into());
        }

        self.artifacts
            .cleanup(ctx, cmd.app_id)
            .await
            .map_err(|e| {
                if ctx.is_cancelled() {
                    CommandError::Cancelled
                } else {
                    CommandError::Artifact(e)
                }
            })?;

        app.delete()?;
        self.apps.write(&mut app).await?;

        info!(app_id = %cmd.app_id, app_name = %app.name(), "app deleted");
        Ok(())
    }
}
