//! Deploy command - runs one deployment and records its outcome.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use relay::JobContext;
use tracing::{info, warn};

use crate::common::AppId;
use crate::domains::deployment::artifact::{ArtifactManager, LogSink};
use crate::domains::deployment::data::DeploymentsStore;
use crate::domains::deployment::errors::{AppError, CommandError};
use crate::domains::deployment::models::{Deployment, DeploymentNumber, DeploymentStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeployCommand {
    pub app_id: AppId,
    pub deployment_number: DeploymentNumber,
}

#[async_trait]
pub trait Deploy: Send + Sync {
    async fn deploy(&self, ctx: &JobContext, cmd: DeployCommand) -> Result<(), CommandError>;
}

/// Builds and ships a prepared deployment onto its target.
#[async_trait]
pub trait DeploymentRunner: Send + Sync {
    async fn run(
        &self,
        ctx: &JobContext,
        deployment: &Deployment,
        build_dir: &Path,
        logs: &mut LogSink,
    ) -> Result<()>;
}

pub struct DeployAction {
    deployments: DeploymentsStore,
    artifacts: Arc<dyn ArtifactManager>,
    runner: Arc<dyn DeploymentRunner>,
}

impl DeployAction {
    pub fn new(
        deployments: DeploymentsStore,
        artifacts: Arc<dyn ArtifactManager>,
        runner: Arc<dyn DeploymentRunner>,
    ) -> Self {
        Self {
            deployments,
            artifacts,
            runner,
        }
    }

    async fn build(&self, ctx: &JobContext, deployment: &Deployment) -> Result<()> {
        let (build_dir, mut logs) = self.artifacts.prepare_build(ctx, deployment).await?;

        logs.write_line(&format!(
            "deploying {} to target {}",
            deployment.config().project_name(),
            deployment.config().target()
        ))
        .await?;

        let result = self.runner.run(ctx, deployment, &build_dir, &mut logs).await;

        match &result {
            Ok(()) => logs.write_line("deployment succeeded").await?,
            Err(e) => logs.write_line(&format!("deployment failed: {:#}", e)).await?,
        }
        logs.close().await?;

        result
    }
}

#[async_trait]
impl Deploy for DeployAction {
    async fn deploy(&self, ctx: &JobContext, cmd: DeployCommand) -> Result<(), CommandError> {
        ctx.check().map_err(|_| CommandError::Cancelled)?;

        let mut deployment = self
            .deployments
            .get(cmd.app_id, cmd.deployment_number)
            .await?;

        // A deployment still running here was interrupted before it could
        // record an outcome.
        if deployment.has_started() {
            if deployment.state().status() != DeploymentStatus::Running {
                info!(
                    app_id = %cmd.app_id,
                    deployment_number = %cmd.deployment_number,
                    "deployment already finished, skipping"
                );
                return Ok(());
            }

            warn!(
                app_id = %cmd.app_id,
                deployment_number = %cmd.deployment_number,
                "deployment was interrupted"
            );
            deployment.mark_failed("deployment was interrupted")?;
            self.deployments.write(&mut deployment).await?;
            return Err(AppError::DeploymentFailed("deployment was interrupted".into()).into());
        }

        // Older pending deployments of this environment lost their job to
        // this one and will never run.
        let mut superseded = self
            .deployments
            .pending_before(
                cmd.app_id,
                deployment.config().environment(),
                cmd.deployment_number,
            )
            .await?;
        for older in &mut superseded {
            older.mark_superseded(cmd.deployment_number)?;
        }

        deployment.mark_running()?;
        let mut batch: Vec<&mut Deployment> = superseded.iter_mut().collect();
        batch.push(&mut deployment);
        self.deployments.write_all(&mut batch).await?;

        if !superseded.is_empty() {
            info!(
                app_id = %cmd.app_id,
                deployment_number = %cmd.deployment_number,
                superseded = superseded.len(),
                "pending deployments superseded"
            );
        }

        let outcome = match ctx.guard(self.build(ctx, &deployment)).await {
            Ok(outcome) => outcome,
            Err(stopped) => Err(anyhow::Error::new(stopped)),
        };
        let cancelled = outcome.is_err() && ctx.is_cancelled();

        let failure = match outcome {
            Ok(()) => {
                deployment.mark_succeeded()?;
                None
            }
            Err(e) => {
                let reason = format!("{:#}", e);
                deployment.mark_failed(reason.clone())?;
                Some(reason)
            }
        };

        self.deployments.write(&mut deployment).await?;

        match failure {
            None => {
                info!(
                    app_id = %cmd.app_id,
                    deployment_number = %cmd.deployment_number,
                    "deployment succeeded"
                );
                Ok(())
            }
            Some(_) if cancelled => Err(CommandError::Cancelled),
            Some(reason) => Err(AppError::DeploymentFailed(reason).into()),
        }
    }
}
