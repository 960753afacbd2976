//! App use cases - check consistency, run the aggregate operation, write.
//!
//! Derived work (deployments, cleanups) is never started here: it follows
//! from the events these writes dispatch.

use tracing::info;

use crate::common::{AppId, UserId};
use crate::domains::deployment::data::{AppsStore, DeploymentsStore};
use crate::domains::deployment::errors::CommandError;
use crate::domains::deployment::models::{
    App, AppName, DeploymentNumber, Environment, EnvironmentConfig, VersionControl,
};

#[derive(Debug, Clone)]
pub struct CreateApp {
    pub name: AppName,
    pub production: EnvironmentConfig,
    pub staging: EnvironmentConfig,
    pub version_control: Option<VersionControl>,
}

/// Version control change requested by an update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum VersionControlChange {
    #[default]
    Keep,
    Use(VersionControl),
    Remove,
}

/// Fields left as `None` are not changing.
#[derive(Debug, Clone, Default)]
pub struct UpdateApp {
    pub production: Option<EnvironmentConfig>,
    pub staging: Option<EnvironmentConfig>,
    pub version_control: VersionControlChange,
}

pub async fn create_app(
    apps: &AppsStore,
    input: CreateApp,
    by: UserId,
) -> Result<AppId, CommandError> {
    let (production, staging) = apps
        .check_app_naming_availability(&input.name, input.production, input.staging)
        .await?;

    let mut app = App::new(input.name, production, staging, by)?;

    if let Some(version_control) = input.version_control {
        app.use_version_control(version_control)?;
    }

    apps.write(&mut app).await?;

    info!(app_id = %app.id(), app_name = %app.name(), "app created");
    Ok(app.id())
}

pub async fn update_app(apps: &AppsStore, id: AppId, input: UpdateApp) -> Result<(), CommandError> {
    let (production, staging) = apps
        .check_app_naming_availability_by_id(id, input.production, input.staging)
        .await?;

    let mut app = apps.get_by_id(id).await?;

    if !production.is_empty() {
        app.update_production_config(production)?;
    }

    if !staging.is_empty() {
        app.update_staging_config(staging)?;
    }

    match input.version_control {
        VersionControlChange::Keep => {}
        VersionControlChange::Use(config) => app.use_version_control(config)?,
        VersionControlChange::Remove => app.remove_version_control()?,
    }

    apps.write(&mut app).await?;
    Ok(())
}

/// Mark the app for cleanup; the cleanup job deletes it afterwards.
pub async fn request_app_cleanup(apps: &AppsStore, id: AppId, by: UserId) -> Result<(), CommandError> {
    let mut app = apps.get_by_id(id).await?;
    app.request_cleanup(by);
    apps.write(&mut app).await?;

    info!(app_id = %id, "app cleanup requested");
    Ok(())
}

/// Record a new deployment of `environment`; the deploy job runs it.
pub async fn queue_deployment(
    apps: &AppsStore,
    deployments: &DeploymentsStore,
    app_id: AppId,
    environment: Environment,
    by: UserId,
) -> Result<DeploymentNumber, CommandError> {
    let app = apps.get_by_id(app_id).await?;
    let number = deployments.next_number(app_id).await?;

    let mut deployment = app.new_deployment(number, environment, by)?;
    deployments.write(&mut deployment).await?;

    info!(
        app_id = %app_id,
        deployment_number = %number,
        environment = %environment,
        "deployment queued"
    );
    Ok(number)
}
