use std::any::Any;

use relay::Event;

use crate::common::{Action, AppId};
use crate::domains::deployment::models::{
    AppName, ConfigSnapshot, DeploymentId, DeploymentState, Environment, EnvironmentConfig,
    VersionControl,
};

/// App domain events - FACT EVENTS ONLY
///
/// Every variant carries exactly what its projection writes; projecting an
/// event never reads prior state.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AppEvent {
    Created(AppCreated),
    EnvChanged(AppEnvChanged),
    VersionControlConfigured(AppVersionControlConfigured),
    VersionControlRemoved(AppVersionControlRemoved),
    CleanupRequested(AppCleanupRequested),
    Deleted(AppDeleted),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppCreated {
    pub id: AppId,
    pub name: AppName,
    pub production: EnvironmentConfig,
    pub staging: EnvironmentConfig,
    pub created: Action,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppEnvChanged {
    pub id: AppId,
    pub environment: Environment,
    pub config: EnvironmentConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppVersionControlConfigured {
    pub id: AppId,
    pub config: VersionControl,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppVersionControlRemoved {
    pub id: AppId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppCleanupRequested {
    pub id: AppId,
    pub requested: Action,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppDeleted {
    pub id: AppId,
}

impl Event for AppEvent {
    fn name(&self) -> &'static str {
        match self {
            AppEvent::Created(_) => "app.created",
            AppEvent::EnvChanged(_) => "app.env_changed",
            AppEvent::VersionControlConfigured(_) => "app.version_control_configured",
            AppEvent::VersionControlRemoved(_) => "app.version_control_removed",
            AppEvent::CleanupRequested(_) => "app.cleanup_requested",
            AppEvent::Deleted(_) => "app.deleted",
        }
    }

    fn payload(&self) -> &(dyn Any + Send + Sync) {
        match self {
            AppEvent::Created(e) => e,
            AppEvent::EnvChanged(e) => e,
            AppEvent::VersionControlConfigured(e) => e,
            AppEvent::VersionControlRemoved(e) => e,
            AppEvent::CleanupRequested(e) => e,
            AppEvent::Deleted(e) => e,
        }
    }
}

/// Deployment domain events
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DeploymentEvent {
    Created(DeploymentCreated),
    StateChanged(DeploymentStateChanged),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentCreated {
    pub id: DeploymentId,
    pub config: ConfigSnapshot,
    pub state: DeploymentState,
    pub requested: Action,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentStateChanged {
    pub id: DeploymentId,
    pub state: DeploymentState,
}

impl Event for DeploymentEvent {
    fn name(&self) -> &'static str {
        match self {
            DeploymentEvent::Created(_) => "deployment.created",
            DeploymentEvent::StateChanged(_) => "deployment.state_changed",
        }
    }

    fn payload(&self) -> &(dyn Any + Send + Sync) {
        match self {
            DeploymentEvent::Created(e) => e,
            DeploymentEvent::StateChanged(e) => e,
        }
    }
}
