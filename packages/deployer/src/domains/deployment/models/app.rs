use relay::{Aggregate, EventBuffer};

use crate::common::{Action, AppId, UserId};
use crate::domains::deployment::errors::AppError;
use crate::domains::deployment::events::{
    AppCleanupRequested, AppCreated, AppDeleted, AppEnvChanged, AppEvent,
    AppVersionControlConfigured, AppVersionControlRemoved,
};

use super::deployment::{ConfigSnapshot, Deployment, DeploymentId, DeploymentNumber};
use super::environment::{AppName, Environment, EnvironmentConfig, VersionControl};
use super::requirement::EnvironmentConfigRequirement;

/// App - an application deployed to a production and a staging environment.
///
/// Operations validate, then raise an event. Raising applies the event to the
/// in-memory state and buffers it until the apps store persists it.
#[derive(Debug)]
pub struct App {
    pub(crate) id: AppId,
    pub(crate) name: AppName,
    pub(crate) production: EnvironmentConfig,
    pub(crate) staging: EnvironmentConfig,
    pub(crate) version_control: Option<VersionControl>,
    pub(crate) cleanup_requested: Option<Action>,
    pub(crate) created: Action,
    pub(crate) events: EventBuffer<AppEvent>,
}

impl App {
    /// Create an app once both environment requirements are met.
    pub fn new(
        name: AppName,
        production: EnvironmentConfigRequirement,
        staging: EnvironmentConfigRequirement,
        by: UserId,
    ) -> Result<Self, AppError> {
        let production = production.met()?;
        let staging = staging.met()?;
        let id = AppId::new();
        let created = Action::new(by);

        let mut app = Self {
            id,
            name: name.clone(),
            production: production.clone(),
            staging: staging.clone(),
            version_control: None,
            cleanup_requested: None,
            created,
            events: EventBuffer::new(),
        };

        app.events.record(AppEvent::Created(AppCreated {
            id,
            name,
            production,
            staging,
            created,
        }));

        Ok(app)
    }

    pub fn id(&self) -> AppId {
        self.id
    }

    pub fn name(&self) -> &AppName {
        &self.name
    }

    pub fn production(&self) -> &EnvironmentConfig {
        &self.production
    }

    pub fn staging(&self) -> &EnvironmentConfig {
        &self.staging
    }

    pub fn environment(&self, environment: Environment) -> &EnvironmentConfig {
        match environment {
            Environment::Production => &self.production,
            Environment::Staging => &self.staging,
        }
    }

    pub fn version_control(&self) -> Option<&VersionControl> {
        self.version_control.as_ref()
    }

    pub fn cleanup_requested(&self) -> Option<Action> {
        self.cleanup_requested
    }

    pub fn created(&self) -> Action {
        self.created
    }

    pub fn update_production_config(
        &mut self,
        requirement: EnvironmentConfigRequirement,
    ) -> Result<(), AppError> {
        self.update_environment_config(Environment::Production, requirement)
    }

    pub fn update_staging_config(
        &mut self,
        requirement: EnvironmentConfigRequirement,
    ) -> Result<(), AppError> {
        self.update_environment_config(Environment::Staging, requirement)
    }

    fn update_environment_config(
        &mut self,
        environment: Environment,
        requirement: EnvironmentConfigRequirement,
    ) -> Result<(), AppError> {
        self.ensure_not_cleaning_up()?;

        let config = requirement.met()?;
        let current = self.environment(environment);

        if current.has_same_values(&config) {
            return Ok(());
        }

        let config = config.consolidate(current);
        self.raise(AppEvent::EnvChanged(AppEnvChanged {
            id: self.id,
            environment,
            config,
        }));

        Ok(())
    }

    pub fn use_version_control(&mut self, config: VersionControl) -> Result<(), AppError> {
        self.ensure_not_cleaning_up()?;

        if self.version_control.as_ref() == Some(&config) {
            return Ok(());
        }

        self.raise(AppEvent::VersionControlConfigured(
            AppVersionControlConfigured {
                id: self.id,
                config,
            },
        ));

        Ok(())
    }

    pub fn remove_version_control(&mut self) -> Result<(), AppError> {
        self.ensure_not_cleaning_up()?;

        if self.version_control.is_none() {
            return Ok(());
        }

        self.raise(AppEvent::VersionControlRemoved(AppVersionControlRemoved {
            id: self.id,
        }));

        Ok(())
    }

    /// Mark the app for cleanup. Requesting it twice is a no-op.
    pub fn request_cleanup(&mut self, by: UserId) {
        if self.cleanup_requested.is_some() {
            return;
        }

        self.raise(AppEvent::CleanupRequested(AppCleanupRequested {
            id: self.id,
            requested: Action::new(by),
        }));
    }

    /// Delete the app, which requires a prior cleanup request.
    pub fn delete(&mut self) -> Result<(), AppError> {
        if self.cleanup_requested.is_none() {
            return Err(AppError::CleanupNotRequested);
        }

        self.raise(AppEvent::Deleted(AppDeleted { id: self.id }));

        Ok(())
    }

    /// Start a deployment of `environment` with its current configuration.
    pub fn new_deployment(
        &self,
        number: DeploymentNumber,
        environment: Environment,
        by: UserId,
    ) -> Result<Deployment, AppError> {
        self.ensure_not_cleaning_up()?;

        let config = self.environment(environment);
        let snapshot = ConfigSnapshot::new(
            self.name.clone(),
            environment,
            config.target(),
            config.vars().cloned(),
        );

        Ok(Deployment::new(
            DeploymentId::new(self.id, number),
            snapshot,
            Action::new(by),
        ))
    }

    fn ensure_not_cleaning_up(&self) -> Result<(), AppError> {
        match self.cleanup_requested {
            Some(_) => Err(AppError::CleanupRequested),
            None => Ok(()),
        }
    }

    fn raise(&mut self, event: AppEvent) {
        self.apply(&event);
        self.events.record(event);
    }

    fn apply(&mut self, event: &AppEvent) {
        match event {
            AppEvent::EnvChanged(e) => match e.environment {
                Environment::Production => self.production = e.config.clone(),
                Environment::Staging => self.staging = e.config.clone(),
            },
            AppEvent::VersionControlConfigured(e) => {
                self.version_control = Some(e.config.clone());
            }
            AppEvent::VersionControlRemoved(_) => self.version_control = None,
            AppEvent::CleanupRequested(e) => self.cleanup_requested = Some(e.requested),
            AppEvent::Created(_) | AppEvent::Deleted(_) => {}
        }
    }
}

impl Aggregate for App {
    type Event = AppEvent;

    fn pending_events(&self) -> &[AppEvent] {
        self.events.as_slice()
    }

    fn take_events(&mut self) -> Vec<AppEvent> {
        self.events.drain()
    }
}
