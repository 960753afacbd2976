use std::fmt;

use chrono::{DateTime, Utc};
use relay::{Aggregate, EventBuffer};
use serde::{Deserialize, Serialize};

use crate::common::{Action, AppId, TargetId};
use crate::domains::deployment::errors::AppError;
use crate::domains::deployment::events::{
    DeploymentCreated, DeploymentEvent, DeploymentStateChanged,
};

use super::environment::{AppName, EnvVars, Environment};

/// Per-app sequence number of a deployment, starting at 1.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(transparent)]
pub struct DeploymentNumber(u32);

impl DeploymentNumber {
    pub const FIRST: DeploymentNumber = DeploymentNumber(1);

    pub fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for DeploymentNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeploymentId {
    app_id: AppId,
    number: DeploymentNumber,
}

impl DeploymentId {
    pub fn new(app_id: AppId, number: DeploymentNumber) -> Self {
        Self { app_id, number }
    }

    pub fn app_id(&self) -> AppId {
        self.app_id
    }

    pub fn number(&self) -> DeploymentNumber {
        self.number
    }
}

/// Environment configuration frozen at the time a deployment was requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    app_name: AppName,
    environment: Environment,
    target: TargetId,
    vars: Option<EnvVars>,
}

impl ConfigSnapshot {
    pub fn new(
        app_name: AppName,
        environment: Environment,
        target: TargetId,
        vars: Option<EnvVars>,
    ) -> Self {
        Self {
            app_name,
            environment,
            target,
            vars,
        }
    }

    pub fn app_name(&self) -> &AppName {
        &self.app_name
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn target(&self) -> TargetId {
        self.target
    }

    pub fn vars(&self) -> Option<&EnvVars> {
        self.vars.as_ref()
    }

    /// Name of the deployed project on its target, unique per app environment.
    pub fn project_name(&self) -> String {
        format!("{}-{}", self.app_name, self.environment)
    }
}

/// Deployment status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploymentStatus::Pending => write!(f, "pending"),
            DeploymentStatus::Running => write!(f, "running"),
            DeploymentStatus::Succeeded => write!(f, "succeeded"),
            DeploymentStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentState {
    status: DeploymentStatus,
    error_code: Option<String>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl Default for DeploymentState {
    fn default() -> Self {
        Self {
            status: DeploymentStatus::Pending,
            error_code: None,
            started_at: None,
            finished_at: None,
        }
    }
}

impl DeploymentState {
    pub(crate) fn from_parts(
        status: DeploymentStatus,
        error_code: Option<String>,
        started_at: Option<DateTime<Utc>>,
        finished_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            status,
            error_code,
            started_at,
            finished_at,
        }
    }

    pub fn status(&self) -> DeploymentStatus {
        self.status
    }

    pub fn error_code(&self) -> Option<&str> {
        self.error_code.as_deref()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    fn started(&self) -> Result<Self, AppError> {
        if self.status != DeploymentStatus::Pending {
            return Err(AppError::DeploymentAlreadyStarted);
        }

        Ok(Self {
            status: DeploymentStatus::Running,
            started_at: Some(Utc::now()),
            ..self.clone()
        })
    }

    fn superseded(&self, reason: String) -> Result<Self, AppError> {
        if self.status != DeploymentStatus::Pending {
            return Err(AppError::DeploymentAlreadyStarted);
        }

        Ok(Self {
            status: DeploymentStatus::Failed,
            error_code: Some(reason),
            finished_at: Some(Utc::now()),
            ..self.clone()
        })
    }

    fn finished(&self, error: Option<String>) -> Result<Self, AppError> {
        if self.status != DeploymentStatus::Running {
            return Err(AppError::DeploymentNotRunning);
        }

        let status = match error {
            Some(_) => DeploymentStatus::Failed,
            None => DeploymentStatus::Succeeded,
        };

        Ok(Self {
            status,
            error_code: error,
            finished_at: Some(Utc::now()),
            ..self.clone()
        })
    }
}

/// One deployment of an app environment: Pending → Running → Succeeded | Failed.
#[derive(Debug)]
pub struct Deployment {
    pub(crate) id: DeploymentId,
    pub(crate) config: ConfigSnapshot,
    pub(crate) state: DeploymentState,
    pub(crate) requested: Action,
    pub(crate) events: EventBuffer<DeploymentEvent>,
}

impl Deployment {
    /// Only apps create deployments, see `App::new_deployment`.
    pub(crate) fn new(id: DeploymentId, config: ConfigSnapshot, requested: Action) -> Self {
        let mut deployment = Self {
            id,
            config: config.clone(),
            state: DeploymentState::default(),
            requested,
            events: EventBuffer::new(),
        };

        deployment
            .events
            .record(DeploymentEvent::Created(DeploymentCreated {
                id,
                config,
                state: deployment.state.clone(),
                requested,
            }));

        deployment
    }

    pub fn id(&self) -> DeploymentId {
        self.id
    }

    pub fn config(&self) -> &ConfigSnapshot {
        &self.config
    }

    pub fn state(&self) -> &DeploymentState {
        &self.state
    }

    pub fn requested(&self) -> Action {
        self.requested
    }

    pub fn has_started(&self) -> bool {
        self.state.status != DeploymentStatus::Pending
    }

    pub fn mark_running(&mut self) -> Result<(), AppError> {
        let state = self.state.started()?;
        self.change_state(state);
        Ok(())
    }

    pub fn mark_succeeded(&mut self) -> Result<(), AppError> {
        let state = self.state.finished(None)?;
        self.change_state(state);
        Ok(())
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) -> Result<(), AppError> {
        let state = self.state.finished(Some(reason.into()))?;
        self.change_state(state);
        Ok(())
    }

    /// Close a deployment that never started because a newer one of the same
    /// environment replaced its job.
    pub fn mark_superseded(&mut self, by: DeploymentNumber) -> Result<(), AppError> {
        let state = self
            .state
            .superseded(format!("superseded by deployment {}", by))?;
        self.change_state(state);
        Ok(())
    }

    fn change_state(&mut self, state: DeploymentState) {
        self.state = state.clone();
        self.events
            .record(DeploymentEvent::StateChanged(DeploymentStateChanged {
                id: self.id,
                state,
            }));
    }
}

impl Aggregate for Deployment {
    type Event = DeploymentEvent;

    fn pending_events(&self) -> &[DeploymentEvent] {
        self.events.as_slice()
    }

    fn take_events(&mut self) -> Vec<DeploymentEvent> {
        self.events.drain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::UserId;

    fn deployment(environment: Environment) -> Deployment {
        let config = ConfigSnapshot::new(
            AppName::parse("my-app").unwrap(),
            environment,
            TargetId::new(),
            None,
        );
        Deployment::new(
            DeploymentId::new(AppId::new(), DeploymentNumber::FIRST),
            config,
            Action::new(UserId::new()),
        )
    }

    #[test]
    fn test_project_name_is_app_and_environment() {
        assert_eq!(
            deployment(Environment::Production).config().project_name(),
            "my-app-production"
        );
        assert_eq!(
            deployment(Environment::Staging).config().project_name(),
            "my-app-staging"
        );
    }

    #[test]
    fn test_new_deployment_records_created() {
        let depl = deployment(Environment::Production);
        assert_eq!(depl.state().status(), DeploymentStatus::Pending);
        assert!(matches!(
            depl.pending_events(),
            [DeploymentEvent::Created(_)]
        ));
    }

    #[test]
    fn test_state_machine() {
        let mut depl = deployment(Environment::Production);
        assert_eq!(depl.mark_succeeded(), Err(AppError::DeploymentNotRunning));

        depl.mark_running().unwrap();
        assert!(depl.has_started());
        assert_eq!(depl.mark_running(), Err(AppError::DeploymentAlreadyStarted));

        depl.mark_failed("build exited with 1").unwrap();
        assert_eq!(depl.state().status(), DeploymentStatus::Failed);
        assert_eq!(depl.state().error_code(), Some("build exited with 1"));
        assert!(depl.state().finished_at().is_some());

        let events = depl.take_events();
        assert_eq!(events.len(), 3);
        assert!(depl.pending_events().is_empty());
    }

    #[test]
    fn test_superseded_deployment_never_started() {
        let mut depl = deployment(Environment::Staging);

        depl.mark_superseded(DeploymentNumber::new(2)).unwrap();

        assert_eq!(depl.state().status(), DeploymentStatus::Failed);
        assert_eq!(depl.state().error_code(), Some("superseded by deployment 2"));
        assert!(depl.state().started_at().is_none());
        assert!(depl.state().finished_at().is_some());
        assert_eq!(
            depl.mark_superseded(DeploymentNumber::new(3)),
            Err(AppError::DeploymentAlreadyStarted)
        );
    }

    #[test]
    fn test_deployment_number_sequence() {
        assert_eq!(DeploymentNumber::FIRST.next(), DeploymentNumber::new(2));
        assert_eq!(DeploymentNumber::new(12).to_string(), "12");
    }
}
