//! Deploy job - claims `DeploymentCreated` and runs the deploy command.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use relay::{AnyJobData, Handler, Job, JobContext, JobData, JobError, Prepared};
use tracing::{error, Span};

use crate::common::AppId;
use crate::domains::deployment::actions::{Deploy, DeployCommand};
use crate::domains::deployment::errors::CommandError;
use crate::domains::deployment::events::DeploymentCreated;
use crate::domains::deployment::models::DeploymentNumber;

pub const DEPLOY_JOB: &str = "deployment.deploy";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployData {
    pub app_id: AppId,
    pub deployment_number: DeploymentNumber,
}

impl JobData for DeployData {
    fn discriminator(&self) -> &'static str {
        DEPLOY_JOB
    }
}

/// One pending deploy per app environment: a newer deployment of the same
/// project supersedes a pending one.
pub fn dedupe_key(app_id: AppId, project_name: &str) -> String {
    format!("{}.{}.{}", DEPLOY_JOB, app_id, project_name)
}

pub struct DeployHandler {
    span: Span,
    deploy: Arc<dyn Deploy>,
}

impl DeployHandler {
    pub fn new(span: Span, deploy: Arc<dyn Deploy>) -> Self {
        Self { span, deploy }
    }
}

#[async_trait]
impl Handler for DeployHandler {
    fn can_prepare(&self, payload: &dyn Any) -> bool {
        payload.is::<DeploymentCreated>()
    }

    fn can_process(&self, data: &dyn AnyJobData) -> bool {
        data.is::<DeployData>()
    }

    fn prepare(&self, payload: &dyn Any) -> Result<Prepared, JobError> {
        let event = payload
            .downcast_ref::<DeploymentCreated>()
            .ok_or_else(JobError::invalid_payload::<DeploymentCreated>)?;

        let data = DeployData {
            app_id: event.id.app_id(),
            deployment_number: event.id.number(),
        };
        let key = dedupe_key(data.app_id, &event.config.project_name());

        Ok(Prepared::new(data).with_dedupe_key(key))
    }

    async fn process(&self, ctx: &JobContext, job: &Job) -> Result<(), JobError> {
        let data = job
            .data_as::<DeployData>()
            .ok_or_else(JobError::invalid_payload::<DeployData>)?;

        let cmd = DeployCommand {
            app_id: data.app_id,
            deployment_number: data.deployment_number,
        };

        // The outcome of a failed deployment is already recorded on it; only
        // infrastructure failures go back to the worker.
        match self.deploy.deploy(ctx, cmd).await {
            Ok(()) => Ok(()),
            Err(CommandError::Cancelled) => Err(JobError::Cancelled),
            Err(e) if e.is_infra() => Err(JobError::Infra(e.into())),
            Err(e) => {
                error!(
                    parent: &self.span,
                    error = %e,
                    app_id = %data.app_id,
                    deployment_number = %data.deployment_number,
                    "deploy job has failed"
                );
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::common::{Action, TargetId, UserId};
    use crate::domains::deployment::errors::{AppError, StoreError};
    use crate::domains::deployment::models::{
        AppName, ConfigSnapshot, DeploymentId, DeploymentState, Environment,
    };

    struct ScriptedDeploy {
        calls: AtomicUsize,
        outcome: fn() -> Result<(), CommandError>,
    }

    #[async_trait]
    impl Deploy for ScriptedDeploy {
        async fn deploy(&self, _ctx: &JobContext, _cmd: DeployCommand) -> Result<(), CommandError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.outcome)()
        }
    }

    fn handler(outcome: fn() -> Result<(), CommandError>) -> (DeployHandler, Arc<ScriptedDeploy>) {
        let deploy = Arc::new(ScriptedDeploy {
            calls: AtomicUsize::new(0),
            outcome,
        });
        (DeployHandler::new(Span::none(), deploy.clone()), deploy)
    }

    fn created(app_id: AppId, number: u32, environment: Environment) -> DeploymentCreated {
        DeploymentCreated {
            id: DeploymentId::new(app_id, DeploymentNumber::new(number)),
            config: ConfigSnapshot::new(
                AppName::parse("my-app").unwrap(),
                environment,
                TargetId::new(),
                None,
            ),
            state: DeploymentState::default(),
            requested: Action::new(UserId::new()),
        }
    }

    fn job(prepared: Prepared) -> Job {
        Job::from_prepared(prepared)
    }

    #[test]
    fn test_prepare_builds_data_and_key() {
        let (handler, _) = handler(|| Ok(()));
        let app_id = AppId::new();
        let event = created(app_id, 3, Environment::Production);

        assert!(handler.can_prepare(&event));
        let prepared = handler.prepare(&event).unwrap();

        assert_eq!(
            prepared.dedupe_key(),
            Some(format!("deployment.deploy.{}.my-app-production", app_id).as_str())
        );
        assert!(handler.can_process(prepared.data()));
    }

    #[test]
    fn test_dedupe_key_is_deterministic() {
        let (handler, _) = handler(|| Ok(()));
        let app_id = AppId::new();

        let first = handler.prepare(&created(app_id, 1, Environment::Staging)).unwrap();
        let second = handler.prepare(&created(app_id, 2, Environment::Staging)).unwrap();
        assert_eq!(first.dedupe_key(), second.dedupe_key());

        let production = handler.prepare(&created(app_id, 1, Environment::Production)).unwrap();
        let other_app = handler
            .prepare(&created(AppId::new(), 1, Environment::Staging))
            .unwrap();
        assert_ne!(first.dedupe_key(), production.dedupe_key());
        assert_ne!(first.dedupe_key(), other_app.dedupe_key());
    }

    #[test]
    fn test_prepare_rejects_foreign_payload() {
        let (handler, _) = handler(|| Ok(()));
        let payload = "not an event";

        assert!(!handler.can_prepare(&payload));
        assert!(matches!(
            handler.prepare(&payload),
            Err(JobError::InvalidPayload { .. })
        ));
    }

    #[tokio::test]
    async fn test_process_rejects_foreign_data_without_side_effect() {
        #[derive(Debug)]
        struct Foreign;

        impl JobData for Foreign {
            fn discriminator(&self) -> &'static str {
                "test.foreign"
            }
        }

        let (handler, deploy) = handler(|| Ok(()));
        let err = handler
            .process(&JobContext::background(), &job(Prepared::new(Foreign)))
            .await
            .unwrap_err();

        assert!(matches!(err, JobError::InvalidPayload { .. }));
        assert_eq!(err.failure_kind(), relay::FailureKind::NonRetryable);
        assert_eq!(deploy.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_process_swallows_business_failures() {
        let (handler, deploy) =
            handler(|| Err(AppError::DeploymentFailed("exit status 1".into()).into()));
        let prepared = handler
            .prepare(&created(AppId::new(), 1, Environment::Production))
            .unwrap();

        handler
            .process(&JobContext::background(), &job(prepared))
            .await
            .unwrap();
        assert_eq!(deploy.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_process_propagates_infra_failures() {
        let (handler, _) =
            handler(|| Err(StoreError::Database(sqlx::Error::PoolTimedOut).into()));
        let prepared = handler
            .prepare(&created(AppId::new(), 1, Environment::Production))
            .unwrap();

        let err = handler
            .process(&JobContext::background(), &job(prepared))
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Infra(_)));
    }

    #[tokio::test]
    async fn test_process_reports_cancellation() {
        let (handler, _) = handler(|| Err(CommandError::Cancelled));
        let prepared = handler
            .prepare(&created(AppId::new(), 1, Environment::Production))
            .unwrap();

        let err = handler
            .process(&JobContext::background(), &job(prepared))
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Cancelled));
    }
}
