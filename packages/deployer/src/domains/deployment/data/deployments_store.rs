use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay::EventBuffer;
use sqlx::types::Json;
use sqlx::{FromRow, SqliteConnection, SqlitePool};

use crate::common::{Action, AppId, TargetId, UserId};
use crate::domains::deployment::errors::StoreError;
use crate::domains::deployment::events::DeploymentEvent;
use crate::domains::deployment::models::{
    AppName, ConfigSnapshot, Deployment, DeploymentId, DeploymentNumber, DeploymentState,
    DeploymentStatus, EnvVars, Environment,
};
use crate::kernel::writer::{AggregateWriter, Projection};

#[derive(Clone)]
pub struct DeploymentsStore {
    pool: SqlitePool,
    writer: AggregateWriter,
}

impl DeploymentsStore {
    pub fn new(writer: AggregateWriter) -> Self {
        Self {
            pool: writer.pool().clone(),
            writer,
        }
    }

    pub async fn write(&self, deployment: &mut Deployment) -> Result<(), StoreError> {
        self.writer.write::<Deployment>(&mut [deployment]).await
    }

    /// Persist the pending events of several deployments in a single transaction.
    pub async fn write_all(&self, deployments: &mut [&mut Deployment]) -> Result<(), StoreError> {
        self.writer.write(deployments).await
    }

    pub async fn get(&self, app_id: AppId, number: DeploymentNumber) -> Result<Deployment, StoreError> {
        let row = sqlx::query_as::<_, DeploymentRow>(
            "SELECT * FROM deployments WHERE app_id = ? AND deployment_number = ?",
        )
        .bind(app_id)
        .bind(number)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound {
            entity: "deployment",
        })?;

        row.try_into()
    }

    /// Deployments of one app environment numbered below `number` that never
    /// started, oldest first.
    pub async fn pending_before(
        &self,
        app_id: AppId,
        environment: Environment,
        number: DeploymentNumber,
    ) -> Result<Vec<Deployment>, StoreError> {
        let rows = sqlx::query_as::<_, DeploymentRow>(
            r#"
            SELECT * FROM deployments
            WHERE app_id = ? AND config_environment = ? AND deployment_number < ? AND state_status = ?
            ORDER BY deployment_number
            "#,
        )
        .bind(app_id)
        .bind(environment)
        .bind(number)
        .bind(DeploymentStatus::Pending)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Deployment::try_from).collect()
    }

    /// Number the next deployment of `app_id` would get.
    pub async fn next_number(&self, app_id: AppId) -> Result<DeploymentNumber, StoreError> {
        let next = sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(MAX(deployment_number), 0) + 1 FROM deployments WHERE app_id = ?",
        )
        .bind(app_id)
        .fetch_one(&self.pool)
        .await?;

        let next = u32::try_from(next)
            .map_err(|e| StoreError::Database(sqlx::Error::Decode(Box::new(e))))?;

        Ok(DeploymentNumber::new(next))
    }
}

#[derive(FromRow)]
struct DeploymentRow {
    app_id: AppId,
    deployment_number: DeploymentNumber,
    config_appname: String,
    config_environment: Environment,
    config_target: TargetId,
    config_vars: Option<Json<EnvVars>>,
    state_status: DeploymentStatus,
    state_error_code: Option<String>,
    state_started_at: Option<DateTime<Utc>>,
    state_finished_at: Option<DateTime<Utc>>,
    requested_at: DateTime<Utc>,
    requested_by: UserId,
}

impl TryFrom<DeploymentRow> for Deployment {
    type Error = StoreError;

    fn try_from(row: DeploymentRow) -> Result<Self, Self::Error> {
        let app_name = AppName::parse(row.config_appname)
            .map_err(|e| StoreError::Database(sqlx::Error::Decode(Box::new(e))))?;

        Ok(Deployment {
            id: DeploymentId::new(row.app_id, row.deployment_number),
            config: ConfigSnapshot::new(
                app_name,
                row.config_environment,
                row.config_target,
                row.config_vars.map(|vars| vars.0),
            ),
            state: DeploymentState::from_parts(
                row.state_status,
                row.state_error_code,
                row.state_started_at,
                row.state_finished_at,
            ),
            requested: Action::from_parts(row.requested_at, row.requested_by),
            events: EventBuffer::new(),
        })
    }
}

#[async_trait]
impl Projection for DeploymentEvent {
    async fn project(&self, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
        match self {
            DeploymentEvent::Created(e) => {
                sqlx::query(
                    r#"
                    INSERT INTO deployments (
                        app_id, deployment_number,
                        config_appname, config_environment, config_target, config_vars,
                        state_status, state_error_code, state_started_at, state_finished_at,
                        requested_at, requested_by
                    )
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(e.id.app_id())
                .bind(e.id.number())
                .bind(e.config.app_name().as_str())
                .bind(e.config.environment())
                .bind(e.config.target())
                .bind(e.config.vars().map(Json))
                .bind(e.state.status())
                .bind(e.state.error_code())
                .bind(e.state.started_at())
                .bind(e.state.finished_at())
                .bind(e.requested.at)
                .bind(e.requested.by)
                .execute(conn)
                .await?;
            }
            DeploymentEvent::StateChanged(e) => {
                sqlx::query(
                    r#"
                    UPDATE deployments
                    SET state_status = ?, state_error_code = ?, state_started_at = ?, state_finished_at = ?
                    WHERE app_id = ? AND deployment_number = ?
                    "#,
                )
                .bind(e.state.status())
                .bind(e.state.error_code())
                .bind(e.state.started_at())
                .bind(e.state.finished_at())
                .bind(e.id.app_id())
                .bind(e.id.number())
                .execute(conn)
                .await?;
            }
            // Unreachable while every variant has an arm above. A variant
            // added without its projection writes nothing instead of failing
            // the transaction.
            #[allow(unreachable_patterns)]
            _ => {}
        }

        Ok(())
    }
}
