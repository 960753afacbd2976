//! Apps persistence: projections of [`AppEvent`] and the naming consistency checks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use url::Url;

use relay::EventBuffer;

use crate::common::{Action, AppId, TargetId, UserId};
use crate::domains::deployment::errors::StoreError;
use crate::domains::deployment::events::AppEvent;
use crate::domains::deployment::models::{
    App, AppName, EnvVars, Environment, EnvironmentConfig, EnvironmentConfigRequirement,
    VersionControl,
};
use crate::kernel::writer::{AggregateWriter, Projection};

#[derive(Clone)]
pub struct AppsStore {
    pool: SqlitePool,
    writer: AggregateWriter,
}

impl AppsStore {
    pub fn new(writer: AggregateWriter) -> Self {
        Self {
            pool: writer.pool().clone(),
            writer,
        }
    }

    /// Persist and dispatch the pending events of `app`.
    pub async fn write(&self, app: &mut App) -> Result<(), StoreError> {
        self.writer.write::<App>(&mut [app]).await
    }

    /// Persist the pending events of several apps in a single transaction.
    pub async fn write_all(&self, apps: &mut [&mut App]) -> Result<(), StoreError> {
        self.writer.write(apps).await
    }

    pub async fn get_by_id(&self, id: AppId) -> Result<App, StoreError> {
        let row = sqlx::query_as::<_, AppRow>("SELECT * FROM apps WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound { entity: "app" })?;

        row.try_into()
    }

    /// Whether any app, in either environment, is bound to `target`.
    pub async fn has_apps_on_target(&self, target: TargetId) -> Result<bool, StoreError> {
        let found = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM apps WHERE production_target = ?1 OR staging_target = ?1)",
        )
        .bind(target)
        .fetch_one(&self.pool)
        .await?;

        Ok(found)
    }

    /// Requirements for a new app named `name`.
    ///
    /// Both slots are resolved in a single query. A name is available on a
    /// target when no app with that name is bound to it, whatever the slot.
    pub async fn check_app_naming_availability(
        &self,
        name: &AppName,
        production: EnvironmentConfig,
        staging: EnvironmentConfig,
    ) -> Result<(EnvironmentConfigRequirement, EnvironmentConfigRequirement), StoreError> {
        let row = sqlx::query_as::<_, AvailabilityRow>(
            r#"
            SELECT
                EXISTS(SELECT 1 FROM targets WHERE id = ?2 AND cleanup_requested_at IS NULL) AS production_target_exists,
                NOT EXISTS(SELECT 1 FROM apps WHERE name = ?1 AND (production_target = ?2 OR staging_target = ?2)) AS production_available,
                EXISTS(SELECT 1 FROM targets WHERE id = ?3 AND cleanup_requested_at IS NULL) AS staging_target_exists,
                NOT EXISTS(SELECT 1 FROM apps WHERE name = ?1 AND (production_target = ?3 OR staging_target = ?3)) AS staging_available
            "#,
        )
        .bind(name.as_str())
        .bind(production.target())
        .bind(staging.target())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into_requirements(Some(production), Some(staging)))
    }

    /// Requirements for changing the environments of an existing app.
    ///
    /// A slot given as `None` is not changing and comes back as the empty
    /// requirement. The app's own row never makes its name unavailable.
    pub async fn check_app_naming_availability_by_id(
        &self,
        id: AppId,
        production: Option<EnvironmentConfig>,
        staging: Option<EnvironmentConfig>,
    ) -> Result<(EnvironmentConfigRequirement, EnvironmentConfigRequirement), StoreError> {
        if production.is_none() && staging.is_none() {
            return Ok(Default::default());
        }

        let mut query = QueryBuilder::<Sqlite>::new("SELECT ");
        push_slot_checks(&mut query, Environment::Production, production.as_ref());
        query.push(", ");
        push_slot_checks(&mut query, Environment::Staging, staging.as_ref());
        query.push(" FROM apps src WHERE src.id = ");
        query.push_bind(id);

        let row = query
            .build_query_as::<AvailabilityRow>()
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound { entity: "app" })?;

        Ok(row.into_requirements(production, staging))
    }
}

/// Append the two availability columns of one slot, or constant placeholders
/// when the slot is not checked.
fn push_slot_checks(
    query: &mut QueryBuilder<'_, Sqlite>,
    environment: Environment,
    config: Option<&EnvironmentConfig>,
) {
    let prefix = environment.column_prefix();

    let Some(config) = config else {
        query.push(format!(
            "0 AS {prefix}_target_exists, 0 AS {prefix}_available"
        ));
        return;
    };

    query
        .push("EXISTS(SELECT 1 FROM targets WHERE id = ")
        .push_bind(config.target())
        .push(format!(
            " AND cleanup_requested_at IS NULL) AS {prefix}_target_exists, "
        ))
        .push("NOT EXISTS(SELECT 1 FROM apps other WHERE other.id != src.id AND other.name = src.name AND (other.production_target = ")
        .push_bind(config.target())
        .push(" OR other.staging_target = ")
        .push_bind(config.target())
        .push(format!(")) AS {prefix}_available"));
}

#[derive(FromRow)]
struct AvailabilityRow {
    production_target_exists: bool,
    production_available: bool,
    staging_target_exists: bool,
    staging_available: bool,
}

impl AvailabilityRow {
    fn into_requirements(
        self,
        production: Option<EnvironmentConfig>,
        staging: Option<EnvironmentConfig>,
    ) -> (EnvironmentConfigRequirement, EnvironmentConfigRequirement) {
        let production = production
            .map(|config| {
                EnvironmentConfigRequirement::new(
                    config,
                    self.production_target_exists,
                    self.production_available,
                )
            })
            .unwrap_or_default();
        let staging = staging
            .map(|config| {
                EnvironmentConfigRequirement::new(
                    config,
                    self.staging_target_exists,
                    self.staging_available,
                )
            })
            .unwrap_or_default();

        (production, staging)
    }
}

#[derive(FromRow)]
struct AppRow {
    id: AppId,
    name: String,
    production_target: TargetId,
    production_version: DateTime<Utc>,
    production_vars: Option<Json<EnvVars>>,
    staging_target: TargetId,
    staging_version: DateTime<Utc>,
    staging_vars: Option<Json<EnvVars>>,
    version_control_url: Option<String>,
    version_control_token: Option<String>,
    cleanup_requested_at: Option<DateTime<Utc>>,
    cleanup_requested_by: Option<UserId>,
    created_at: DateTime<Utc>,
    created_by: UserId,
}

impl TryFrom<AppRow> for App {
    type Error = StoreError;

    fn try_from(row: AppRow) -> Result<Self, Self::Error> {
        let name = AppName::parse(row.name).map_err(decode_error)?;

        let version_control = row
            .version_control_url
            .map(|url| -> Result<VersionControl, StoreError> {
                let url = Url::parse(&url).map_err(decode_error)?;
                let config = VersionControl::new(url);
                Ok(match row.version_control_token {
                    Some(token) => config.with_token(token),
                    None => config,
                })
            })
            .transpose()?;

        let cleanup_requested = match (row.cleanup_requested_at, row.cleanup_requested_by) {
            (Some(at), Some(by)) => Some(Action::from_parts(at, by)),
            _ => None,
        };

        Ok(App {
            id: row.id,
            name,
            production: EnvironmentConfig::from_parts(
                row.production_target,
                row.production_version,
                row.production_vars.map(|vars| vars.0),
            ),
            staging: EnvironmentConfig::from_parts(
                row.staging_target,
                row.staging_version,
                row.staging_vars.map(|vars| vars.0),
            ),
            version_control,
            cleanup_requested,
            created: Action::from_parts(row.created_at, row.created_by),
            events: EventBuffer::new(),
        })
    }
}

fn decode_error<E>(e: E) -> StoreError
where
    E: std::error::Error + Send + Sync + 'static,
{
    StoreError::Database(sqlx::Error::Decode(Box::new(e)))
}

// =============================================================================
// Projection
// =============================================================================

#[async_trait]
impl Projection for AppEvent {
    async fn project(&self, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
        match self {
            AppEvent::Created(e) => {
                sqlx::query(
                    r#"
                    INSERT INTO apps (
                        id, name,
                        production_target, production_version, production_vars,
                        staging_target, staging_version, staging_vars,
                        version_control_url, version_control_token,
                        cleanup_requested_at, cleanup_requested_by,
                        created_at, created_by
                    )
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL, NULL, NULL, NULL, ?, ?)
                    "#,
                )
                .bind(e.id)
                .bind(e.name.as_str())
                .bind(e.production.target())
                .bind(e.production.version())
                .bind(e.production.vars().map(Json))
                .bind(e.staging.target())
                .bind(e.staging.version())
                .bind(e.staging.vars().map(Json))
                .bind(e.created.at)
                .bind(e.created.by)
                .execute(conn)
                .await?;
            }
            AppEvent::EnvChanged(e) => {
                let sql = env_update_sql(e.environment);
                sqlx::query(&sql)
                    .bind(e.config.target())
                    .bind(e.config.version())
                    .bind(e.config.vars().map(Json))
                    .bind(e.id)
                    .execute(conn)
                    .await?;
            }
            AppEvent::VersionControlConfigured(e) => {
                sqlx::query(
                    "UPDATE apps SET version_control_url = ?, version_control_token = ? WHERE id = ?",
                )
                .bind(e.config.url().as_str())
                .bind(e.config.token())
                .bind(e.id)
                .execute(conn)
                .await?;
            }
            AppEvent::VersionControlRemoved(e) => {
                sqlx::query(
                    "UPDATE apps SET version_control_url = NULL, version_control_token = NULL WHERE id = ?",
                )
                .bind(e.id)
                .execute(conn)
                .await?;
            }
            AppEvent::CleanupRequested(e) => {
                sqlx::query(
                    "UPDATE apps SET cleanup_requested_at = ?, cleanup_requested_by = ? WHERE id = ?",
                )
                .bind(e.requested.at)
                .bind(e.requested.by)
                .bind(e.id)
                .execute(conn)
                .await?;
            }
            AppEvent::Deleted(e) => {
                sqlx::query("DELETE FROM apps WHERE id = ?")
                    .bind(e.id)
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

/// The update touching exactly one environment's columns.
fn env_update_sql(environment: Environment) -> String {
    format!(
        "UPDATE apps SET {p}_target = ?, {p}_version = ?, {p}_vars = ? WHERE id = ?",
        p = environment.column_prefix()
    )
}
