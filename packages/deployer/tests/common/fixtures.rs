//! Test fixtures for creating test data.
//!
//! Targets are managed outside the deployer, so they are inserted with raw SQL.

use chrono::Utc;
use deployer::common::{AppId, TargetId, UserId};
use deployer::domains::deployment::actions::{create_app, CreateApp};
use deployer::domains::deployment::models::{AppName, EnvironmentConfig};
use sqlx::SqlitePool;

use super::TestHarness;

/// Insert a target ready to receive apps.
pub async fn insert_target(pool: &SqlitePool, name: &str) -> TargetId {
    let id = TargetId::new();
    sqlx::query(
        "INSERT INTO targets (id, name, url, created_at, created_by) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(name)
    .bind(format!("http://{}.example.com", name))
    .bind(Utc::now())
    .bind(UserId::new())
    .execute(pool)
    .await
    .expect("Failed to insert target");
    id
}

/// Mark a target as being cleaned up.
pub async fn request_target_cleanup(pool: &SqlitePool, target: TargetId) {
    sqlx::query("UPDATE targets SET cleanup_requested_at = ?, cleanup_requested_by = ? WHERE id = ?")
        .bind(Utc::now())
        .bind(UserId::new())
        .bind(target)
        .execute(pool)
        .await
        .expect("Failed to request target cleanup");
}

/// Create an app through the regular use case.
pub async fn create_test_app(
    ctx: &TestHarness,
    name: &str,
    production: TargetId,
    staging: TargetId,
) -> AppId {
    create_app(
        ctx.apps(),
        CreateApp {
            name: AppName::parse(name).expect("invalid test app name"),
            production: EnvironmentConfig::new(production),
            staging: EnvironmentConfig::new(staging),
            version_control: None,
        },
        UserId::new(),
    )
    .await
    .expect("Failed to create test app")
}

pub async fn count_apps(pool: &SqlitePool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM apps")
        .fetch_one(pool)
        .await
        .expect("Failed to count apps")
}
