//! Test harness wiring the whole deployer on an in-memory database.
//!
//! Every test gets its own SQLite database, its own data directory and a
//! scripted deployment runner. Jobs never run in the background: tests drive
//! the worker explicitly with [`TestHarness::run_jobs`].

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use deployer::common::AppId;
use deployer::domains::deployment::actions::DeploymentRunner;
use deployer::domains::deployment::models::{Deployment, DeploymentNumber};
use deployer::domains::deployment::{AppsStore, DeploymentsStore, LogSink};
use deployer::kernel::{telemetry, ServerDeps};
use deployer::Config;
use relay::{JobContext, JobStatus};
use sqlx::SqlitePool;
use tempfile::TempDir;
use test_context::AsyncTestContext;
use uuid::Uuid;

/// A deployment the runner was asked to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerCall {
    pub app_id: AppId,
    pub deployment_number: DeploymentNumber,
    pub build_dir: PathBuf,
}

/// Deployment runner succeeding unless told to fail or to hang.
#[derive(Default)]
pub struct ScriptedRunner {
    calls: Mutex<Vec<RunnerCall>>,
    failure: Mutex<Option<String>>,
    hang: AtomicBool,
}

impl ScriptedRunner {
    /// Make every following run fail with `reason`.
    pub fn fail_with(&self, reason: &str) {
        *self.failure.lock().unwrap() = Some(reason.to_string());
    }

    /// Make every following run block forever, ignoring its context.
    pub fn hang(&self) {
        self.hang.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<RunnerCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeploymentRunner for ScriptedRunner {
    async fn run(
        &self,
        _ctx: &JobContext,
        deployment: &Deployment,
        build_dir: &Path,
        logs: &mut LogSink,
    ) -> Result<()> {
        self.calls.lock().unwrap().push(RunnerCall {
            app_id: deployment.id().app_id(),
            deployment_number: deployment.id().number(),
            build_dir: build_dir.to_path_buf(),
        });
        logs.write_line("scripted run").await?;

        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        let failure = self.failure.lock().unwrap().clone();
        if let Some(reason) = failure {
            bail!(reason);
        }
        Ok(())
    }
}

/// Test harness that manages test infrastructure.
///
/// # Example using test-context
///
/// ```ignore
/// use test_context::test_context;
///
/// #[test_context(TestHarness)]
/// #[tokio::test]
/// async fn my_test(ctx: &TestHarness) {
///     let target = insert_target(&ctx.db_pool, "local").await;
///     // ... test code
/// }
/// ```
pub struct TestHarness {
    /// Database pool - use this for test fixtures.
    pub db_pool: SqlitePool,
    pub deps: ServerDeps,
    pub runner: Arc<ScriptedRunner>,
    // Removed on drop
    pub data_dir: TempDir,
}

impl AsyncTestContext for TestHarness {
    async fn setup() -> Self {
        Self::new().await.expect("Failed to create test harness")
    }

    async fn teardown(self) {
        self.db_pool.close().await;
    }
}

impl TestHarness {
    pub async fn new() -> Result<Self> {
        Self::with_config(|_| {}).await
    }

    /// Harness whose test configuration is adjusted by `configure` first.
    pub async fn with_config(configure: impl FnOnce(&mut Config)) -> Result<Self> {
        // Run tests with: RUST_LOG=debug cargo test -- --nocapture
        telemetry::init_for_tests();

        let data_dir = tempfile::tempdir()?;
        let mut config = Config::for_tests(data_dir.path());
        configure(&mut config);
        let runner = Arc::new(ScriptedRunner::default());

        let deps = ServerDeps::build(&config, runner.clone()).await?;

        Ok(Self {
            db_pool: deps.db_pool.clone(),
            deps,
            runner,
            data_dir,
        })
    }

    pub fn apps(&self) -> &AppsStore {
        &self.deps.apps
    }

    pub fn deployments(&self) -> &DeploymentsStore {
        &self.deps.deployments
    }

    /// Process every ready job, returning their final statuses in order.
    pub async fn run_jobs(&self) -> Vec<(Uuid, JobStatus)> {
        self.deps
            .worker
            .drain()
            .await
            .expect("Failed to drain job queue")
    }

    pub fn app_dir(&self, app_id: AppId) -> PathBuf {
        self.data_dir.path().join("apps").join(app_id.to_string())
    }
}
