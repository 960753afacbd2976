//! Server dependencies - the wired object graph of the deployer.
//!
//! Stores write through a shared [`EventBus`]; the job scheduler subscribes to
//! it once the handlers, which need the stores, exist.

use std::sync::Arc;

use anyhow::{Context, Result};
use relay::{
    EventBus, HandlerRegistry, InMemoryJobQueue, JobScheduler, JobWorker, JobWorkerConfig,
    RetryPolicy,
};
use sqlx::SqlitePool;
use tracing::info;

use crate::config::Config;
use crate::domains::deployment::actions::{CleanupAppAction, DeployAction, DeploymentRunner};
use crate::domains::deployment::artifact::{ArtifactManager, LocalArtifactManager};
use crate::domains::deployment::data::{AppsStore, DeploymentsStore};
use crate::domains::deployment::jobs::{
    CleanupAppHandler, DeployHandler, CLEANUP_APP_JOB, DEPLOY_JOB,
};
use crate::kernel::{db, writer::AggregateWriter};

// =============================================================================
// ServerDeps
// =============================================================================

#[derive(Clone)]
pub struct ServerDeps {
    pub db_pool: SqlitePool,
    pub bus: Arc<EventBus>,
    pub apps: AppsStore,
    pub deployments: DeploymentsStore,
    pub artifacts: Arc<dyn ArtifactManager>,
    /// Handlers in claim order
    pub registry: Arc<HandlerRegistry>,
    pub queue: Arc<InMemoryJobQueue>,
    /// Not started; call `worker.clone().run(shutdown)`
    pub worker: JobWorker,
}

impl ServerDeps {
    /// Connect to the configured database, migrate it, and wire everything.
    pub async fn build(config: &Config, runner: Arc<dyn DeploymentRunner>) -> Result<Self> {
        tokio::fs::create_dir_all(&config.data_dir)
            .await
            .with_context(|| format!("Failed to create data directory {}", config.data_dir.display()))?;

        info!(database_url = %config.database_url, "connecting to database");
        let pool = db::connect(&config.database_url).await?;
        db::migrate(&pool).await?;
        info!("migrations complete");

        Ok(Self::from_pool(pool, config, runner).await)
    }

    /// Wire everything on top of an already migrated pool.
    pub async fn from_pool(
        db_pool: SqlitePool,
        config: &Config,
        runner: Arc<dyn DeploymentRunner>,
    ) -> Self {
        let bus = Arc::new(EventBus::new());
        let writer = AggregateWriter::new(db_pool.clone(), bus.clone());
        let apps = AppsStore::new(writer.clone());
        let deployments = DeploymentsStore::new(writer);

        let artifacts: Arc<dyn ArtifactManager> = Arc::new(LocalArtifactManager::new(
            &config.data_dir,
            tracing::info_span!("artifacts"),
        ));

        let deploy = DeployAction::new(deployments.clone(), artifacts.clone(), runner);
        let cleanup = CleanupAppAction::new(apps.clone(), artifacts.clone());

        let mut registry = HandlerRegistry::new();
        registry
            .register(DeployHandler::new(
                tracing::info_span!("job", kind = DEPLOY_JOB),
                Arc::new(deploy),
            ))
            .register(CleanupAppHandler::new(
                tracing::info_span!("job", kind = CLEANUP_APP_JOB),
                Arc::new(cleanup),
            ));
        let registry = Arc::new(registry);

        let queue = Arc::new(InMemoryJobQueue::with_retry_policy(RetryPolicy {
            max_attempts: config.job_max_attempts,
            base_delay: config.job_retry_base_delay,
            ..Default::default()
        }));

        bus.subscribe(Arc::new(JobScheduler::new(registry.clone(), queue.clone())))
            .await;

        let worker = JobWorker::with_config(
            queue.clone(),
            registry.clone(),
            JobWorkerConfig {
                concurrency: config.worker_concurrency,
                poll_interval: config.worker_poll_interval,
                job_timeout: config.job_timeout,
                stop_grace: config.job_stop_grace,
                ..Default::default()
            },
        );

        Self {
            db_pool,
            bus,
            apps,
            deployments,
            artifacts,
            registry,
            queue,
            worker,
        }
    }
}
