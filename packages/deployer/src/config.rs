use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Root of the build directories and deployment logs
    pub data_dir: PathBuf,
    pub worker_concurrency: usize,
    pub worker_poll_interval: Duration,
    /// Upper bound for one job execution, none when unset
    pub job_timeout: Option<Duration>,
    /// Time a stopped job gets to record its outcome before it is dropped
    pub job_stop_grace: Duration,
    pub job_max_attempts: u32,
    pub job_retry_base_delay: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://data/deployer.db?mode=rwc".to_string()),
            data_dir: env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data")),
            worker_concurrency: parse_var("WORKER_CONCURRENCY", 4)
                .context("WORKER_CONCURRENCY must be a valid number")?,
            worker_poll_interval: parse_var("WORKER_POLL_INTERVAL_MS", 1000)
                .map(Duration::from_millis)
                .context("WORKER_POLL_INTERVAL_MS must be a valid number")?,
            job_timeout: env::var("JOB_TIMEOUT_SECS")
                .ok()
                .map(|secs| secs.parse().map(Duration::from_secs))
                .transpose()
                .context("JOB_TIMEOUT_SECS must be a valid number")?,
            job_stop_grace: parse_var("JOB_STOP_GRACE_SECS", 30)
                .map(Duration::from_secs)
                .context("JOB_STOP_GRACE_SECS must be a valid number")?,
            job_max_attempts: parse_var("JOB_MAX_ATTEMPTS", 3)
                .context("JOB_MAX_ATTEMPTS must be a valid number")?,
            job_retry_base_delay: parse_var("JOB_RETRY_BASE_DELAY_MS", 1000)
                .map(Duration::from_millis)
                .context("JOB_RETRY_BASE_DELAY_MS must be a valid number")?,
        })
    }

    /// In-memory database, artifacts under `data_dir`, immediate retries.
    pub fn for_tests(data_dir: impl AsRef<Path>) -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            data_dir: data_dir.as_ref().to_path_buf(),
            worker_concurrency: 1,
            worker_poll_interval: Duration::from_millis(10),
            job_timeout: None,
            job_stop_grace: Duration::from_secs(5),
            job_max_attempts: 3,
            job_retry_base_delay: Duration::ZERO,
        }
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => Ok(value.parse()?),
        Err(_) => Ok(default),
    }
}
