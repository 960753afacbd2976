//! Build directories and deployment logs on the local filesystem.
//!
//! ```text
//! {data_dir}/apps/{app_id}/
//!     deployments/{number}/   build directory, recreated on every run
//!     logs/{number}.log       deployment log
//! ```

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use relay::JobContext;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, Span};

use crate::common::AppId;
use crate::domains::deployment::models::Deployment;

/// Where deployments are built and where their logs go.
///
/// Both operations stop between filesystem steps once `ctx` is stopped.
#[async_trait]
pub trait ArtifactManager: Send + Sync {
    /// Create a fresh build directory for `deployment` and open its log.
    async fn prepare_build(
        &self,
        ctx: &JobContext,
        deployment: &Deployment,
    ) -> Result<(PathBuf, LogSink)>;

    /// Remove everything stored for `app_id`. Nothing to remove is not an error.
    async fn cleanup(&self, ctx: &JobContext, app_id: AppId) -> Result<()>;
}

/// Append-only deployment log.
pub struct LogSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl LogSink {
    pub async fn create(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await
    }

    /// Flush buffered lines to disk.
    pub async fn close(mut self) -> io::Result<()> {
        self.writer.flush().await?;
        self.writer.into_inner().sync_all().await
    }
}

impl std::fmt::Debug for LogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSink").field("path", &self.path).finish()
    }
}

pub struct LocalArtifactManager {
    data_dir: PathBuf,
    span: Span,
}

impl LocalArtifactManager {
    pub fn new(data_dir: impl Into<PathBuf>, span: Span) -> Self {
        Self {
            data_dir: data_dir.into(),
            span,
        }
    }

    fn app_dir(&self, app_id: AppId) -> PathBuf {
        self.data_dir.join("apps").join(app_id.to_string())
    }
}

#[async_trait]
impl ArtifactManager for LocalArtifactManager {
    async fn prepare_build(
        &self,
        ctx: &JobContext,
        deployment: &Deployment,
    ) -> Result<(PathBuf, LogSink)> {
        ctx.check()?;

        let id = deployment.id();
        let app_dir = self.app_dir(id.app_id());
        let build_dir = app_dir.join("deployments").join(id.number().to_string());
        let logs_dir = app_dir.join("logs");

        // Leftovers from a previous attempt of the same deployment.
        match fs::remove_dir_all(&build_dir).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => {
                return Err(e).with_context(|| {
                    format!("Failed to clear build directory {}", build_dir.display())
                });
            }
            _ => {}
        }
        ctx.check()?;

        fs::create_dir_all(&build_dir)
            .await
            .with_context(|| format!("Failed to create build directory {}", build_dir.display()))?;
        fs::create_dir_all(&logs_dir)
            .await
            .with_context(|| format!("Failed to create logs directory {}", logs_dir.display()))?;

        let log_path = logs_dir.join(format!("{}.log", id.number()));
        let logs = LogSink::create(&log_path)
            .await
            .with_context(|| format!("Failed to open deployment log {}", log_path.display()))?;

        debug!(
            parent: &self.span,
            app_id = %id.app_id(),
            deployment_number = %id.number(),
            build_dir = %build_dir.display(),
            "build directory prepared"
        );

        Ok((build_dir, logs))
    }

    async fn cleanup(&self, ctx: &JobContext, app_id: AppId) -> Result<()> {
        ctx.check()?;

        let app_dir = self.app_dir(app_id);

        match fs::remove_dir_all(&app_dir).await {
            Ok(()) => {
                info!(parent: &self.span, app_id = %app_id, "app artifacts removed");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| {
                format!("Failed to remove app directory {}", app_dir.display())
            }),
        }
    }
}
