//! Error types for the deployment domain.
//!
//! Three layers, mirroring who owns the failure:
//! - [`AppError`] - domain rejections, raised by aggregates before any event is recorded
//! - [`StoreError`] - persistence and post-commit dispatch failures
//! - [`CommandError`] - what a command returns to its caller (usually a job handler)

use relay::DispatchError;
use thiserror::Error;

use crate::common::TargetId;

/// A domain rule refused the operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AppError {
    #[error("invalid app name {0:?}: use lowercase letters, digits and inner hyphens")]
    InvalidName(String),

    #[error("app name is already taken on target {target}")]
    NameAlreadyTaken { target: TargetId },

    #[error("target {target} does not exist or is being cleaned up")]
    TargetNotFound { target: TargetId },

    #[error("an environment configuration is required")]
    ConfigRequired,

    #[error("app cleanup has been requested")]
    CleanupRequested,

    #[error("app cleanup has not been requested")]
    CleanupNotRequested,

    #[error("deployment has already started")]
    DeploymentAlreadyStarted,

    #[error("deployment is not running")]
    DeploymentNotRunning,

    #[error("deployment failed: {0}")]
    DeploymentFailed(String),
}

/// Persistence failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found")]
    NotFound { entity: &'static str },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The transaction committed but some events never reached subscribers.
    ///
    /// The persisted state is correct. Re-dispatching is safe: preparing a job
    /// is pure and dedupe keys coalesce duplicates.
    #[error("committed but {pending} event(s) undispatched after {dispatched}: {source}")]
    Undispatched {
        /// Events handed to subscribers before the failure.
        dispatched: usize,
        /// Events never handed over, the failing one included.
        pending: usize,
        #[source]
        source: DispatchError,
    },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Failure of a domain command.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Rejected(#[from] AppError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("artifact error: {0}")]
    Artifact(#[source] anyhow::Error),

    #[error("command cancelled")]
    Cancelled,
}

impl CommandError {
    /// Whether the failure comes from infrastructure and may go away on retry.
    ///
    /// Rejections and missing rows are business outcomes: retrying would
    /// reach the same verdict.
    pub fn is_infra(&self) -> bool {
        match self {
            CommandError::Rejected(_) | CommandError::Cancelled => false,
            CommandError::Store(e) => !e.is_not_found(),
            CommandError::Artifact(_) => true,
        }
    }
}
