//! Deployment domain actions - entry-point business logic
//!
//! App use cases are plain functions over the stores. Commands run by jobs
//! sit behind traits so handlers can be built with any implementation.

pub mod app;
pub mod cleanup_app;
pub mod deploy;

pub use app::{
    create_app, queue_deployment, request_app_cleanup, update_app, CreateApp, UpdateApp,
    VersionControlChange,
};
pub use cleanup_app::{CleanupApp, CleanupAppAction, CleanupAppCommand};
pub use deploy::{Deploy, DeployAction, DeployCommand, DeploymentRunner};
