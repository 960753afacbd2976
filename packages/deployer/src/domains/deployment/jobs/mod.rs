//! Job handlers of the deployment domain.
//!
//! Registration order is claim order: see `ServerDeps::build`.

pub mod cleanup_app;
pub mod deploy;

pub use cleanup_app::{CleanupAppData, CleanupAppHandler, CLEANUP_APP_JOB};
pub use deploy::{DeployData, DeployHandler, DEPLOY_JOB};
