//! Deployment domain - apps, their environments, and their deployments.
//!
//! # Flow
//!
//! ```text
//! action (create_app, queue_deployment, ...)
//!     │
//!     ├─► AppsStore / DeploymentsStore consistency checks
//!     ├─► aggregate operation records events
//!     └─► store.write()  ──► projections (one transaction) ──► EventBus
//!                                                               │
//!                                   JobScheduler ◄──────────────┘
//!                                       │ prepare (DeployHandler, CleanupAppHandler)
//!                                       ▼
//!                               InMemoryJobQueue ──► JobWorker ──► DeployAction / CleanupAppAction
//! ```

pub mod actions;
pub mod artifact;
pub mod data;
pub mod errors;
pub mod events;
pub mod jobs;
pub mod models;

pub use artifact::{ArtifactManager, LocalArtifactManager, LogSink};
pub use data::{AppsStore, DeploymentsStore};
pub use errors::{AppError, CommandError, StoreError};
pub use events::{AppEvent, DeploymentEvent};
pub use models::{App, Deployment};
