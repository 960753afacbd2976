pub mod app;
pub mod deployment;
pub mod environment;
pub mod requirement;

pub use app::App;
pub use deployment::{
    ConfigSnapshot, Deployment, DeploymentId, DeploymentNumber, DeploymentState, DeploymentStatus,
};
pub use environment::{AppName, EnvVars, Environment, EnvironmentConfig, VersionControl};
pub use requirement::EnvironmentConfigRequirement;
