pub mod apps_store;
pub mod deployments_store;

pub use apps_store::AppsStore;
pub use deployments_store::DeploymentsStore;
