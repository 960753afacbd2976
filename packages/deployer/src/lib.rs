// Deployment orchestration core
//
// Domain changes on apps and deployments become durable relational state
// through an event-sourced writer; committed events are turned into
// deduplicated jobs processed by a worker pool.
//
// Event dispatch and job execution live in the `relay` crate.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;

pub use config::*;
