//! Kernel module - persistence plumbing, logging and dependency wiring.

pub mod db;
pub mod deps;
pub mod telemetry;
pub mod writer;

pub use deps::ServerDeps;
pub use writer::{AggregateWriter, Projection};
