// Common types and utilities shared across the application

pub mod action;
pub mod entity_ids;
pub mod id;

pub use action::Action;
pub use entity_ids::*;
pub use id::Id;
