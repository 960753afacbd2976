//! Typed ID definitions for all domain entities.
//!
//! # Example
//!
//! ```rust
//! use deployer::common::{AppId, TargetId};
//!
//! // These are incompatible types - compiler prevents mixing them up
//! let app_id: AppId = AppId::new();
//! let target_id: TargetId = TargetId::new();
//!
//! // This would be a compile error:
//! // let wrong: TargetId = app_id;
//! ```

pub use super::id::Id;

// ============================================================================
// Entity marker types
// ============================================================================

/// Marker type for App aggregates.
pub struct App;

/// Marker type for deployment targets (hosts apps are deployed onto).
pub struct Target;

/// Marker type for the users issuing commands.
pub struct User;

// ============================================================================
// Type aliases - the primary API
// ============================================================================

/// Typed ID for App aggregates.
pub type AppId = Id<App>;

/// Typed ID for deployment targets.
pub type TargetId = Id<Target>;

/// Typed ID for users.
pub type UserId = Id<User>;
