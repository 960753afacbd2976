use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::UserId;

/// Audit record of who did something, and when.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub at: DateTime<Utc>,
    pub by: UserId,
}

impl Action {
    /// An action performed by `by`, now.
    pub fn new(by: UserId) -> Self {
        Self { at: Utc::now(), by }
    }

    pub fn from_parts(at: DateTime<Utc>, by: UserId) -> Self {
        Self { at, by }
    }
}
