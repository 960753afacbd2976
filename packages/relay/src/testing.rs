//! Testing utilities for event dispatch.
//!
//! # Feature Flag
//!
//! This module is only available with the `testing` feature:
//!
//! ```toml
//! [dev-dependencies]
//! relay = { path = "../relay", features = ["testing"] }
//! ```
//!
//! # Example
//!
//! ```ignore
//! use relay::testing::RecordingDispatcher;
//!
//! let spy = Arc::new(RecordingDispatcher::new());
//! bus.subscribe(spy.clone()).await;
//!
//! store.write(&mut app).await?;
//!
//! spy.assert_dispatched(&["app.created"]);
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::bus::Dispatcher;
use crate::core::Event;
use crate::error::DispatchError;

/// Spy dispatcher recording the name of every event it receives.
///
/// Optionally fails once it has accepted a given number of events, which
/// simulates a subscriber going down after the transaction committed.
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    names: Mutex<Vec<&'static str>>,
    fail_after: Option<usize>,
    accepted: AtomicUsize,
}

impl RecordingDispatcher {
    /// Create a spy accepting every event.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a spy that accepts `accepted` events and rejects the rest.
    pub fn failing_after(accepted: usize) -> Self {
        Self {
            fail_after: Some(accepted),
            ..Self::default()
        }
    }

    /// Names of the accepted events, in dispatch order.
    pub fn names(&self) -> Vec<&'static str> {
        self.names.lock().unwrap().clone()
    }

    /// Clear recorded names and reset the acceptance counter.
    pub fn clear(&self) {
        self.names.lock().unwrap().clear();
        self.accepted.store(0, Ordering::SeqCst);
    }

    /// Assert the accepted events match `expected` exactly, in order.
    ///
    /// # Panics
    ///
    /// Panics on any difference.
    pub fn assert_dispatched(&self, expected: &[&str]) {
        let names = self.names();
        assert_eq!(
            names, expected,
            "Expected events {:?} to be dispatched, got {:?}",
            expected, names
        );
    }
}

#[async_trait]
impl Dispatcher for RecordingDispatcher {
    async fn dispatch(&self, event: &dyn Event) -> Result<(), DispatchError> {
        let seen = self.accepted.fetch_add(1, Ordering::SeqCst);
        if self.fail_after.is_some_and(|limit| seen >= limit) {
            return Err(DispatchError::Subscriber {
                event: event.name(),
                source: anyhow::anyhow!("recording dispatcher rejected event"),
            });
        }

        self.names.lock().unwrap().push(event.name());
        Ok(())
    }
}
