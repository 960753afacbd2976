//! Aggregate writer - persists pending events as relational projections.
//!
//! # Write Flow
//!
//! ```text
//! write(&mut [aggregates])
//!     │
//!     ├─► BEGIN
//!     ├─► for each aggregate, for each pending event (emission order)
//!     │       └─► event.project(tx)      any failure → ROLLBACK, events stay pending
//!     ├─► COMMIT
//!     ├─► take_events()                  aggregates are clean from here on
//!     └─► dispatch each event in order   failure → StoreError::Undispatched
//! ```
//!
//! Persisting and dispatching fail differently: a persistence error means
//! nothing of the batch is visible, a dispatch error means everything is.

use std::sync::Arc;

use async_trait::async_trait;
use relay::{Aggregate, Dispatcher, Event};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, error};

use crate::domains::deployment::errors::StoreError;

/// Maps one event onto the rows it changes.
///
/// Implementations select the statement from the event variant alone and only
/// ever filter on the aggregate's own identity.
#[async_trait]
pub trait Projection {
    async fn project(&self, conn: &mut SqliteConnection) -> Result<(), sqlx::Error>;
}

#[derive(Clone)]
pub struct AggregateWriter {
    pool: SqlitePool,
    dispatcher: Arc<dyn Dispatcher>,
}

impl AggregateWriter {
    pub fn new(pool: SqlitePool, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self { pool, dispatcher }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Persist the pending events of `aggregates` in one transaction, then
    /// dispatch them.
    pub async fn write<A>(&self, aggregates: &mut [&mut A]) -> Result<(), StoreError>
    where
        A: Aggregate,
        A::Event: Projection,
    {
        let mut tx = self.pool.begin().await?;

        for aggregate in aggregates.iter() {
            for event in aggregate.pending_events() {
                debug!(event = event.name(), "projecting event");
                event.project(&mut *tx).await?;
            }
        }

        tx.commit().await?;

        let events: Vec<A::Event> = aggregates
            .iter_mut()
            .flat_map(|aggregate| aggregate.take_events())
            .collect();

        self.dispatch(&events).await
    }

    async fn dispatch<E: Event>(&self, events: &[E]) -> Result<(), StoreError> {
        for (dispatched, event) in events.iter().enumerate() {
            if let Err(source) = self.dispatcher.dispatch(event).await {
                let pending = events.len() - dispatched;
                error!(
                    event = event.name(),
                    dispatched,
                    pending,
                    error = %source,
                    "events committed but not dispatched"
                );
                return Err(StoreError::Undispatched {
                    dispatched,
                    pending,
                    source,
                });
            }
        }

        Ok(())
    }
}
