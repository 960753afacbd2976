//! Core traits for events and the aggregates that record them.
//!
//! # Overview
//!
//! - [`Event`] = a fact recorded by an aggregate operation
//! - [`Aggregate`] = a consistency boundary buffering events until they are written
//!
//! Events are closed enums, one per aggregate. Each variant wraps a plain struct
//! carrying every field its projection needs. [`Event::payload`] exposes that
//! struct type-erased so job handlers can claim the shapes they own without
//! knowing the enclosing enum.

use std::any::Any;
use std::fmt;

/// A fact produced by a domain mutation.
///
/// # Example
///
/// ```ignore
/// #[derive(Debug, Clone)]
/// enum OrderEvent {
///     Placed(OrderPlaced),
///     Shipped(OrderShipped),
/// }
///
/// impl Event for OrderEvent {
///     fn name(&self) -> &'static str {
///         match self {
///             OrderEvent::Placed(_) => "order.placed",
///             OrderEvent::Shipped(_) => "order.shipped",
///         }
///     }
///
///     fn payload(&self) -> &(dyn Any + Send + Sync) {
///         match self {
///             OrderEvent::Placed(e) => e,
///             OrderEvent::Shipped(e) => e,
///         }
///     }
/// }
/// ```
pub trait Event: fmt::Debug + Send + Sync + 'static {
    /// Stable name of the variant, used in logs and error reports.
    fn name(&self) -> &'static str;

    /// The variant's own fact, type-erased for handler guards.
    fn payload(&self) -> &(dyn Any + Send + Sync);
}

/// An in-memory object accumulating pending events from its operations.
///
/// Writers read [`pending_events`](Aggregate::pending_events) inside their
/// transaction and only [`take_events`](Aggregate::take_events) once the
/// transaction committed, so a failed write leaves the aggregate untouched.
pub trait Aggregate: Send + Sync {
    /// The closed set of events this aggregate emits.
    type Event: Event;

    /// Events recorded since the last successful write, in emission order.
    fn pending_events(&self) -> &[Self::Event];

    /// Drain the pending events, preserving emission order.
    fn take_events(&mut self) -> Vec<Self::Event>;
}

/// Ordered buffer of events an aggregate recorded but nobody persisted yet.
#[derive(Clone, PartialEq, Eq)]
pub struct EventBuffer<E> {
    events: Vec<E>,
}

impl<E> EventBuffer<E> {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Append an event after every previously recorded one.
    pub fn record(&mut self, event: E) {
        self.events.push(event);
    }

    pub fn as_slice(&self) -> &[E] {
        &self.events
    }

    pub fn drain(&mut self) -> Vec<E> {
        std::mem::take(&mut self.events)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl<E> Default for EventBuffer<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: fmt::Debug> fmt::Debug for EventBuffer<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.events).finish()
    }
}
