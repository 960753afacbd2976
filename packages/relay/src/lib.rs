//! # Relay
//!
//! Transactional hand-off from aggregates to deduplicated background jobs.
//!
//! ## Core Concepts
//!
//! Relay separates **recording** from **doing**:
//! - [`Event`] = Facts an aggregate recorded while validating an operation
//! - [`Job`] = Work a handler derived from a committed fact
//!
//! The key principle: **Events leave the process only after they committed.**
//! A store projects pending events inside one transaction, commits, then hands
//! them to a [`Dispatcher`] in emission order.
//!
//! ## Architecture
//!
//! ```text
//! Aggregate ── record() ──► pending events
//!     │
//!     ▼ store.write()
//! Transaction (project every event) ── commit
//!     │
//!     ▼ dispatch() in order
//! EventBus ──► JobScheduler
//!                 │
//!                 ├─► HandlerRegistry.prepare(payload)  (first matching guard)
//!                 └─► JobQueue.enqueue(prepared)        (dedupe coalescing)
//!                                  │
//!                                  ▼ dequeue()
//!                             JobWorker ──► Handler.process(ctx, job)
//!                                  │
//!                                  └─► mark_succeeded / mark_failed (retry policy)
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Pending means uncommitted** - an aggregate's pending events are exactly
//!    the ones not yet persisted
//! 2. **Commit before dispatch** - subscribers never see an event whose
//!    transaction rolled back
//! 3. **One pending job per dedupe key** - newer work supersedes older, not-yet-started work
//! 4. **Only the queue retries** - handlers classify failures, they never loop
//!
//! ## Guarantees
//!
//! - **At-least-once dispatch**: a dispatch failure after commit is reported,
//!   re-dispatching is safe because preparing is pure and keys coalesce
//! - **In-memory queue**: jobs do not survive a restart; aggregate status fields
//!   carry durable workflow state

pub mod bus;
pub mod context;
pub mod core;
pub mod error;
pub mod job;
pub mod queue;
pub mod scheduler;
pub mod worker;

#[cfg(feature = "testing")]
pub mod testing;

pub use crate::bus::{Dispatcher, EventBus, NoopDispatcher};
pub use crate::context::JobContext;
pub use crate::core::{Aggregate, Event, EventBuffer};
pub use crate::error::{DispatchError, FailureKind, JobError};
pub use crate::job::{AnyJobData, Handler, HandlerRegistry, Job, JobData, JobStatus, Prepared};
pub use crate::queue::{DeadLetter, EnqueueResult, InMemoryJobQueue, JobQueue, RetryPolicy};
pub use crate::scheduler::JobScheduler;
pub use crate::worker::{JobWorker, JobWorkerConfig};

// Re-export async_trait for convenience
pub use async_trait::async_trait;
