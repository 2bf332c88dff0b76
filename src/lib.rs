//! `dcb` is an event store implementing the Dynamic Consistency Boundary
//! pattern: an append-only log of immutable, tagged events, queried by
//! arbitrary type/tag predicates.
//!
//! Consistency is not enforced through per-aggregate streams and versions:
//! a command handler reads its decision model with a [Query], and the very
//! same query, bound to the [Cursor] the read stopped at, becomes the
//! [AppendCondition] checked atomically when the new events are appended.
//!
//! ## Building blocks
//!
//! * [Tag], [Query] and [QueryItem] select events by type and tags;
//! * [AppendEvent] and [StoredEvent] are the records of the Event Log;
//! * [Cursor] marks a place in the log, ordered by `(transaction_id, position)`;
//! * [Streamer] and [Appender] are the Event [Store] interfaces,
//!   [InMemory] an in-process implementation;
//! * [`projection`] folds events into a decision model;
//! * [`command`] executes commands, telling duplicates from conflicts.

#![deny(unsafe_code, unused_qualifications, trivial_casts)]
#![warn(missing_docs)]

pub mod command;
pub mod condition;
pub mod cursor;
pub mod event;
pub mod projection;
pub mod query;
pub mod serde;
pub mod store;
pub mod tag;
pub mod tracing;

pub use crate::command::{Command, CommandResult, ExecutionResult, Executor, Handler, Outcome};
pub use crate::condition::{AppendCondition, Violation, ViolationKind};
pub use crate::cursor::{Cursor, SequenceNumber, TransactionId};
pub use crate::event::{AppendEvent, Message, StoredEvent, Tagged};
pub use crate::projection::{ProjectionResult, StateProjector};
pub use crate::query::{Query, QueryItem};
pub use crate::store::{AppendError, Appender, InMemory, Select, Store, Streamer};
pub use crate::tag::Tag;
