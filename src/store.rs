//! Contains the Event Store abstractions: [Streamer] to read the Event Log,
//! [Appender] to conditionally append to it, and the [InMemory] implementation
//! backed by a thread-safe [Vec].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{iter, BoxStream, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::condition::{AppendCondition, Violation};
use crate::cursor::{Cursor, SequenceNumber, TransactionId};
use crate::event::{self, AppendEvent, StoredEvent};
use crate::query::Query;

/// Specifies the slice of the Event Log to select when calling [`Streamer::stream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Select {
    /// Selects all the matching events in the Event Log.
    All,

    /// Selects the matching events ordered strictly after the given [Cursor].
    After(Cursor),
}

impl Select {
    /// Returns the lower bound of the selection, [Cursor::zero] for [Select::All].
    pub fn cursor(&self) -> Cursor {
        match self {
            Select::All => Cursor::zero(),
            Select::After(cursor) => *cursor,
        }
    }
}

impl From<Cursor> for Select {
    fn from(cursor: Cursor) -> Self {
        if cursor.is_zero() {
            Select::All
        } else {
            Select::After(cursor)
        }
    }
}

/// Error returned by the [Stream] opened with [`Streamer::stream`].
#[derive(Debug, thiserror::Error)]
#[error("failed to stream events from the event log: {0}")]
pub struct StreamError(#[from] pub anyhow::Error);

/// Stream of [StoredEvent]s, in `(transaction_id, position)` order.
pub type Stream<'a> = BoxStream<'a, Result<StoredEvent, StreamError>>;

/// Interface used to read [StoredEvent]s from the Event Log.
pub trait Streamer: Send + Sync {
    /// Opens a forward-only stream over the events matching the [Query],
    /// within the selected slice of the Event Log.
    ///
    /// Only events from committed transactions are ever returned.
    fn stream(&self, query: &Query, select: Select) -> Stream<'_>;
}

/// All possible error types returned by [`Appender::append_if`].
#[derive(Debug, thiserror::Error)]
pub enum AppendError {
    /// The [AppendCondition] did not hold: nothing has been written.
    #[error("append condition violated: {0}")]
    Violation(#[from] Violation),
    /// One of the events to append is malformed.
    #[error("invalid event: {0}")]
    Invalid(#[from] event::ValidationError),
    /// The batch to append is empty.
    #[error("no events to append")]
    NoEvents,
    /// The [Appender] implementation has encountered an error.
    #[error("failed to append new events, an error occurred: {0}")]
    Internal(#[from] anyhow::Error),
}

/// A command recorded in the command log next to the events it produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRecord {
    /// The command type, e.g. `deposit`.
    pub command_type: String,
    /// The serialized command.
    pub payload: Vec<u8>,
}

/// A [CommandRecord] that has been committed, keyed by its transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCommand {
    /// The command type.
    pub command_type: String,
    /// The serialized command.
    pub payload: Vec<u8>,
    /// Commit token of the transaction that executed the command.
    pub transaction_id: TransactionId,
    /// When the command was recorded.
    pub occurred_at: DateTime<Utc>,
}

#[async_trait]
/// Interface used to append new events to the Event Log, subject to an [AppendCondition].
pub trait Appender: Send + Sync {
    /// Atomically checks the [AppendCondition] and, if it holds, appends all
    /// the events as one batch, together with the optional [CommandRecord].
    ///
    /// Checking and inserting is indivisible with respect to any other append.
    /// On success, returns the [Cursor] of the last appended event, which
    /// carries the commit token of the transaction.
    async fn append_command_if(
        &self,
        command: Option<CommandRecord>,
        events: Vec<AppendEvent>,
        condition: AppendCondition,
    ) -> Result<Cursor, AppendError>;

    /// Same as [`Appender::append_command_if`], with no command to record.
    async fn append_if(
        &self,
        events: Vec<AppendEvent>,
        condition: AppendCondition,
    ) -> Result<Cursor, AppendError> {
        self.append_command_if(None, events, condition).await
    }
}

/// An Event Store, used to read from and conditionally append to the Event Log.
pub trait Store: Streamer + Appender + Send + Sync {}

impl<T> Store for T where T: Streamer + Appender + Send + Sync {}

#[derive(Debug, Default)]
struct InMemoryBackend {
    events: Vec<StoredEvent>,
    commands: Vec<StoredCommand>,
    last_transaction_id: TransactionId,
}

impl InMemoryBackend {
    fn count_matching(&self, query: &Query, after: Option<&Cursor>) -> u64 {
        self.events
            .iter()
            .filter(|event| after.map_or(true, |cursor| event.cursor() > *cursor))
            .filter(|event| query.matches(*event))
            .count() as u64
    }

    fn last_position(&self) -> SequenceNumber {
        self.events
            .last()
            .map(|event| event.position)
            .unwrap_or_default()
    }
}

/// In-memory implementation of the [Store] trait,
/// backed by a thread-safe [`Vec`].
///
/// Every append runs under the backend write lock, so transactions commit
/// in the order their ids are assigned.
#[derive(Debug, Clone, Default)]
pub struct InMemory {
    backend: Arc<RwLock<InMemoryBackend>>,
}

impl InMemory {
    /// Returns the command log recorded so far.
    pub fn commands(&self) -> Vec<StoredCommand> {
        self.backend.read().commands.clone()
    }

    /// Returns the number of events in the Event Log.
    pub fn len(&self) -> usize {
        self.backend.read().events.len()
    }

    /// Returns true if the Event Log is empty.
    pub fn is_empty(&self) -> bool {
        self.backend.read().events.is_empty()
    }
}

impl Streamer for InMemory {
    fn stream(&self, query: &Query, select: Select) -> Stream<'_> {
        let after = select.cursor();
        let events: Vec<StoredEvent> = self
            .backend
            .read()
            .events
            .iter()
            .filter(|event| event.cursor() > after && query.matches(*event))
            .cloned()
            .collect();

        iter(events).map(Ok).boxed()
    }
}

#[async_trait]
impl Appender for InMemory {
    async fn append_command_if(
        &self,
        command: Option<CommandRecord>,
        events: Vec<AppendEvent>,
        condition: AppendCondition,
    ) -> Result<Cursor, AppendError> {
        if events.is_empty() {
            return Err(AppendError::NoEvents);
        }

        event::validate_all(&events)?;

        let mut backend = self.backend.write();

        let state_changed_count =
            backend.count_matching(&condition.state_changed, Some(&condition.after_cursor));

        let already_exists_count = condition
            .already_exists
            .as_ref()
            .map_or(0, |query| backend.count_matching(query, None));

        if let Some(violation) =
            Violation::from_counts(&condition, state_changed_count, already_exists_count)
        {
            return Err(AppendError::Violation(violation));
        }

        let transaction_id = TransactionId(backend.last_transaction_id.0 + 1);
        let occurred_at = Utc::now();
        let mut position = backend.last_position();

        let mut persisted_events: Vec<StoredEvent> = events
            .into_iter()
            .map(|event| {
                position = position.next();
                StoredEvent::persisted(event, transaction_id, position, occurred_at)
            })
            .collect();

        backend.last_transaction_id = transaction_id;
        backend.events.append(&mut persisted_events);

        if let Some(command) = command {
            backend.commands.push(StoredCommand {
                command_type: command.command_type,
                payload: command.payload,
                transaction_id,
                occurred_at,
            });
        }

        Ok(Cursor::new(transaction_id, position, occurred_at))
    }
}

/// Decorator type for a [Store] implementation that tracks the list of
/// events successfully appended through it.
///
/// Useful for testing purposes, i.e. asserting that the events written
/// through this Event Store instance are the ones expected.
#[derive(Debug, Clone)]
pub struct Tracking<T>
where
    T: Store,
{
    store: T,
    events: Arc<RwLock<Vec<AppendEvent>>>,
}

impl<T> Tracking<T>
where
    T: Store,
{
    /// Returns the list of events appended through this decorator so far.
    pub fn recorded_events(&self) -> Vec<AppendEvent> {
        self.events.read().clone()
    }

    /// Resets the list of recorded events.
    pub fn reset_recorded_events(&self) {
        self.events.write().clear();
    }
}

impl<T> Streamer for Tracking<T>
where
    T: Store,
{
    fn stream(&self, query: &Query, select: Select) -> Stream<'_> {
        self.store.stream(query, select)
    }
}

#[async_trait]
impl<T> Appender for Tracking<T>
where
    T: Store,
{
    async fn append_command_if(
        &self,
        command: Option<CommandRecord>,
        events: Vec<AppendEvent>,
        condition: AppendCondition,
    ) -> Result<Cursor, AppendError> {
        let cursor = self
            .store
            .append_command_if(command, events.clone(), condition)
            .await?;

        self.events.write().extend(events);

        Ok(cursor)
    }
}

/// Extension trait that can be used to pull in supertypes implemented
/// in this module.
pub trait EventStoreExt: Store + Sized {
    /// Returns a [Tracking] instance that decorates the original [Store]
    /// instance this method has been called on.
    fn with_recorded_events_tracking(self) -> Tracking<Self> {
        Tracking {
            store: self,
            events: Arc::default(),
        }
    }
}

impl<T> EventStoreExt for T where T: Store {}
