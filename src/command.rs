//! Module containing the command execution layer.
//!
//! A command goes through `Validate → Handle → Append → Classify`:
//!
//! 1. the command type must be non-empty and have a registered [Handler];
//! 2. the [Handler] builds its decision model through the
//!    [projection engine][crate::projection] and returns a [CommandResult]:
//!    the events to append and the [AppendCondition] derived from its read;
//! 3. the events are appended with [`Appender::append_command_if`];
//! 4. a [Violation] explained by the `already_exists` query alone is a
//!    duplicate, absorbed as an [Outcome::Idempotent] result, unless the
//!    command type is configured to reject duplicates. Any other
//!    [Violation] is surfaced as [Error::Concurrency].
//!
//! Nothing is retried here: on [Error::Concurrency] the caller is expected
//! to run the whole cycle again, reading fresh state.

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::condition::{AppendCondition, Violation};
use crate::cursor::Cursor;
use crate::event::{self, AppendEvent};
use crate::query::Query;
use crate::store::{AppendError, Appender, CommandRecord, Store, Streamer};

pub mod test;

/// Reason attached to idempotent results, unless the handler supplies its own.
pub const DUPLICATE_OPERATION: &str = "DUPLICATE_OPERATION";

/// A command that can be executed by an [Executor].
///
/// Commands are serialized into the command log next to the events they produce.
pub trait Command: Serialize + Send + Sync {
    /// Returns the command type used to look up its [Handler], e.g. `deposit`.
    fn command_type(&self) -> &str;
}

/// What a [Handler] decided: the events to append, guarded by a condition.
///
/// An empty list of events means the handler recognized, from its decision
/// model alone, that the command was already executed: nothing is appended
/// and the execution is [Outcome::Idempotent].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Events to append, in order.
    pub events: Vec<AppendEvent>,
    /// Condition under which the events may be appended.
    pub condition: AppendCondition,
    /// Optional explanation, used for idempotent results.
    pub reason: Option<String>,
}

impl CommandResult {
    /// Creates a result appending the given events under the given condition.
    pub fn new(events: Vec<AppendEvent>, condition: AppendCondition) -> Self {
        Self {
            events,
            condition,
            reason: None,
        }
    }

    /// Creates a result that appends nothing: the command is a duplicate.
    pub fn idempotent() -> Self {
        Self {
            events: Vec::new(),
            condition: AppendCondition::new(Query::all()),
            reason: None,
        }
    }

    /// Sets the explanation of the result.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Whether an execution appended new events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// New events were appended.
    Created,
    /// The command had already been executed: nothing was appended.
    Idempotent,
}

/// The successful outcome of an [Executor::execute] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Whether new events were appended.
    pub outcome: Outcome,
    /// Explanation of an idempotent outcome.
    pub reason: Option<String>,
    /// Cursor of the last appended event, for [Outcome::Created] results.
    pub cursor: Option<Cursor>,
}

impl ExecutionResult {
    fn created(cursor: Cursor) -> Self {
        Self {
            outcome: Outcome::Created,
            reason: None,
            cursor: Some(cursor),
        }
    }

    fn idempotent(reason: Option<String>) -> Self {
        Self {
            outcome: Outcome::Idempotent,
            reason: Some(reason.unwrap_or_else(|| DUPLICATE_OPERATION.to_owned())),
            cursor: None,
        }
    }

    /// Returns true if the command was a duplicate and nothing was appended.
    pub fn was_idempotent(&self) -> bool {
        self.outcome == Outcome::Idempotent
    }

    /// Returns true if new events were appended.
    pub fn was_created(&self) -> bool {
        self.outcome == Outcome::Created
    }
}

/// All possible errors returned by [Executor::execute].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The command, or one of the events it produced, is malformed.
    /// Never retryable: it is a caller or programming defect.
    #[error("invalid command: {0}")]
    InvalidCommand(String),
    /// The decision model changed since it was read, or a duplicate was
    /// detected for a command type that must not absorb duplicates.
    /// The caller may retry the whole command with fresh state.
    #[error("concurrency conflict: {0}")]
    Concurrency(Violation),
    /// The [Handler] failed.
    #[error("command handler failed: {0}")]
    Handler(#[source] anyhow::Error),
    /// The Event Store failed.
    #[error("event store failed: {0}")]
    Store(#[source] anyhow::Error),
}

impl Error {
    /// Returns the [Violation] of an [Error::Concurrency] error.
    pub fn violation(&self) -> Option<&Violation> {
        match self {
            Error::Concurrency(violation) => Some(violation),
            _ => None,
        }
    }
}

#[async_trait]
/// Decides which events a command produces.
///
/// A handler reads its decision model from the [Streamer] it is given,
/// usually through [`crate::projection::decision_model`], and derives the
/// [AppendCondition] from that same read.
pub trait Handler<C>: Send + Sync
where
    C: Command,
{
    /// Handles the command.
    async fn handle(&self, store: &dyn Streamer, command: &C) -> anyhow::Result<CommandResult>;
}

/// Executes [Command]s against a [Store], classifying append violations
/// into duplicates or conflicts.
pub struct Executor<C, S>
where
    C: Command,
    S: Store,
{
    store: S,
    handlers: HashMap<String, Arc<dyn Handler<C>>>,
    conflict_on_duplicate: HashSet<String>,
}

impl<C, S> Executor<C, S>
where
    C: Command,
    S: Store,
{
    /// Creates an [Executor] with no registered handlers.
    pub fn new(store: S) -> Self {
        Self {
            store,
            handlers: HashMap::new(),
            conflict_on_duplicate: HashSet::new(),
        }
    }

    /// Registers the [Handler] for a command type, replacing any previous one.
    #[must_use]
    pub fn with_handler<H>(mut self, command_type: impl Into<String>, handler: H) -> Self
    where
        H: Handler<C> + 'static,
    {
        self.handlers.insert(command_type.into(), Arc::new(handler));
        self
    }

    /// Marks a command type whose duplicates must always surface as
    /// [Error::Concurrency], e.g. opening an account: two attempts may carry
    /// different payloads and silently keeping the first would hide a bug.
    #[must_use]
    pub fn with_conflict_on_duplicate(mut self, command_type: impl Into<String>) -> Self {
        self.conflict_on_duplicate.insert(command_type.into());
        self
    }

    /// Returns the underlying [Store].
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Executes the command with the [Handler] registered for its type.
    pub async fn execute(&self, command: &C) -> Result<ExecutionResult, Error> {
        let command_type = validate_command_type(command)?;

        let handler = self.handlers.get(command_type).cloned().ok_or_else(|| {
            Error::InvalidCommand(format!(
                "no handler registered for command type '{command_type}'"
            ))
        })?;

        self.run(command, handler.as_ref()).await
    }

    /// Executes the command with the given [Handler], regardless of the
    /// handlers registered. Useful to inject a handler in tests.
    pub async fn execute_with(
        &self,
        command: &C,
        handler: &dyn Handler<C>,
    ) -> Result<ExecutionResult, Error> {
        validate_command_type(command)?;
        self.run(command, handler).await
    }

    async fn run(&self, command: &C, handler: &dyn Handler<C>) -> Result<ExecutionResult, Error> {
        let command_type = command.command_type();

        let result = handler
            .handle(&self.store, command)
            .await
            .map_err(Error::Handler)?;

        if result.events.is_empty() {
            tracing::debug!(
                command_type,
                reason = ?result.reason,
                "handler produced no events, command is a duplicate"
            );

            return Ok(ExecutionResult::idempotent(result.reason));
        }

        event::validate_all(&result.events)
            .map_err(|err| Error::InvalidCommand(err.to_string()))?;

        let record = CommandRecord {
            command_type: command_type.to_owned(),
            payload: serde_json::to_vec(command)
                .map_err(|err| Error::InvalidCommand(format!("failed to serialize command: {err}")))?,
        };

        let events_count = result.events.len();

        match self
            .store
            .append_command_if(Some(record), result.events, result.condition)
            .await
        {
            Ok(cursor) => {
                tracing::debug!(command_type, events_count, %cursor, "command executed");
                Ok(ExecutionResult::created(cursor))
            },
            Err(AppendError::Violation(violation)) => self.classify(command_type, violation),
            Err(AppendError::Invalid(err)) => Err(Error::InvalidCommand(err.to_string())),
            Err(AppendError::NoEvents) => Err(Error::InvalidCommand(
                "command produced no events to append".to_owned(),
            )),
            Err(AppendError::Internal(err)) => Err(Error::Store(err)),
        }
    }

    fn classify(
        &self,
        command_type: &str,
        violation: Violation,
    ) -> Result<ExecutionResult, Error> {
        if violation.is_duplicate_only() && !self.conflict_on_duplicate.contains(command_type) {
            tracing::debug!(
                command_type,
                matching_events_count = violation.matching_events_count,
                "command already executed, absorbing duplicate"
            );

            return Ok(ExecutionResult::idempotent(None));
        }

        tracing::warn!(
            command_type,
            kind = ?violation.kind(),
            matching_events_count = violation.matching_events_count,
            "append condition violated"
        );

        Err(Error::Concurrency(violation))
    }
}

fn validate_command_type<C>(command: &C) -> Result<&str, Error>
where
    C: Command,
{
    let command_type = command.command_type();

    if command_type.is_empty() {
        return Err(Error::InvalidCommand(
            "command type must not be empty".to_owned(),
        ));
    }

    Ok(command_type)
}

impl<C, S> Debug for Executor<C, S>
where
    C: Command,
    S: Store + Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("store", &self.store)
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .field("conflict_on_duplicate", &self.conflict_on_duplicate)
            .finish()
    }
}
