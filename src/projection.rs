//! Contains the projection engine, folding a filtered and ordered stream of
//! [StoredEvent]s into a caller-defined state: the decision model a command
//! handler uses to decide which events to append.
//!
//! A [StateProjector] is a small value made of a filter (event types and
//! tags) and a transition function. Several projectors can be composed over
//! one shared state: every event is offered to each projector in turn, and
//! each projector only applies the events it [handles].
//!
//! The engine is fail-fast: the first transition error aborts the whole
//! projection, so a partially-folded state is never handed back.

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;

use futures::TryStreamExt;

use crate::condition::AppendCondition;
use crate::cursor::{Cursor, SequenceNumber};
use crate::event::{StoredEvent, Tagged};
use crate::query::{Query, QueryItem};
use crate::store::{Select, StreamError, Streamer};

/// The state transition function of a [StateProjector].
pub type Transition<T> = Arc<dyn Fn(T, &StoredEvent) -> anyhow::Result<T> + Send + Sync>;

/// Folds the events matching its filter into a state of type `T`.
pub struct StateProjector<T> {
    /// Identifies the projector in errors and logs.
    pub id: String,
    /// Event types and tags of the events handled by the projector.
    pub filter: QueryItem,
    /// The state the fold starts from.
    pub initial_state: T,
    transition: Transition<T>,
}

impl<T> StateProjector<T> {
    /// Creates a new projector handling every event, until restricted
    /// with [`StateProjector::with_types`] and [`StateProjector::with_tag`].
    pub fn new<F>(id: impl Into<String>, initial_state: T, transition: F) -> Self
    where
        F: Fn(T, &StoredEvent) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            filter: QueryItem::new(),
            initial_state,
            transition: Arc::new(transition),
        }
    }

    /// Restricts the projector to the given event types.
    #[must_use]
    pub fn with_types<I, S>(mut self, event_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filter = self.filter.with_types(event_types);
        self
    }

    /// Restricts the projector to events carrying the given tag.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filter = self.filter.with_tag(key, value);
        self
    }

    /// Returns the filter of the projector as a [QueryItem].
    pub fn query_item(&self) -> QueryItem {
        self.filter.clone()
    }

    /// Returns true if the projector applies the given event.
    pub fn handles<E>(&self, event: &E) -> bool
    where
        E: Tagged + ?Sized,
    {
        handles(self, event)
    }

    /// Applies the transition function.
    pub fn apply(&self, state: T, event: &StoredEvent) -> anyhow::Result<T> {
        (self.transition)(state, event)
    }
}

impl<T> Clone for StateProjector<T>
where
    T: Clone,
{
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            filter: self.filter.clone(),
            initial_state: self.initial_state.clone(),
            transition: self.transition.clone(),
        }
    }
}

impl<T> Debug for StateProjector<T>
where
    T: Debug,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("StateProjector")
            .field("id", &self.id)
            .field("filter", &self.filter)
            .field("initial_state", &self.initial_state)
            .finish_non_exhaustive()
    }
}

/// Returns true if the event matches the projector's filter, the same
/// [QueryItem] its read query is derived from.
pub fn handles<T, E>(projector: &StateProjector<T>, event: &E) -> bool
where
    E: Tagged + ?Sized,
{
    projector.filter.matches(event)
}

/// All possible errors returned by [project].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No projector was supplied, so there is no initial state.
    #[error("at least one state projector is required")]
    NoProjectors,
    /// The Event Log could not be read.
    #[error("failed to read the event log: {0}")]
    Stream(#[from] StreamError),
    /// A transition failed, usually while decoding an event payload.
    #[error("projector '{projector}' failed to apply event at position {position}: {source}")]
    Transition {
        /// Id of the failing projector.
        projector: String,
        /// Position of the event that could not be applied.
        position: SequenceNumber,
        /// The transition error.
        #[source]
        source: anyhow::Error,
    },
}

/// The outcome of a projection: the folded state, the [Cursor] of the last
/// event read and the [Query] the events were read with.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionResult<T> {
    /// The folded state.
    pub state: T,
    /// Cursor of the last event read, whether or not any projector handled it.
    /// When no event was read, the cursor the projection started from.
    pub cursor: Cursor,
    /// The query used to read the events.
    pub query: Query,
}

impl<T> ProjectionResult<T> {
    /// Returns the [AppendCondition] protecting a decision taken on this
    /// state: nothing matching the read query may have been appended after
    /// the cursor the read stopped at.
    pub fn condition(&self) -> AppendCondition {
        AppendCondition::new(self.query.clone()).after(self.cursor)
    }
}

/// Streams the events matching `query` after the `after` cursor and folds
/// them through the projectors, starting from the first projector's
/// initial state.
///
/// Events are applied in `(transaction_id, position)` order; every
/// projector whose filter matches an event applies it, in the order the
/// projectors are given.
pub async fn project<S, T>(
    store: &S,
    query: &Query,
    after: Cursor,
    projectors: &[StateProjector<T>],
) -> Result<ProjectionResult<T>, Error>
where
    S: Streamer + ?Sized,
    T: Clone + Send + Sync,
{
    let mut state = projectors
        .first()
        .map(|projector| projector.initial_state.clone())
        .ok_or(Error::NoProjectors)?;

    let mut cursor = after;
    let mut events = store.stream(query, Select::from(after));

    while let Some(event) = events.try_next().await? {
        for projector in projectors.iter().filter(|p| p.handles(&event)) {
            state = projector
                .apply(state, &event)
                .map_err(|source| Error::Transition {
                    projector: projector.id.clone(),
                    position: event.position,
                    source,
                })?;
        }

        cursor = event.cursor();
    }

    Ok(ProjectionResult {
        state,
        cursor,
        query: query.clone(),
    })
}

/// Builds a decision model from the beginning of the Event Log, reading
/// with the query derived from the projectors themselves.
pub async fn decision_model<S, T>(
    store: &S,
    projectors: &[StateProjector<T>],
) -> Result<ProjectionResult<T>, Error>
where
    S: Streamer + ?Sized,
    T: Clone + Send + Sync,
{
    project(
        store,
        &Query::from_projectors(projectors),
        Cursor::zero(),
        projectors,
    )
    .await
}
