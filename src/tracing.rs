//! Module containing an extension trait to support code instrumentation
//! of any [Store] using the `tracing` crate.

use async_trait::async_trait;
use tracing::instrument;

use crate::condition::AppendCondition;
use crate::cursor::Cursor;
use crate::event::AppendEvent;
use crate::query::Query;
use crate::store::{AppendError, Appender, CommandRecord, Select, Store, Stream, Streamer};

/// [Store] type wrapper that provides instrumentation
/// features through the `tracing` crate.
#[derive(Debug, Clone)]
pub struct InstrumentedEventStore<T>
where
    T: Store,
{
    store: T,
}

impl<T> Streamer for InstrumentedEventStore<T>
where
    T: Store,
{
    #[instrument(name = "dcb::Store.stream", skip(self))]
    fn stream(&self, query: &Query, select: Select) -> Stream<'_> {
        self.store.stream(query, select)
    }
}

#[async_trait]
impl<T> Appender for InstrumentedEventStore<T>
where
    T: Store,
{
    #[allow(clippy::blocks_in_conditions)]
    #[instrument(
        name = "dcb::Store.append_command_if",
        ret,
        err,
        skip(self, command, events),
        fields(
            command_type = command.as_ref().map(|command| command.command_type.as_str()),
            events_count = events.len(),
        )
    )]
    async fn append_command_if(
        &self,
        command: Option<CommandRecord>,
        events: Vec<AppendEvent>,
        condition: AppendCondition,
    ) -> Result<Cursor, AppendError> {
        self.store.append_command_if(command, events, condition).await
    }
}

/// Extension trait for any [Store] type to provide
/// instrumentation features through the `tracing` crate.
pub trait EventStoreExt: Store + Sized {
    /// Returns an instrumented version of the [Store] instance.
    fn with_tracing(self) -> InstrumentedEventStore<Self> {
        InstrumentedEventStore { store: self }
    }
}

impl<T> EventStoreExt for T where T: Store {}
