//! Contains the [EventStore] implementation of the [Streamer] and [Appender]
//! traits, using PostgreSQL as the Event Log backend.

use std::str::FromStr;

use async_trait::async_trait;
use bb8::{Pool, RunError};
use bb8_postgres::PostgresConnectionManager;
use dcb::cursor::{Cursor, SequenceNumber, TransactionId};
use dcb::event::{self, AppendEvent, StoredEvent};
use dcb::store::{
    AppendError, Appender, CommandRecord, Select, Stream, StoredCommand, StreamError, Streamer,
};
use dcb::{AppendCondition, Query, Tag, Violation};
use futures::stream::{StreamExt, TryStreamExt};
use tokio_postgres::types::FromSql;
use tokio_postgres::{IsolationLevel, NoTls, Row, Transaction};
use tracing::instrument;

use crate::config::Config;
use crate::sql::{self, Params};

/// Connection pool used by the [EventStore].
pub type ConnectionPool = Pool<PostgresConnectionManager<NoTls>>;

const DEFAULT_FETCH_SIZE: i32 = 500;
const DEFAULT_APPEND_LOCK_KEY: i64 = 4242;

const APPEND_EVENT: &str = r#"INSERT INTO events ("type", tags, payload)
    VALUES ($1, $2, $3)
    RETURNING position, transaction_id::text AS transaction_id, occurred_at"#;

const APPEND_COMMAND: &str = r#"INSERT INTO commands ("type", data) VALUES ($1, $2)"#;

const SELECT_COMMANDS: &str = r#"SELECT "type", data, transaction_id::text AS transaction_id, occurred_at
    FROM commands
    ORDER BY transaction_id"#;

/// All possible errors returned by the PostgreSQL [EventStore].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No connection could be obtained from the pool.
    #[error("failed to get a connection from the pool: {0}")]
    Pool(#[from] RunError<tokio_postgres::Error>),
    /// The database returned an error.
    #[error("db returned an error: {0}")]
    Database(#[from] tokio_postgres::Error),
    /// The embedded migrations could not be applied.
    #[error("failed to run database migrations: {0}")]
    Migration(#[from] refinery::Error),
    /// A column could not be read from a result row.
    #[error("failed to get column '{name}' from result row: {error}")]
    ReadColumn {
        name: &'static str,
        #[source]
        error: tokio_postgres::Error,
    },
    /// A column holds a value that cannot be mapped to its domain type.
    #[error("invalid value in column '{name}': {reason}")]
    InvalidColumn { name: &'static str, reason: String },
    /// The cursor position does not fit the `BIGINT` position column.
    #[error("cursor position {position} is out of range: {error}")]
    InvalidCursor {
        position: u64,
        #[source]
        error: std::num::TryFromIntError,
    },
}

/// [Store][dcb::Store] implementation backed by PostgreSQL.
///
/// Appenders are serialized through a transaction-level advisory lock: the
/// append condition is checked and the events are inserted while holding it,
/// so commit order follows transaction id order. Readers only ever see
/// events of transactions below the oldest transaction still running, which
/// keeps the `(transaction_id, position)` order stable for cursors.
#[derive(Debug, Clone)]
pub struct EventStore {
    pool: ConnectionPool,
    fetch_size: i32,
    append_lock_key: i64,
}

impl EventStore {
    /// Creates a new [EventStore] using the given pool, applying the
    /// embedded migrations first.
    pub async fn new(pool: ConnectionPool) -> Result<Self, Error> {
        let mut client = pool.dedicated_connection().await?;
        crate::embedded::migrations::runner()
            .run_async(&mut client)
            .await?;

        Ok(Self {
            pool,
            fetch_size: DEFAULT_FETCH_SIZE,
            append_lock_key: DEFAULT_APPEND_LOCK_KEY,
        })
    }

    /// Builds the connection pool described by the [Config] and creates
    /// a new [EventStore] on top of it.
    pub async fn from_config(config: &Config) -> Result<Self, Error> {
        let manager =
            PostgresConnectionManager::new_from_stringlike(config.postgres_dsn(), NoTls)?;

        let pool = Pool::builder()
            .max_size(config.db_pool_max_size)
            .build(manager)
            .await?;

        Ok(Self::new(pool)
            .await?
            .with_fetch_size(config.db_fetch_size)
            .with_append_lock_key(config.db_append_lock_key))
    }

    /// Sets the number of rows fetched per round-trip when streaming.
    #[must_use]
    pub fn with_fetch_size(mut self, fetch_size: i32) -> Self {
        self.fetch_size = fetch_size.max(1);
        self
    }

    /// Sets the key of the advisory lock taken by every append.
    /// All the [EventStore]s sharing a database must use the same key.
    #[must_use]
    pub fn with_append_lock_key(mut self, key: i64) -> Self {
        self.append_lock_key = key;
        self
    }

    /// Returns the command log, in transaction order.
    pub async fn commands(&self) -> Result<Vec<StoredCommand>, Error> {
        let client = self.pool.get().await?;
        let rows = client.query(SELECT_COMMANDS, &[]).await?;

        rows.iter().map(stored_command_from_row).collect()
    }

    async fn append_in_transaction(
        &self,
        command: Option<CommandRecord>,
        events: Vec<AppendEvent>,
        condition: &AppendCondition,
    ) -> Result<Result<Cursor, Violation>, Error> {
        let mut client = self.pool.get().await?;
        let tx = client
            .build_transaction()
            .isolation_level(IsolationLevel::ReadCommitted)
            .start()
            .await?;

        tx.execute("SELECT pg_advisory_xact_lock($1)", &[&self.append_lock_key])
            .await?;

        let (state_changed_count, already_exists_count) = count_matching(&tx, condition).await?;

        if let Some(violation) =
            Violation::from_counts(condition, state_changed_count, already_exists_count)
        {
            tx.rollback().await?;
            return Ok(Err(violation));
        }

        let mut cursor = Cursor::zero();

        for event in events {
            let tags: Vec<String> = event.tags.iter().map(ToString::to_string).collect();
            let row = tx
                .query_one(APPEND_EVENT, &[&event.event_type, &tags, &event.payload])
                .await?;

            cursor = cursor_from_row(&row)?;
        }

        if let Some(command) = command {
            tx.execute(APPEND_COMMAND, &[&command.command_type, &command.payload])
                .await?;
        }

        tx.commit().await?;

        Ok(Ok(cursor))
    }
}

impl Streamer for EventStore {
    fn stream(&self, query: &Query, select: Select) -> Stream<'_> {
        let mut params = Params::default();

        let statement = match select_statement(query, select.cursor(), &mut params) {
            Ok(statement) => statement,
            Err(err) => {
                return futures::stream::once(async move { Err(StreamError(err.into())) }).boxed()
            },
        };

        into_portal_stream(&self.pool, statement, params, self.fetch_size)
            .map_err(|err| StreamError(err.into()))
            .boxed()
    }
}

#[async_trait]
impl Appender for EventStore {
    #[allow(clippy::blocks_in_conditions)]
    #[instrument(
        name = "dcb_postgres::EventStore.append_command_if",
        skip(self, command, events),
        fields(events_count = events.len()),
        err
    )]
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

        match self
            .append_in_transaction(command, events, &condition)
            .await
            .map_err(anyhow::Error::from)?
        {
            Ok(cursor) => {
                tracing::debug!(%cursor, "events appended");
                Ok(cursor)
            },
            Err(violation) => {
                tracing::debug!(
                    kind = ?violation.kind(),
                    matching_events_count = violation.matching_events_count,
                    "append condition violated"
                );
                Err(AppendError::Violation(violation))
            },
        }
    }
}

/// Counts the events matching `state_changed` after the cursor and
/// `already_exists` over the whole log, in a single statement.
async fn count_matching(
    tx: &Transaction<'_>,
    condition: &AppendCondition,
) -> Result<(u64, u64), Error> {
    let mut params = Params::default();

    let after = cursor_predicate(condition.after_cursor, &mut params)?;
    let state_changed = sql::predicate(&condition.state_changed, &mut params);
    let already_exists = match &condition.already_exists {
        Some(query) => format!(
            "(SELECT COUNT(*) FROM events WHERE {})",
            sql::predicate(query, &mut params)
        ),
        None => "0::bigint".to_owned(),
    };

    let statement = format!(
        "SELECT (SELECT COUNT(*) FROM events WHERE {after} AND {state_changed}) AS state_changed, \
         {already_exists} AS already_exists"
    );

    let row = tx.query_one(statement.as_str(), &params.as_refs()).await?;

    let state_changed_count: i64 = try_get_column(&row, "state_changed")?;
    let already_exists_count: i64 = try_get_column(&row, "already_exists")?;

    Ok((
        state_changed_count.unsigned_abs(),
        already_exists_count.unsigned_abs(),
    ))
}

fn select_statement(query: &Query, after: Cursor, params: &mut Params) -> Result<String, Error> {
    let after = cursor_predicate(after, params)?;
    let matching = sql::predicate(query, params);

    Ok(format!(
        r#"SELECT "type", tags, payload, transaction_id::text AS transaction_id, position, occurred_at
        FROM events
        WHERE transaction_id < pg_snapshot_xmin(pg_current_snapshot())
            AND {after}
            AND {matching}
        ORDER BY transaction_id, position"#
    ))
}

fn cursor_predicate(cursor: Cursor, params: &mut Params) -> Result<String, Error> {
    let position = i64::try_from(cursor.position.0).map_err(|error| Error::InvalidCursor {
        position: cursor.position.0,
        error,
    })?;

    let transaction_id = params.push(cursor.transaction_id.0.to_string());
    let position = params.push(position);

    Ok(format!(
        "(transaction_id, position) > ({transaction_id}::text::xid8, {position}::bigint)"
    ))
}

/// Streams the rows of the statement through a portal, `fetch_size` rows
/// per round-trip, inside a read-only REPEATABLE READ transaction.
fn into_portal_stream(
    pool: &ConnectionPool,
    statement: String,
    params: Params,
    fetch_size: i32,
) -> impl futures::Stream<Item = Result<StoredEvent, Error>> + Send + '_ {
    async_stream::try_stream! {
        let mut client = pool.get().await?;
        let tx = client
            .build_transaction()
            .isolation_level(IsolationLevel::RepeatableRead)
            .read_only(true)
            .start()
            .await?;

        let portal = tx.bind(statement.as_str(), &params.as_refs()).await?;

        loop {
            let rows = tx.query_portal(&portal, fetch_size).await?;
            let size = rows.len();

            for row in rows {
                yield stored_event_from_row(&row)?;
            }

            if size < fetch_size as usize {
                break;
            }
        }

        tx.commit().await?;
    }
}

fn try_get_column<'a, T>(row: &'a Row, name: &'static str) -> Result<T, Error>
where
    T: FromSql<'a>,
{
    row.try_get(name)
        .map_err(|error| Error::ReadColumn { name, error })
}

fn transaction_id_from_row(row: &Row) -> Result<TransactionId, Error> {
    let transaction_id: String = try_get_column(row, "transaction_id")?;

    transaction_id
        .parse::<u64>()
        .map(TransactionId)
        .map_err(|err| Error::InvalidColumn {
            name: "transaction_id",
            reason: err.to_string(),
        })
}

fn position_from_row(row: &Row) -> Result<SequenceNumber, Error> {
    let position: i64 = try_get_column(row, "position")?;

    u64::try_from(position)
        .map(SequenceNumber)
        .map_err(|err| Error::InvalidColumn {
            name: "position",
            reason: err.to_string(),
        })
}

fn cursor_from_row(row: &Row) -> Result<Cursor, Error> {
    Ok(Cursor::new(
        transaction_id_from_row(row)?,
        position_from_row(row)?,
        try_get_column(row, "occurred_at")?,
    ))
}

fn stored_event_from_row(row: &Row) -> Result<StoredEvent, Error> {
    let tags: Vec<String> = try_get_column(row, "tags")?;
    let tags = tags
        .iter()
        .map(|tag| Tag::from_str(tag))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| Error::InvalidColumn {
            name: "tags",
            reason: err.to_string(),
        })?;

    Ok(StoredEvent {
        event_type: try_get_column(row, "type")?,
        tags,
        payload: try_get_column(row, "payload")?,
        transaction_id: transaction_id_from_row(row)?,
        position: position_from_row(row)?,
        occurred_at: try_get_column(row, "occurred_at")?,
    })
}

fn stored_command_from_row(row: &Row) -> Result<StoredCommand, Error> {
    Ok(StoredCommand {
        command_type: try_get_column(row, "type")?,
        payload: try_get_column(row, "data")?,
        transaction_id: transaction_id_from_row(row)?,
        occurred_at: try_get_column(row, "occurred_at")?,
    })
}
