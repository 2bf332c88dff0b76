//! Contains the [AppendCondition] evaluated atomically with every append,
//! and the [Violation] reported when it does not hold.

use serde::{Deserialize, Serialize};

use crate::cursor::Cursor;
use crate::query::Query;

/// Error code carried by every [Violation].
pub const VIOLATION_ERROR_CODE: &str = "DCB_VIOLATION";

/// The consistency condition attached to an append.
///
/// * `state_changed`: no event matching this query may have been committed
///   after `after_cursor`. With [Cursor::zero] it expresses "the appended
///   events must be the first ones matching this query".
/// * `already_exists`: when present, no event matching this query may exist
///   anywhere in the Event Log. It is evaluated with no cursor bound, so the
///   check does not depend on how far the reader has progressed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendCondition {
    /// The position the decision model was read up to.
    pub after_cursor: Cursor,
    /// The decision model query.
    pub state_changed: Query,
    /// Idempotency query, evaluated over the whole Event Log.
    pub already_exists: Option<Query>,
}

impl AppendCondition {
    /// Creates a condition expecting no event matching `state_changed`
    /// to exist at all (i.e. evaluated from [Cursor::zero]).
    pub fn new(state_changed: Query) -> Self {
        Self {
            after_cursor: Cursor::zero(),
            state_changed,
            already_exists: None,
        }
    }

    /// Sets the cursor the decision model was read up to.
    #[must_use]
    pub fn after(mut self, cursor: Cursor) -> Self {
        self.after_cursor = cursor;
        self
    }

    /// Sets the idempotency query.
    #[must_use]
    pub fn with_already_exists(mut self, query: Query) -> Self {
        self.already_exists = Some(query);
        self
    }
}

/// Which of the two checks of an [AppendCondition] failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationKind {
    /// Only `state_changed` matched: something changed since the read.
    StateChanged,
    /// Only `already_exists` matched: the operation was already performed.
    AlreadyExists,
    /// Both checks matched.
    Both,
}

/// The structured outcome of an append whose [AppendCondition] was not satisfied.
/// No event of the batch has been written when a [Violation] is returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{error_code}: {message} (matching events: {matching_events_count})")]
pub struct Violation {
    /// Always [VIOLATION_ERROR_CODE].
    pub error_code: String,
    /// Human-readable description of the failed checks.
    pub message: String,
    /// Total number of events matching the failed checks.
    pub matching_events_count: u64,
    /// Number of events matching `state_changed` after the cursor.
    pub state_changed_count: u64,
    /// Number of events matching `already_exists` in the whole log.
    pub already_exists_count: u64,
}

impl Violation {
    /// Builds a [Violation] out of the counts of the two checks.
    ///
    /// Returns `None` when neither check matched.
    pub fn from_counts(
        condition: &AppendCondition,
        state_changed_count: u64,
        already_exists_count: u64,
    ) -> Option<Self> {
        let message = match (state_changed_count, already_exists_count) {
            (0, 0) => return None,
            (changed, 0) => format!(
                "{changed} event(s) matching the decision model were appended after {}",
                condition.after_cursor
            ),
            (0, existing) => format!("{existing} event(s) matching the idempotency query already exist"),
            (changed, existing) => format!(
                "{changed} event(s) matching the decision model were appended after {} \
                 and {existing} event(s) matching the idempotency query already exist",
                condition.after_cursor
            ),
        };

        Some(Self {
            error_code: VIOLATION_ERROR_CODE.to_owned(),
            message,
            matching_events_count: state_changed_count + already_exists_count,
            state_changed_count,
            already_exists_count,
        })
    }

    /// Returns which of the two checks failed.
    pub fn kind(&self) -> ViolationKind {
        match (self.state_changed_count > 0, self.already_exists_count > 0) {
            (true, true) => ViolationKind::Both,
            (false, true) => ViolationKind::AlreadyExists,
            _ => ViolationKind::StateChanged,
        }
    }

    /// Returns true if the violation is explained by the idempotency query alone.
    pub fn is_duplicate_only(&self) -> bool {
        self.kind() == ViolationKind::AlreadyExists
    }
}
