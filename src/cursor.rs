//! Contains the types describing where in the ordered Event Log a read
//! or a write has stopped.
//!
//! The Event Log is totally ordered by `(transaction_id, position)`:
//! the commit token of the transaction that wrote an event, then the
//! position assigned to the event inside the log. Wall-clock time is
//! never part of the ordering, so clock skew cannot reorder events.

use std::cmp::Ordering;
use std::fmt::{Display, Formatter, Result as FmtResult};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Position of an event in the Event Log.
///
/// Persisted events start from `1`; `0` means "before the first event".
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SequenceNumber(pub u64);

impl SequenceNumber {
    /// The position preceding every persisted event.
    pub const ZERO: SequenceNumber = SequenceNumber(0);

    /// Returns the following position.
    #[must_use]
    pub fn next(self) -> Self {
        SequenceNumber(self.0 + 1)
    }
}

impl Display for SequenceNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.0)
    }
}

/// Commit token of the transaction that persisted an event.
///
/// Tokens are monotonic and globally comparable: a transaction committed
/// after another one always carries a greater token.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TransactionId(pub u64);

impl Display for TransactionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.0)
    }
}

/// Marker of how far into the ordered Event Log a read or a write has progressed.
///
/// Equality and ordering only consider `(transaction_id, position)`;
/// `occurred_at` is carried along for information and never used to
/// compare two cursors.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Cursor {
    /// Position of the last event covered by this cursor.
    pub position: SequenceNumber,
    /// When the last event covered by this cursor was recorded.
    pub occurred_at: DateTime<Utc>,
    /// Commit token of the transaction that wrote the last event covered.
    pub transaction_id: TransactionId,
}

impl Cursor {
    /// Returns the cursor pointing before the beginning of the Event Log.
    pub fn zero() -> Self {
        Self {
            position: SequenceNumber::ZERO,
            occurred_at: DateTime::<Utc>::UNIX_EPOCH,
            transaction_id: TransactionId::default(),
        }
    }

    /// Creates a new cursor.
    pub fn new(
        transaction_id: TransactionId,
        position: SequenceNumber,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            position,
            occurred_at,
            transaction_id,
        }
    }

    /// Returns true if this is the [Cursor::zero] cursor.
    pub fn is_zero(&self) -> bool {
        self.position == SequenceNumber::ZERO && self.transaction_id == TransactionId::default()
    }

    /// Returns true if `self` points strictly before `other` in the Event Log.
    pub fn is_before(&self, other: &Cursor) -> bool {
        self < other
    }

    /// Returns true if `self` points strictly after `other` in the Event Log.
    pub fn is_after(&self, other: &Cursor) -> bool {
        self > other
    }

    fn ordering_key(&self) -> (TransactionId, SequenceNumber) {
        (self.transaction_id, self.position)
    }
}

impl Default for Cursor {
    fn default() -> Self {
        Self::zero()
    }
}

impl PartialEq for Cursor {
    fn eq(&self, other: &Self) -> bool {
        self.ordering_key() == other.ordering_key()
    }
}

impl Eq for Cursor {}

impl PartialOrd for Cursor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cursor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ordering_key().cmp(&other.ordering_key())
    }
}

impl Display for Cursor {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "tx:{}/pos:{}", self.transaction_id, self.position)
    }
}
