//! Module `event` contains the records stored in the Event Log: the
//! [AppendEvent] staged by a command handler and the [StoredEvent] it
//! becomes once committed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cursor::{Cursor, SequenceNumber, TransactionId};
use crate::serde::Serde;
use crate::tag::Tag;

/// Represents a Domain Event type that can be recorded in the Event Log.
///
/// Each event kind has a specific name, which should be unique within the
/// bounded context: it becomes the stored event type that queries select on.
/// A bounded context usually models its events as a closed `enum`,
/// returning one name per variant.
pub trait Message {
    /// Returns the domain name of the [Message].
    fn name(&self) -> &'static str;
}

/// Read-only view over the fields a [Query][crate::query::Query] selects on.
pub trait Tagged {
    /// The event type, e.g. `DepositMade`.
    fn event_type(&self) -> &str;

    /// The tags attached to the event.
    fn tags(&self) -> &[Tag];

    /// Returns the value of the first tag with the given key, if any.
    fn tag(&self, key: &str) -> Option<&str> {
        self.tags()
            .iter()
            .find(|tag| tag.key == key)
            .map(|tag| tag.value.as_str())
    }
}

/// Error returned when an [AppendEvent] is not well-formed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The event type is empty.
    #[error("event type must not be empty")]
    EmptyType,
    /// A tag has an empty key.
    #[error("event '{event_type}' has a tag with an empty key at index {index}")]
    EmptyTagKey {
        /// Type of the offending event.
        event_type: String,
        /// Index of the offending tag.
        index: usize,
    },
    /// A tag has an empty value.
    #[error("event '{event_type}' has an empty value for tag '{key}'")]
    EmptyTagValue {
        /// Type of the offending event.
        event_type: String,
        /// Key of the offending tag.
        key: String,
    },
    /// A tag key contains the `key=value` separator.
    #[error("event '{event_type}' has a tag key '{key}' containing the '=' separator")]
    InvalidTagKey {
        /// Type of the offending event.
        event_type: String,
        /// Key of the offending tag.
        key: String,
    },
}

/// An event staged for an append: it has no position in the Event Log yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEvent {
    /// The event type.
    pub event_type: String,
    /// The tags attached to the event, in the order they were added.
    pub tags: Vec<Tag>,
    /// Opaque payload.
    pub payload: Vec<u8>,
}

impl AppendEvent {
    /// Creates a new event with no tags.
    pub fn new(event_type: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            event_type: event_type.into(),
            tags: Vec::new(),
            payload,
        }
    }

    /// Encodes a typed Domain Event through the given [Serde],
    /// using the [Message] name as the event type.
    pub fn from_message<T, S>(message: &T, serde: &S) -> Result<Self, S::Error>
    where
        T: Message,
        S: Serde<T>,
    {
        Ok(Self::new(message.name(), serde.serialize(message)?))
    }

    /// Adds a new tag to the event.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push(Tag::new(key, value));
        self
    }

    /// Adds all the given tags to the event.
    #[must_use]
    pub fn with_tags(mut self, tags: impl IntoIterator<Item = Tag>) -> Self {
        self.tags.extend(tags);
        self
    }

    /// Checks the event type and every tag key and value are non-empty,
    /// and that no tag key contains the [SEPARATOR][crate::tag::SEPARATOR].
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.event_type.is_empty() {
            return Err(ValidationError::EmptyType);
        }

        for (index, tag) in self.tags.iter().enumerate() {
            if tag.key.is_empty() {
                return Err(ValidationError::EmptyTagKey {
                    event_type: self.event_type.clone(),
                    index,
                });
            }

            if tag.key.contains(crate::tag::SEPARATOR) {
                return Err(ValidationError::InvalidTagKey {
                    event_type: self.event_type.clone(),
                    key: tag.key.clone(),
                });
            }

            if tag.value.is_empty() {
                return Err(ValidationError::EmptyTagValue {
                    event_type: self.event_type.clone(),
                    key: tag.key.clone(),
                });
            }
        }

        Ok(())
    }
}

impl Tagged for AppendEvent {
    fn event_type(&self) -> &str {
        &self.event_type
    }

    fn tags(&self) -> &[Tag] {
        &self.tags
    }
}

/// Validates a whole batch, failing on the first malformed event.
pub fn validate_all(events: &[AppendEvent]) -> Result<(), ValidationError> {
    events.iter().try_for_each(AppendEvent::validate)
}

/// An [AppendEvent] that has been committed to the Event Log.
///
/// Stored events are immutable. Their place in the log is given by
/// `(transaction_id, position)`, never by `occurred_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// The event type.
    pub event_type: String,
    /// The tags attached to the event.
    pub tags: Vec<Tag>,
    /// Opaque payload.
    pub payload: Vec<u8>,
    /// Commit token of the transaction that wrote the event.
    pub transaction_id: TransactionId,
    /// Position of the event in the Event Log, starting from 1.
    pub position: SequenceNumber,
    /// When the event was recorded.
    pub occurred_at: DateTime<Utc>,
}

impl StoredEvent {
    /// Stamps a staged event with its place in the Event Log.
    pub fn persisted(
        event: AppendEvent,
        transaction_id: TransactionId,
        position: SequenceNumber,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_type: event.event_type,
            tags: event.tags,
            payload: event.payload,
            transaction_id,
            position,
            occurred_at,
        }
    }

    /// Returns the [Cursor] pointing at this event.
    pub fn cursor(&self) -> Cursor {
        Cursor::new(self.transaction_id, self.position, self.occurred_at)
    }

    /// Decodes the payload into a typed Domain Event.
    pub fn decode<T, S>(&self, serde: &S) -> Result<T, S::Error>
    where
        S: Serde<T>,
    {
        serde.deserialize(&self.payload)
    }
}

impl Tagged for StoredEvent {
    fn event_type(&self) -> &str {
        &self.event_type
    }

    fn tags(&self) -> &[Tag] {
        &self.tags
    }
}
