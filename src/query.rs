//! Contains the [Query] predicate used to select events from the Event Log,
//! both to build a decision model and to check an append condition.
//!
//! A [Query] is an OR of [QueryItem]s; each item is an AND of an event type
//! filter and a tag filter:
//!
//! * an event matches a [QueryItem] when its type is one of the item's types
//!   (or the item has no types) **and** it carries all the item's tags
//!   (or the item has no tags);
//! * an event matches a [Query] when it matches any of its items;
//! * the empty [Query] matches every event.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::event::Tagged;
use crate::projection::StateProjector;
use crate::tag::Tag;

/// A conjunction of an event type filter and a tag filter.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryItem {
    /// Accepted event types; empty accepts any type.
    pub event_types: BTreeSet<String>,
    /// Required tags; empty requires none.
    pub tags: BTreeSet<Tag>,
}

impl QueryItem {
    /// Creates an item matching every event.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts the item to the given event types.
    #[must_use]
    pub fn with_types<I, T>(mut self, event_types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.event_types
            .extend(event_types.into_iter().map(Into::into));
        self
    }

    /// Requires the given tag on matching events.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(Tag::new(key, value));
        self
    }

    /// Requires all the given tags on matching events.
    #[must_use]
    pub fn with_tags(mut self, tags: impl IntoIterator<Item = Tag>) -> Self {
        self.tags.extend(tags);
        self
    }

    /// Returns true if the item accepts every event.
    pub fn is_unrestricted(&self) -> bool {
        self.event_types.is_empty() && self.tags.is_empty()
    }

    /// Returns true if the event satisfies both the type and the tag filter.
    pub fn matches<E>(&self, event: &E) -> bool
    where
        E: Tagged + ?Sized,
    {
        let type_matches =
            self.event_types.is_empty() || self.event_types.contains(event.event_type());

        type_matches && self.tags.iter().all(|tag| event.tags().contains(tag))
    }
}

/// An ordered set of [QueryItem]s, logically OR-ed together.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Query {
    items: Vec<QueryItem>,
}

impl Query {
    /// Returns the empty [Query], matching every event in the Event Log.
    pub fn all() -> Self {
        Self::default()
    }

    /// Builds a [Query] out of the given items, dropping duplicates
    /// while keeping the first-seen order.
    pub fn new(items: impl IntoIterator<Item = QueryItem>) -> Self {
        items.into_iter().fold(Self::all(), Self::or)
    }

    /// Derives the read query of a decision model from its projectors:
    /// every projector's own filter becomes one item of the query.
    pub fn from_projectors<T>(projectors: &[StateProjector<T>]) -> Self {
        Self::new(projectors.iter().map(StateProjector::query_item))
    }

    /// Adds an alternative to the [Query].
    #[must_use]
    pub fn or(mut self, item: QueryItem) -> Self {
        if !self.items.contains(&item) {
            self.items.push(item);
        }

        self
    }

    /// Returns the items of the [Query].
    pub fn items(&self) -> &[QueryItem] {
        &self.items
    }

    /// Returns true if the [Query] matches every event, either because it
    /// has no items or because one of its items is unrestricted.
    pub fn is_all(&self) -> bool {
        self.items.is_empty() || self.items.iter().any(QueryItem::is_unrestricted)
    }

    /// Returns true if the event matches at least one item of the [Query].
    pub fn matches<E>(&self, event: &E) -> bool
    where
        E: Tagged + ?Sized,
    {
        self.items.is_empty() || self.items.iter().any(|item| item.matches(event))
    }
}

impl From<QueryItem> for Query {
    fn from(item: QueryItem) -> Self {
        Self { items: vec![item] }
    }
}

impl FromIterator<QueryItem> for Query {
    fn from_iter<I: IntoIterator<Item = QueryItem>>(iter: I) -> Self {
        Self::new(iter)
    }
}

/// Returns true if the event matches the query. Total and side-effect free.
pub fn matches<E>(event: &E, query: &Query) -> bool
where
    E: Tagged + ?Sized,
{
    query.matches(event)
}
