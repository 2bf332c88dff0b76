//! Renders [Query] predicates over the `events` table, with their
//! positional parameters.

use dcb::{Query, QueryItem};
use tokio_postgres::types::ToSql;

/// Positional parameters of a statement under construction.
#[derive(Default)]
pub(crate) struct Params(Vec<Box<dyn ToSql + Sync + Send>>);

impl Params {
    /// Adds a parameter, returning its placeholder (e.g. `$3`).
    pub(crate) fn push<T>(&mut self, value: T) -> String
    where
        T: ToSql + Sync + Send + 'static,
    {
        self.0.push(Box::new(value));
        format!("${}", self.0.len())
    }

    pub(crate) fn as_refs(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.0
            .iter()
            .map(|param| -> &(dyn ToSql + Sync) { &**param })
            .collect()
    }
}

/// Renders the [Query] as a boolean SQL expression.
///
/// Items are OR-ed together; within an item, the type alternatives and the
/// required tags are AND-ed. An empty [Query] renders as `TRUE`.
pub(crate) fn predicate(query: &Query, params: &mut Params) -> String {
    if query.is_all() {
        return "TRUE".to_owned();
    }

    let items: Vec<String> = query
        .items()
        .iter()
        .map(|item| item_predicate(item, params))
        .collect();

    format!("({})", items.join(" OR "))
}

fn item_predicate(item: &QueryItem, params: &mut Params) -> String {
    let mut clauses = Vec::with_capacity(2);

    if !item.event_types.is_empty() {
        let event_types: Vec<String> = item.event_types.iter().cloned().collect();
        clauses.push(format!("\"type\" = ANY({}::text[])", params.push(event_types)));
    }

    // Tags are stored in their `key=value` form.
    if !item.tags.is_empty() {
        let tags: Vec<String> = item.tags.iter().map(ToString::to_string).collect();
        clauses.push(format!("tags @> {}::text[]", params.push(tags)));
    }

    match clauses.len() {
        0 => "TRUE".to_owned(),
        _ => format!("({})", clauses.join(" AND ")),
    }
}
