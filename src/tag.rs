//! Contains the [Tag] type, the key-value label attached to Domain Events
//! that queries and append conditions select on.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Separator used in the `key=value` textual form of a [Tag].
pub const SEPARATOR: char = '=';

/// A key-value label attached to an event, e.g. `wallet_id=w-1`.
///
/// Tags are compared by value. The textual form `key=value` is what storage
/// backends use for array containment checks.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Tag {
    /// The tag key, e.g. `wallet_id`.
    pub key: String,
    /// The tag value, e.g. `w-1`.
    pub value: String,
}

impl Tag {
    /// Creates a new [Tag].
    ///
    /// No validation happens here: empty keys or values are rejected when the
    /// event carrying the tag is validated before an append.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl Display for Tag {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}{}{}", self.key, SEPARATOR, self.value)
    }
}

/// Error returned when parsing a [Tag] from its `key=value` form fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// The input does not contain the `=` separator.
    #[error("tag '{0}' is missing the '=' separator")]
    MissingSeparator(String),
    /// Either the key or the value is empty.
    #[error("tag '{0}' has an empty key or value")]
    Empty(String),
}

impl FromStr for Tag {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Values may contain '=' themselves, keys may not.
        let (key, value) = s
            .split_once(SEPARATOR)
            .ok_or_else(|| ParseError::MissingSeparator(s.to_owned()))?;

        if key.is_empty() || value.is_empty() {
            return Err(ParseError::Empty(s.to_owned()));
        }

        Ok(Tag::new(key, value))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn display_uses_key_value_form() {
        assert_eq!("wallet_id=w-1", Tag::new("wallet_id", "w-1").to_string());
    }

    #[test]
    fn parse_splits_on_first_separator() {
        let tag: Tag = "query=a=b".parse().expect("tag should parse");
        assert_eq!(Tag::new("query", "a=b"), tag);
    }

    #[test]
    fn parse_rejects_malformed_input() {
        assert_eq!(
            Err(ParseError::MissingSeparator("wallet".to_owned())),
            "wallet".parse::<Tag>()
        );
        assert_eq!(
            Err(ParseError::Empty("=w-1".to_owned())),
            "=w-1".parse::<Tag>()
        );
        assert_eq!(
            Err(ParseError::Empty("wallet_id=".to_owned())),
            "wallet_id=".parse::<Tag>()
        );
    }
}
