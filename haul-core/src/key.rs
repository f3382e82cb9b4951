//! Query keys.
//!
//! A [`QueryKey`] is an ordered list of string segments, e.g.
//! `["shipment", "list", "page=2"]`. Keys compare by structural equality of
//! their segments; the canonical token (`shipment/list/page=2`) is what
//! predicate matchers inspect.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator used when rendering a key as a single token.
pub const KEY_SEPARATOR: char = '/';

/// Identifier of a cached query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
    /// Build a key from its segments.
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// The ordered segments of this key.
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Canonical single-string representation.
    pub fn token(&self) -> String {
        let mut token = String::new();
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                token.push(KEY_SEPARATOR);
            }
            token.push_str(segment);
        }
        token
    }

    /// Append a segment, returning the extended key.
    pub fn child(mut self, segment: impl Into<String>) -> Self {
        self.0.push(segment.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for QueryKey {
    fn from(value: &str) -> Self {
        Self(vec![value.to_string()])
    }
}

impl From<String> for QueryKey {
    fn from(value: String) -> Self {
        Self(vec![value])
    }
}

impl From<Vec<String>> for QueryKey {
    fn from(value: Vec<String>) -> Self {
        Self(value)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_joins_segments() {
        let key = QueryKey::new(["shipment", "list", "page=2"]);
        assert_eq!(key.token(), "shipment/list/page=2");
        assert_eq!(key.to_string(), "shipment/list/page=2");
    }

    #[test]
    fn test_single_segment_token_is_segment() {
        assert_eq!(QueryKey::from("order-1").token(), "order-1");
    }

    #[test]
    fn test_structural_equality() {
        let a = QueryKey::new(["order", "1"]);
        let b = QueryKey::from("order").child("1");
        assert_eq!(a, b);
        assert_ne!(a, QueryKey::from("order/1"));
    }

    #[test]
    fn test_serializes_as_string_array() {
        let key = QueryKey::new(["tractor", "42"]);
        let json = serde_json::to_value(&key).unwrap();
        assert_eq!(json, serde_json::json!(["tractor", "42"]));
        let back: QueryKey = serde_json::from_value(json).unwrap();
        assert_eq!(back, key);
    }
}
