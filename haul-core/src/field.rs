//! Field-level validation errors as carried on the wire.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Server-assigned importance of a field error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    /// Parse a wire priority, ignoring case. Unknown values yield `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "HIGH" => Some(Priority::High),
            "MEDIUM" => Some(Priority::Medium),
            "LOW" => Some(Priority::Low),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "HIGH",
            Priority::Medium => "MEDIUM",
            Priority::Low => "LOW",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single field-scoped failure reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldError {
    /// Path of the offending field, e.g. `stops.0.plannedArrival`.
    #[serde(alias = "field")]
    pub name: String,
    /// Human-readable reason.
    #[serde(alias = "message")]
    pub reason: String,
    /// Machine-readable code, e.g. `VERSION_MISMATCH`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Absent priority means the error is surfaced unconditionally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
}

impl FieldError {
    pub fn new(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reason: reason.into(),
            code: None,
            priority: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Lenient decode of one wire entry.
    ///
    /// Returns `None` when the entry has no usable field name. A missing
    /// reason becomes an empty string and an unrecognised priority is
    /// treated as absent.
    pub fn from_wire(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let name = obj
            .get("name")
            .or_else(|| obj.get("field"))
            .and_then(Value::as_str)?
            .to_string();
        let reason = obj
            .get("reason")
            .or_else(|| obj.get("message"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let code = obj.get("code").and_then(Value::as_str).map(str::to_string);
        let priority = obj
            .get("priority")
            .and_then(Value::as_str)
            .and_then(Priority::parse);
        Some(Self {
            name,
            reason,
            code,
            priority,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_priority_parse_is_case_insensitive() {
        assert_eq!(Priority::parse("high"), Some(Priority::High));
        assert_eq!(Priority::parse(" Medium "), Some(Priority::Medium));
        assert_eq!(Priority::parse("LOW"), Some(Priority::Low));
        assert_eq!(Priority::parse("urgent"), None);
    }

    #[test]
    fn test_from_wire_full_entry() {
        let value = json!({
            "name": "rate",
            "reason": "Rate must be positive",
            "code": "INVALID",
            "priority": "MEDIUM"
        });
        let err = FieldError::from_wire(&value).unwrap();
        assert_eq!(err.name, "rate");
        assert_eq!(err.reason, "Rate must be positive");
        assert_eq!(err.code.as_deref(), Some("INVALID"));
        assert_eq!(err.priority, Some(Priority::Medium));
    }

    #[test]
    fn test_from_wire_tolerates_unknown_priority() {
        let value = json!({"field": "weight", "message": "too heavy", "priority": 7});
        let err = FieldError::from_wire(&value).unwrap();
        assert_eq!(err.name, "weight");
        assert_eq!(err.reason, "too heavy");
        assert_eq!(err.priority, None);
    }

    #[test]
    fn test_from_wire_rejects_nameless_entry() {
        assert!(FieldError::from_wire(&json!({"reason": "x"})).is_none());
        assert!(FieldError::from_wire(&json!("x")).is_none());
    }
}
