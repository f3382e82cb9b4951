//! Raw failure of a write, before classification.

use serde_json::Value;
use std::fmt;

/// Longest slice of a non-JSON response body kept in the message.
const MAX_TEXT_BODY: usize = 512;

/// A failed write as observed by the client.
///
/// `status` is `None` when the request never produced an HTTP response
/// (connection refused, timeout, DNS failure).
#[derive(Debug, Clone, PartialEq)]
pub struct RawError {
    pub status: Option<u16>,
    pub body: Option<Value>,
    pub message: String,
}

impl RawError {
    /// Build from an HTTP status and the raw response body.
    pub fn from_response(status: u16, bytes: &[u8]) -> Self {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(body) => {
                let message = body
                    .get("detail")
                    .or_else(|| body.get("message"))
                    .or_else(|| body.get("title"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Self {
                    status: Some(status),
                    body: Some(body),
                    message,
                }
            }
            Err(_) => {
                let text = String::from_utf8_lossy(bytes);
                let message: String = text.chars().take(MAX_TEXT_BODY).collect();
                Self {
                    status: Some(status),
                    body: None,
                    message,
                }
            }
        }
    }

    /// Build from an HTTP status and an already-decoded body.
    pub fn with_body(status: u16, body: Value) -> Self {
        let message = body
            .get("detail")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Self {
            status: Some(status),
            body: Some(body),
            message,
        }
    }

    /// A failure that never reached the server.
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            status: None,
            body: None,
            message: message.into(),
        }
    }

    pub fn is_network(&self) -> bool {
        self.status.is_none()
    }
}

impl fmt::Display for RawError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) if self.message.is_empty() => write!(f, "HTTP {}", status),
            Some(status) => write!(f, "HTTP {}: {}", status, self.message),
            None => write!(f, "network error: {}", self.message),
        }
    }
}

impl std::error::Error for RawError {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_response_json_body() {
        let bytes = br#"{"type":"business-rule-violation","detail":"Shipment is locked"}"#;
        let err = RawError::from_response(422, bytes);
        assert_eq!(err.status, Some(422));
        assert_eq!(err.message, "Shipment is locked");
        assert_eq!(
            err.body.as_ref().and_then(|b| b.get("type")),
            Some(&json!("business-rule-violation"))
        );
    }

    #[test]
    fn test_from_response_text_body() {
        let err = RawError::from_response(502, b"<html>Bad Gateway</html>");
        assert_eq!(err.status, Some(502));
        assert!(err.body.is_none());
        assert!(err.message.contains("Bad Gateway"));
    }

    #[test]
    fn test_network_display() {
        let err = RawError::network("connection refused");
        assert!(err.is_network());
        assert_eq!(err.to_string(), "network error: connection refused");
    }

    #[test]
    fn test_http_display_without_message() {
        let err = RawError::from_response(500, b"");
        assert_eq!(err.to_string(), "HTTP 500");
    }
}
