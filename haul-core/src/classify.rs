//! Error classification.
//!
//! [`classify`] maps a [`RawError`] onto a closed set of presentation tags.
//! It is total and pure: it never panics, performs no I/O and logs nothing,
//! so callers decide what to record.
//!
//! # Wire shape
//!
//! ```text
//! {
//!   "type":   "validation-error" | "business-rule-violation" | "rate-limit-exceeded" | ...,
//!   "detail": "human readable text",
//!   "errors": [ { "name": "rate", "reason": "...", "code": "...", "priority": "HIGH" } ]
//! }
//! ```
//!
//! Discriminators are matched ignoring case and `-`/`_`/space separators, so
//! `validationError`, `validation_error` and `validation-error` are one tag.
//!
//! # Version conflicts
//!
//! A validation body whose field errors include the sentinel field
//! [`VERSION_FIELD`] or the code [`VERSION_MISMATCH_CODE`] is an optimistic
//! concurrency failure. It is tagged [`ClassifiedError::VersionConflict`]
//! instead of [`ClassifiedError::Validation`]; the record must be refreshed
//! as a whole, never patched field by field.

use crate::field::{FieldError, Priority};
use crate::raw::RawError;
use serde_json::{Map, Value};

/// Field name the server uses to report a stale record version.
pub const VERSION_FIELD: &str = "version";

/// Error code the server uses to report a stale record version.
pub const VERSION_MISMATCH_CODE: &str = "VERSION_MISMATCH";

/// HTTP status that always implies rate limiting.
pub const TOO_MANY_REQUESTS: u16 = 429;

// ============================================================================
// FIELD BUCKETS
// ============================================================================

/// Field errors partitioned by priority.
///
/// Every input error lands in exactly one bucket; entries without a priority
/// go to `unconditional`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldBuckets {
    pub high: Vec<FieldError>,
    pub medium: Vec<FieldError>,
    pub low: Vec<FieldError>,
    pub unconditional: Vec<FieldError>,
}

impl FieldBuckets {
    pub fn partition(errors: &[FieldError]) -> Self {
        let mut buckets = Self::default();
        for error in errors {
            let bucket = match error.priority {
                Some(Priority::High) => &mut buckets.high,
                Some(Priority::Medium) => &mut buckets.medium,
                Some(Priority::Low) => &mut buckets.low,
                None => &mut buckets.unconditional,
            };
            bucket.push(error.clone());
        }
        buckets
    }

    pub fn len(&self) -> usize {
        self.high.len() + self.medium.len() + self.low.len() + self.unconditional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All errors, highest priority first, unconditional last.
    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.high
            .iter()
            .chain(self.medium.iter())
            .chain(self.low.iter())
            .chain(self.unconditional.iter())
    }
}

// ============================================================================
// TAXONOMY
// ============================================================================

/// Why a failure could not be given a more specific tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnknownReason {
    /// The request never reached the server.
    Network,
    /// The response body was absent or not a JSON object.
    MissingBody,
    /// The body had no string `type` discriminator.
    MissingType,
    /// The discriminator is not one we recognise.
    UnrecognizedType(String),
}

/// One presentation tag for a failed write.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifiedError {
    /// Field-scoped failures, bucketed by priority.
    Validation {
        fields: FieldBuckets,
        detail: Option<String>,
    },
    /// The record changed on the server since it was read.
    VersionConflict {
        detail: String,
        fields: Vec<FieldError>,
    },
    /// The caller must wait before retrying.
    RateLimit { detail: Option<String> },
    /// A domain rule rejected the write; shown as one global message.
    BusinessRule { detail: String },
    /// Anything else.
    Unknown {
        status: Option<u16>,
        detail: String,
        reason: UnknownReason,
    },
}

/// The full classification of one failure. Never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    tags: Vec<ClassifiedError>,
}

impl Classification {
    pub fn tags(&self) -> &[ClassifiedError] {
        &self.tags
    }

    pub fn validation(&self) -> Option<&FieldBuckets> {
        self.tags.iter().find_map(|tag| match tag {
            ClassifiedError::Validation { fields, .. } => Some(fields),
            _ => None,
        })
    }

    pub fn is_version_conflict(&self) -> bool {
        self.tags
            .iter()
            .any(|tag| matches!(tag, ClassifiedError::VersionConflict { .. }))
    }

    pub fn is_rate_limited(&self) -> bool {
        self.tags
            .iter()
            .any(|tag| matches!(tag, ClassifiedError::RateLimit { .. }))
    }

    pub fn business_rule(&self) -> Option<&str> {
        self.tags.iter().find_map(|tag| match tag {
            ClassifiedError::BusinessRule { detail } => Some(detail.as_str()),
            _ => None,
        })
    }

    pub fn is_unknown(&self) -> bool {
        self.tags
            .iter()
            .any(|tag| matches!(tag, ClassifiedError::Unknown { .. }))
    }
}

// ============================================================================
// CLASSIFIER
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Discriminator {
    Validation,
    BusinessRule,
    RateLimit,
}

fn parse_discriminator(raw: &str) -> Option<Discriminator> {
    let normalized: String = raw
        .chars()
        .filter(|c| !matches!(c, '-' | '_' | ' '))
        .flat_map(char::to_lowercase)
        .collect();
    match normalized.as_str() {
        "validationerror" | "validation" | "invalidrequest" => Some(Discriminator::Validation),
        "businessruleviolation" | "businessrule" | "businesserror" | "businessruleerror" => {
            Some(Discriminator::BusinessRule)
        }
        "ratelimit" | "ratelimitexceeded" | "ratelimiterror" | "toomanyrequests" => {
            Some(Discriminator::RateLimit)
        }
        _ => None,
    }
}

fn detail_of(body: &Map<String, Value>, raw: &RawError) -> Option<String> {
    body.get("detail")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| (!raw.message.is_empty()).then(|| raw.message.clone()))
}

fn field_errors_of(body: &Map<String, Value>) -> Vec<FieldError> {
    body.get("errors")
        .or_else(|| body.get("invalidParams"))
        .and_then(Value::as_array)
        .map(|entries| entries.iter().filter_map(FieldError::from_wire).collect())
        .unwrap_or_default()
}

fn is_version_sentinel(error: &FieldError) -> bool {
    error.name == VERSION_FIELD || error.code.as_deref() == Some(VERSION_MISMATCH_CODE)
}

/// Classify a failed write.
pub fn classify(raw: &RawError) -> Classification {
    let mut tags = Vec::new();
    let mut unknown_reason = if raw.is_network() {
        UnknownReason::Network
    } else {
        UnknownReason::MissingBody
    };

    if let Some(body) = raw.body.as_ref().and_then(Value::as_object) {
        match body.get("type").and_then(Value::as_str) {
            None => unknown_reason = UnknownReason::MissingType,
            Some(kind) => match parse_discriminator(kind) {
                None => unknown_reason = UnknownReason::UnrecognizedType(kind.to_string()),
                Some(Discriminator::Validation) => {
                    let errors = field_errors_of(body);
                    let detail = detail_of(body, raw);
                    let sentinels: Vec<FieldError> = errors
                        .iter()
                        .filter(|e| is_version_sentinel(e))
                        .cloned()
                        .collect();
                    if sentinels.is_empty() {
                        tags.push(ClassifiedError::Validation {
                            fields: FieldBuckets::partition(&errors),
                            detail,
                        });
                    } else {
                        let detail = detail
                            .or_else(|| sentinels.first().map(|e| e.reason.clone()))
                            .unwrap_or_default();
                        tags.push(ClassifiedError::VersionConflict {
                            detail,
                            fields: sentinels,
                        });
                    }
                }
                Some(Discriminator::BusinessRule) => {
                    tags.push(ClassifiedError::BusinessRule {
                        detail: detail_of(body, raw).unwrap_or_default(),
                    });
                }
                Some(Discriminator::RateLimit) => {
                    tags.push(ClassifiedError::RateLimit {
                        detail: detail_of(body, raw),
                    });
                }
            },
        }
    }

    let rate_limited = tags
        .iter()
        .any(|tag| matches!(tag, ClassifiedError::RateLimit { .. }));
    if raw.status == Some(TOO_MANY_REQUESTS) && !rate_limited {
        let detail = (!raw.message.is_empty()).then(|| raw.message.clone());
        tags.push(ClassifiedError::RateLimit { detail });
    }

    if tags.is_empty() {
        tags.push(ClassifiedError::Unknown {
            status: raw.status,
            detail: raw.message.clone(),
            reason: unknown_reason,
        });
    }

    Classification { tags }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(status: u16, value: Value) -> RawError {
        RawError::with_body(status, value)
    }

    #[test]
    fn test_validation_buckets_by_priority() {
        let raw = body(
            400,
            json!({
                "type": "validation-error",
                "errors": [
                    {"name": "rate", "reason": "required", "priority": "HIGH"},
                    {"name": "weight", "reason": "too heavy", "priority": "LOW"},
                    {"name": "pieces", "reason": "must be > 0"}
                ]
            }),
        );
        let classification = classify(&raw);
        let fields = classification.validation().unwrap();
        assert_eq!(fields.high.len(), 1);
        assert_eq!(fields.medium.len(), 0);
        assert_eq!(fields.low.len(), 1);
        assert_eq!(fields.unconditional.len(), 1);
        assert_eq!(classification.tags().len(), 1);
    }

    #[test]
    fn test_discriminator_spelling_variants() {
        for kind in ["validation-error", "validationError", "VALIDATION_ERROR"] {
            let raw = body(400, json!({"type": kind, "errors": []}));
            assert!(classify(&raw).validation().is_some(), "{kind}");
        }
    }

    #[test]
    fn test_version_sentinel_by_field_name() {
        let raw = body(
            400,
            json!({
                "type": "validation-error",
                "errors": [
                    {"name": "version", "reason": "Version mismatch", "code": "INVALID"},
                    {"name": "rate", "reason": "required"}
                ]
            }),
        );
        let classification = classify(&raw);
        assert!(classification.is_version_conflict());
        assert!(classification.validation().is_none());
    }

    #[test]
    fn test_version_sentinel_by_code() {
        let raw = body(
            409,
            json!({
                "type": "validationError",
                "detail": "The worker has been updated since the last request.",
                "errors": [{"name": "id", "reason": "stale", "code": "VERSION_MISMATCH"}]
            }),
        );
        match &classify(&raw).tags()[0] {
            ClassifiedError::VersionConflict { detail, fields } => {
                assert!(detail.contains("updated since"));
                assert_eq!(fields.len(), 1);
            }
            other => panic!("unexpected tag {other:?}"),
        }
    }

    #[test]
    fn test_business_rule_carries_detail() {
        let raw = body(
            422,
            json!({"type": "business-rule-violation", "detail": "Shipment is already billed"}),
        );
        assert_eq!(
            classify(&raw).business_rule(),
            Some("Shipment is already billed")
        );
    }

    #[test]
    fn test_status_429_is_rate_limit_without_body() {
        let raw = RawError::from_response(429, b"slow down");
        let classification = classify(&raw);
        assert!(classification.is_rate_limited());
        assert!(!classification.is_unknown());
    }

    #[test]
    fn test_rate_limit_not_duplicated() {
        let raw = body(429, json!({"type": "rate-limit-exceeded"}));
        assert_eq!(classify(&raw).tags().len(), 1);
    }

    #[test]
    fn test_validation_and_rate_limit_coexist() {
        let raw = body(
            429,
            json!({"type": "validation", "errors": [{"name": "a", "reason": "b"}]}),
        );
        let classification = classify(&raw);
        assert!(classification.validation().is_some());
        assert!(classification.is_rate_limited());
    }

    #[test]
    fn test_missing_type_is_unknown() {
        let raw = body(400, json!({"detail": "no discriminator"}));
        match &classify(&raw).tags()[0] {
            ClassifiedError::Unknown { reason, .. } => {
                assert_eq!(reason, &UnknownReason::MissingType)
            }
            other => panic!("unexpected tag {other:?}"),
        }
    }

    #[test]
    fn test_non_string_type_is_unknown() {
        let raw = body(400, json!({"type": 42}));
        assert!(classify(&raw).is_unknown());
    }

    #[test]
    fn test_unrecognized_type_is_unknown() {
        let raw = body(500, json!({"type": "database-error"}));
        match &classify(&raw).tags()[0] {
            ClassifiedError::Unknown { reason, status, .. } => {
                assert_eq!(
                    reason,
                    &UnknownReason::UnrecognizedType("database-error".to_string())
                );
                assert_eq!(*status, Some(500));
            }
            other => panic!("unexpected tag {other:?}"),
        }
    }

    #[test]
    fn test_network_failure_is_unknown() {
        let raw = RawError::network("connection reset");
        match &classify(&raw).tags()[0] {
            ClassifiedError::Unknown { reason, status, detail } => {
                assert_eq!(reason, &UnknownReason::Network);
                assert_eq!(*status, None);
                assert_eq!(detail, "connection reset");
            }
            other => panic!("unexpected tag {other:?}"),
        }
    }

    #[test]
    fn test_array_body_is_unknown() {
        let raw = body(400, json!(["not", "an", "object"]));
        assert!(classify(&raw).is_unknown());
    }
}
