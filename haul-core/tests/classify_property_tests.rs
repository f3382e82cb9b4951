use haul_core::{classify, ClassifiedError, FieldBuckets, FieldError, Priority, RawError};
use haul_test_utils::generators::{arb_field_errors, arb_priority};
use proptest::prelude::*;
use serde_json::{json, Value};
use std::collections::HashSet;

fn validation_body(errors: &[FieldError]) -> Value {
    json!({
        "type": "validation-error",
        "detail": "Validation failed",
        "errors": serde_json::to_value(errors).unwrap(),
    })
}

fn bucket_of(buckets: &FieldBuckets, error: &FieldError) -> usize {
    [&buckets.high, &buckets.medium, &buckets.low, &buckets.unconditional]
        .iter()
        .filter(|bucket| bucket.contains(error))
        .count()
}

proptest! {
    #[test]
    fn partition_is_exact_cover(errors in arb_field_errors(12)) {
        let buckets = FieldBuckets::partition(&errors);

        prop_assert_eq!(buckets.len(), errors.len());
        for error in &errors {
            prop_assert_eq!(bucket_of(&buckets, error), 1);
        }
        let union: HashSet<&FieldError> = buckets.iter().collect();
        let input: HashSet<&FieldError> = errors.iter().collect();
        prop_assert_eq!(union, input);
    }

    #[test]
    fn buckets_respect_priority(errors in arb_field_errors(12)) {
        let buckets = FieldBuckets::partition(&errors);
        prop_assert!(buckets.high.iter().all(|e| e.priority == Some(Priority::High)));
        prop_assert!(buckets.medium.iter().all(|e| e.priority == Some(Priority::Medium)));
        prop_assert!(buckets.low.iter().all(|e| e.priority == Some(Priority::Low)));
        prop_assert!(buckets.unconditional.iter().all(|e| e.priority.is_none()));
    }

    #[test]
    fn wire_validation_keeps_every_field(errors in arb_field_errors(12)) {
        let classification = classify(&RawError::with_body(400, validation_body(&errors)));
        let buckets = classification.validation().cloned().unwrap_or_default();

        prop_assert_eq!(buckets.len(), errors.len());
        let union: HashSet<FieldError> = buckets.iter().cloned().collect();
        let input: HashSet<FieldError> = errors.into_iter().collect();
        prop_assert_eq!(union, input);
    }

    #[test]
    fn version_sentinel_suppresses_validation(
        errors in arb_field_errors(6),
        priority in arb_priority(),
    ) {
        let mut errors = errors;
        let mut sentinel = FieldError::new("version", "Record was modified");
        sentinel.priority = priority;
        errors.push(sentinel);

        let classification = classify(&RawError::with_body(409, validation_body(&errors)));
        prop_assert!(classification.is_version_conflict());
        prop_assert!(classification.validation().is_none());
    }

    #[test]
    fn classify_is_total(status in 100u16..600, body in prop::option::of("[ -~]{0,40}")) {
        let raw = match body {
            Some(text) => RawError::from_response(status, text.as_bytes()),
            None => RawError::network("connection reset"),
        };
        let classification = classify(&raw);
        prop_assert!(!classification.tags().is_empty());
        if status == 429 && !raw.is_network() {
            prop_assert!(classification.is_rate_limited());
        }
    }
}

#[test]
fn unknown_discriminator_is_unknown() {
    let classification = classify(&RawError::with_body(400, json!({"type": 42})));
    assert!(matches!(classification.tags(), [ClassifiedError::Unknown { .. }]));
}
