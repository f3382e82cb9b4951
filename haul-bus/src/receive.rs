//! Applying received payloads to the local cache.

use haul_cache::{CacheStore, InvalidateOptions};
use haul_core::InvalidationMessage;
use serde_json::Value;
use tracing::{debug, trace};

/// What happened to one received payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Valid invalidation; `marked` entries went stale.
    Applied { marked: usize },
    /// Published by this context; already handled locally.
    OwnOrigin,
    /// Failed shape validation and was dropped.
    Malformed,
}

/// Validate `payload` and apply it to `store`.
///
/// Never fails: anything that is not a well-formed invalidation from another
/// context leaves the store untouched.
pub fn deliver<S>(store: &S, own_origin: &str, payload: &Value) -> Delivery
where
    S: CacheStore + ?Sized,
{
    let Some(message) = InvalidationMessage::from_wire(payload) else {
        trace!("Dropped malformed invalidation payload");
        return Delivery::Malformed;
    };
    if message.origin() == Some(own_origin) {
        return Delivery::OwnOrigin;
    }

    let options = InvalidateOptions {
        mode: message.match_mode(),
        refetch: message.refetch_scope(),
    };
    let marked = store.invalidate(message.target_keys(), options);
    debug!(
        keys = ?message.target_keys(),
        correlation_id = message.correlation_id().unwrap_or("-"),
        marked,
        "Applied remote invalidation"
    );
    Delivery::Applied { marked }
}

#[cfg(test)]
mod tests {
    use super::*;
    use haul_cache::{InMemoryCacheStore, RefetchScheduler};
    use haul_core::{CacheError, QueryKey};
    use serde_json::json;
    use std::sync::Arc;

    struct NoRefetch;

    impl RefetchScheduler for NoRefetch {
        fn schedule(&self, _key: &QueryKey) -> Result<(), CacheError> {
            Ok(())
        }
    }

    fn store() -> InMemoryCacheStore {
        InMemoryCacheStore::new(Arc::new(NoRefetch))
    }

    #[test]
    fn test_valid_message_marks_entries() {
        let store = store();
        store.set(&QueryKey::from("order-1"), json!({}));
        let delivery = deliver(
            &store,
            "me",
            &json!({"type": "invalidate", "queryKeys": ["order-1"]}),
        );
        assert_eq!(delivery, Delivery::Applied { marked: 1 });
        assert!(store.is_stale(&QueryKey::from("order-1")));
    }

    #[test]
    fn test_own_origin_is_skipped() {
        let store = store();
        store.set(&QueryKey::from("order-1"), json!({}));
        let delivery = deliver(
            &store,
            "me",
            &json!({"type": "invalidate", "queryKeys": ["order-1"], "origin": "me"}),
        );
        assert_eq!(delivery, Delivery::OwnOrigin);
        assert!(!store.is_stale(&QueryKey::from("order-1")));
    }

    #[test]
    fn test_wrong_type_is_malformed() {
        let store = store();
        store.set(&QueryKey::from("order-1"), json!({}));
        let delivery = deliver(
            &store,
            "me",
            &json!({"type": "refresh", "queryKeys": ["order-1"]}),
        );
        assert_eq!(delivery, Delivery::Malformed);
        assert!(!store.is_stale(&QueryKey::from("order-1")));
    }
}
