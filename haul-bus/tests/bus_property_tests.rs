use haul_bus::{deliver, delay_schedule, next_delay, Delivery};
use haul_cache::CacheStore;
use haul_core::{BusConfig, QueryKey};
use haul_test_utils::generators::{arb_malformed_invalidation, arb_query_key};
use haul_test_utils::recording_store;
use proptest::prelude::*;
use serde_json::json;
use std::time::Duration;

fn arb_bus_config() -> impl Strategy<Value = BusConfig> {
    (1u32..=12, 1u64..=5_000, 0u64..=60_000).prop_map(|(attempts, initial, extra)| BusConfig {
        max_retry_attempts: attempts,
        initial_retry_delay_ms: initial,
        max_retry_delay_ms: initial + extra,
        ..BusConfig::default()
    })
}

proptest! {
    #[test]
    fn backoff_is_non_decreasing_and_bounded(config in arb_bus_config()) {
        let schedule = delay_schedule(&config);
        let cap = Duration::from_millis(config.max_retry_delay_ms);

        prop_assert_eq!(schedule.len() as u32, config.max_retry_attempts - 1);
        prop_assert!(schedule.windows(2).all(|w| w[0] <= w[1]));
        prop_assert!(schedule.iter().all(|d| *d <= cap));
        if let Some(first) = schedule.first() {
            prop_assert_eq!(*first, Duration::from_millis(config.initial_retry_delay_ms));
        }
    }

    #[test]
    fn next_delay_never_exceeds_cap(config in arb_bus_config(), attempt in any::<u32>()) {
        prop_assert!(next_delay(attempt, &config) <= Duration::from_millis(config.max_retry_delay_ms));
    }

    #[test]
    fn malformed_payload_never_touches_store(
        payload in arb_malformed_invalidation(),
        keys in prop::collection::vec(arb_query_key(), 1..6),
    ) {
        let (store, refetcher) = recording_store();
        for key in &keys {
            store.set(key, json!({"cached": true}));
        }
        let before = store.stats();
        let _observers: Vec<_> = keys.iter().map(|key| store.observe(key)).collect();

        prop_assert_eq!(deliver(&store, "self", &payload), Delivery::Malformed);

        for key in &keys {
            prop_assert!(!store.is_stale(key));
            prop_assert_eq!(store.get(key), Some(json!({"cached": true})));
        }
        prop_assert!(refetcher.keys().is_empty());
        prop_assert_eq!(store.stats().invalidations, before.invalidations);
    }

    #[test]
    fn valid_exact_payload_marks_only_listed_keys(keys in prop::collection::vec(arb_query_key(), 1..6)) {
        let (store, _) = recording_store();
        for key in &keys {
            store.set(key, json!(0));
        }
        let target: &QueryKey = &keys[0];
        let delivery = deliver(
            &store,
            "self",
            &json!({"type": "invalidate", "queryKeys": [target.token()]}),
        );

        let applied = matches!(delivery, Delivery::Applied { marked } if marked >= 1);
        prop_assert!(applied, "unexpected delivery {:?}", delivery);
        for key in &keys {
            prop_assert_eq!(store.is_stale(key), key.token() == target.token());
        }
    }
}
