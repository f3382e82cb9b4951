//! Haul Test Utilities
//!
//! Shared test infrastructure for the Haul workspace:
//! - Recording sinks, publishers and refetch schedulers
//! - A transport factory that fails a set number of times
//! - Proptest generators for field errors, keys and wire payloads

pub use haul_bus::{BroadcastHub, ChannelState, InvalidationBus};
pub use haul_cache::{CacheStore, InMemoryCacheStore};
pub use haul_core::{
    BusConfig, CacheError, FieldError, InvalidationMessage, Priority, QueryKey, TransportError,
};

use async_trait::async_trait;
use haul_bus::{Transport, TransportFactory};
use haul_cache::{QueryFetcher, RefetchScheduler};
use haul_core::InvalidationPublisher;
use haul_mutation::{FieldMessage, FormErrorSink, Notification, NotificationSink, WarningHandler};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Notify, Semaphore};

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// RECORDING SINKS
// ============================================================================

/// Form sink that remembers every field error and reset.
#[derive(Debug, Default)]
pub struct RecordingFormSink {
    errors: Mutex<Vec<(String, FieldMessage)>>,
    clears: AtomicUsize,
}

impl RecordingFormSink {
    pub fn errors(&self) -> Vec<(String, FieldMessage)> {
        guard(&self.errors).clone()
    }

    pub fn paths(&self) -> Vec<String> {
        guard(&self.errors).iter().map(|(path, _)| path.clone()).collect()
    }

    pub fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

impl FormErrorSink for RecordingFormSink {
    fn set_field_error(&self, path: &str, error: FieldMessage) {
        guard(&self.errors).push((path.to_string(), error));
    }

    fn clear_errors(&self) {
        guard(&self.errors).clear();
        self.clears.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notifications: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn notifications(&self) -> Vec<Notification> {
        guard(&self.notifications).clone()
    }

    pub fn count(&self) -> usize {
        guard(&self.notifications).len()
    }
}

impl NotificationSink for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        guard(&self.notifications).push(notification);
    }
}

#[derive(Debug, Default)]
pub struct RecordingWarnings {
    warnings: Mutex<Vec<FieldError>>,
}

impl RecordingWarnings {
    pub fn warnings(&self) -> Vec<FieldError> {
        guard(&self.warnings).clone()
    }
}

impl WarningHandler for RecordingWarnings {
    fn on_warnings(&self, warnings: Vec<FieldError>) {
        guard(&self.warnings).extend(warnings);
    }
}

/// Publisher that keeps messages instead of sending them.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    messages: Mutex<Vec<InvalidationMessage>>,
}

impl RecordingPublisher {
    pub fn messages(&self) -> Vec<InvalidationMessage> {
        guard(&self.messages).clone()
    }
}

impl InvalidationPublisher for RecordingPublisher {
    fn publish(&self, message: InvalidationMessage) {
        guard(&self.messages).push(message);
    }
}

/// Refetch scheduler that records keys in order.
#[derive(Debug, Default)]
pub struct RecordingRefetcher {
    keys: Mutex<Vec<QueryKey>>,
}

impl RecordingRefetcher {
    pub fn keys(&self) -> Vec<QueryKey> {
        guard(&self.keys).clone()
    }

    pub fn count_for(&self, key: &QueryKey) -> usize {
        guard(&self.keys).iter().filter(|k| *k == key).count()
    }

    pub fn clear(&self) {
        guard(&self.keys).clear();
    }
}

impl RefetchScheduler for RecordingRefetcher {
    fn schedule(&self, key: &QueryKey) -> Result<(), CacheError> {
        guard(&self.keys).push(key.clone());
        Ok(())
    }
}

/// Store wired to a fresh [`RecordingRefetcher`].
pub fn recording_store() -> (InMemoryCacheStore, Arc<RecordingRefetcher>) {
    let refetcher = Arc::new(RecordingRefetcher::default());
    (InMemoryCacheStore::new(refetcher.clone()), refetcher)
}

// ============================================================================
// MOCK FETCHER
// ============================================================================

/// Serves canned server values; unknown keys resolve to `None`.
#[derive(Debug, Default)]
pub struct MockFetcher {
    values: Mutex<HashMap<QueryKey, Value>>,
    fetches: AtomicUsize,
}

impl MockFetcher {
    pub fn with_value(self, key: impl Into<QueryKey>, value: Value) -> Self {
        guard(&self.values).insert(key.into(), value);
        self
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueryFetcher for MockFetcher {
    async fn fetch(&self, key: &QueryKey) -> Result<Option<Value>, CacheError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(guard(&self.values).get(key).cloned())
    }
}

/// Fetcher that reads its value when a fetch starts, then waits for
/// [`GatedFetcher::open`] before returning it. Models a slow server read
/// that began before a local write.
pub struct GatedFetcher {
    value: Mutex<Value>,
    gate: Semaphore,
    started: Notify,
    fetches: AtomicUsize,
}

impl GatedFetcher {
    pub fn new(value: Value) -> Self {
        Self {
            value: Mutex::new(value),
            gate: Semaphore::new(0),
            started: Notify::new(),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Change what later fetches will read.
    pub fn set_value(&self, value: Value) {
        *guard(&self.value) = value;
    }

    /// Wait until a fetch has read its value.
    pub async fn started(&self) {
        self.started.notified().await;
    }

    /// Let every pending and future fetch complete.
    pub fn open(&self) {
        self.gate.close();
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueryFetcher for GatedFetcher {
    async fn fetch(&self, _key: &QueryKey) -> Result<Option<Value>, CacheError> {
        let value = guard(&self.value).clone();
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        // A closed semaphore is the open gate.
        let _ = self.gate.acquire().await;
        Ok(Some(value))
    }
}

// ============================================================================
// FLAKY TRANSPORT
// ============================================================================

/// Fails the first `failures` opens, then delegates to a hub.
#[derive(Clone)]
pub struct FlakyTransportFactory {
    hub: BroadcastHub,
    remaining: Arc<AtomicU32>,
    opens: Arc<AtomicU32>,
}

impl FlakyTransportFactory {
    pub fn new(hub: BroadcastHub, failures: u32) -> Self {
        Self {
            hub,
            remaining: Arc::new(AtomicU32::new(failures)),
            opens: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Total open attempts, failed or not.
    pub fn opens(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn fail_next(&self, failures: u32) {
        self.remaining.store(failures, Ordering::SeqCst);
    }
}

impl TransportFactory for FlakyTransportFactory {
    fn open(&self, channel: &str) -> Result<Arc<dyn Transport>, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(TransportError::ConstructionFailed {
                channel: channel.to_string(),
                reason: "simulated construction failure".to_string(),
            });
        }
        self.hub.open(channel)
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Haul types.

    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    pub fn arb_priority() -> impl Strategy<Value = Option<Priority>> {
        prop_oneof![
            Just(None),
            Just(Some(Priority::High)),
            Just(Some(Priority::Medium)),
            Just(Some(Priority::Low)),
        ]
    }

    pub fn arb_field_error() -> impl Strategy<Value = FieldError> {
        ("[a-z]{1,8}(\\.[a-z0-9]{1,4}){0,2}", "[A-Za-z ]{1,24}", arb_priority()).prop_map(
            |(name, reason, priority)| FieldError {
                name,
                reason,
                code: None,
                priority,
            },
        )
    }

    /// Field errors with distinct names, none of them version sentinels.
    pub fn arb_field_errors(max: usize) -> impl Strategy<Value = Vec<FieldError>> {
        prop::collection::vec(arb_field_error(), 0..=max).prop_map(|errors| {
            let mut seen = std::collections::HashSet::new();
            errors
                .into_iter()
                .filter(|e| e.name != haul_core::VERSION_FIELD && seen.insert(e.name.clone()))
                .collect()
        })
    }

    pub fn arb_query_key() -> impl Strategy<Value = QueryKey> {
        prop::collection::vec("[a-z]{1,6}(-[0-9]{1,3})?", 1..=3).prop_map(QueryKey::new)
    }

    fn arb_scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            "[a-z-]{0,12}".prop_map(Value::from),
        ]
    }

    /// Payloads that must never be applied: wrong or missing discriminator,
    /// non-array `queryKeys`, non-string key entries, or not an object.
    pub fn arb_malformed_invalidation() -> impl Strategy<Value = Value> {
        let keys = prop::collection::vec("[a-z-]{1,10}", 0..4);
        prop_oneof![
            // Wrong discriminator.
            ("[a-z]{1,10}".prop_filter("not invalidate", |t| t != "invalidate"), keys.clone())
                .prop_map(|(kind, keys)| json!({"type": kind, "queryKeys": keys})),
            // Missing discriminator.
            keys.clone().prop_map(|keys| json!({"queryKeys": keys})),
            // Non-string discriminator.
            (arb_scalar(), keys.clone())
                .prop_filter("not a string", |(t, _)| !t.is_string())
                .prop_map(|(kind, keys)| json!({"type": kind, "queryKeys": keys})),
            // Non-array keys.
            arb_scalar().prop_map(|keys| json!({"type": "invalidate", "queryKeys": keys})),
            // Missing keys.
            Just(json!({"type": "invalidate"})),
            // Array with a non-string entry.
            (keys, any::<i64>()).prop_map(|(mut keys, n)| {
                let mut entries: Vec<Value> = keys.drain(..).map(Value::from).collect();
                entries.push(Value::from(n));
                json!({"type": "invalidate", "queryKeys": entries})
            }),
            // Not an object at all.
            arb_scalar(),
        ]
    }
}
