//! In-memory cache store.

use chrono::Utc;
use haul_core::{MatchMode, QueryKey};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

use crate::matcher::{ExactMatcher, KeyMatcher, SubstringMatcher};
use crate::refetch::RefetchScheduler;
use crate::store::{CacheEntry, CacheStats, CacheStore, InvalidateOptions};

/// Process-local query cache.
///
/// Cloning is cheap and every clone shares the same entries. Observers
/// registered through [`InMemoryCacheStore::observe`] decide whether an
/// entry counts as active for refetch scoping.
#[derive(Clone)]
pub struct InMemoryCacheStore {
    inner: Arc<Inner>,
}

struct Inner {
    entries: RwLock<HashMap<QueryKey, CacheEntry>>,
    observers: Mutex<HashMap<QueryKey, usize>>,
    holds: Mutex<HashMap<QueryKey, usize>>,
    sequence: AtomicU64,
    scheduler: Arc<dyn RefetchScheduler>,
    predicate: Arc<dyn KeyMatcher>,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
    refetches_scheduled: AtomicU64,
}

impl Inner {
    fn entries(&self) -> RwLockReadGuard<'_, HashMap<QueryKey, CacheEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn entries_mut(&self) -> RwLockWriteGuard<'_, HashMap<QueryKey, CacheEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn observers(&self) -> MutexGuard<'_, HashMap<QueryKey, usize>> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn holds(&self) -> MutexGuard<'_, HashMap<QueryKey, usize>> {
        self.holds.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_revision(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Bump the revision of `key` so refetches already in flight are refused.
    fn touch(&self, key: &QueryKey) {
        let mut entries = self.entries_mut();
        if let Some(entry) = entries.get_mut(key) {
            entry.revision = self.next_revision();
        }
    }

    fn schedule(&self, key: &QueryKey) {
        match self.scheduler.schedule(key) {
            Ok(()) => {
                self.refetches_scheduled.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => warn!(key = %key, error = %err, "Refetch not scheduled"),
        }
    }
}

impl InMemoryCacheStore {
    /// Store using [`SubstringMatcher`] for predicate invalidation.
    pub fn new(scheduler: Arc<dyn RefetchScheduler>) -> Self {
        Self::with_matcher(scheduler, Arc::new(SubstringMatcher))
    }

    /// Store with an explicit predicate matcher.
    pub fn with_matcher(scheduler: Arc<dyn RefetchScheduler>, predicate: Arc<dyn KeyMatcher>) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: RwLock::new(HashMap::new()),
                observers: Mutex::new(HashMap::new()),
                holds: Mutex::new(HashMap::new()),
                sequence: AtomicU64::new(0),
                scheduler,
                predicate,
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                invalidations: AtomicU64::new(0),
                refetches_scheduled: AtomicU64::new(0),
            }),
        }
    }

    /// Register interest in `key`; the entry is active while the guard lives.
    pub fn observe(&self, key: &QueryKey) -> Observer {
        *self.inner.observers().entry(key.clone()).or_insert(0) += 1;
        Observer {
            inner: Arc::clone(&self.inner),
            key: key.clone(),
        }
    }

    pub fn observer_count(&self, key: &QueryKey) -> usize {
        self.inner.observers().get(key).copied().unwrap_or(0)
    }

    /// Full entry including metadata.
    pub fn entry(&self, key: &QueryKey) -> Option<CacheEntry> {
        self.inner.entries().get(key).cloned()
    }

    pub fn is_stale(&self, key: &QueryKey) -> bool {
        self.inner
            .entries()
            .get(key)
            .map(|entry| entry.stale)
            .unwrap_or(false)
    }

    pub fn predicate_matcher(&self) -> &'static str {
        self.inner.predicate.name()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            invalidations: self.inner.invalidations.load(Ordering::Relaxed),
            refetches_scheduled: self.inner.refetches_scheduled.load(Ordering::Relaxed),
            entry_count: self.inner.entries().len() as u64,
        }
    }
}

impl CacheStore for InMemoryCacheStore {
    fn get(&self, key: &QueryKey) -> Option<Value> {
        let value = self.inner.entries().get(key).map(|entry| entry.value.clone());
        let counter = if value.is_some() {
            &self.inner.hits
        } else {
            &self.inner.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        value
    }

    fn set(&self, key: &QueryKey, value: Value) {
        let mut entries = self.inner.entries_mut();
        entries.insert(
            key.clone(),
            CacheEntry {
                key: key.clone(),
                value,
                last_updated: Utc::now(),
                stale: false,
                revision: self.inner.next_revision(),
            },
        );
    }

    fn remove(&self, key: &QueryKey) -> Option<Value> {
        self.inner.entries_mut().remove(key).map(|entry| entry.value)
    }

    fn invalidate(&self, targets: &[String], options: InvalidateOptions) -> usize {
        let matcher: &dyn KeyMatcher = match options.mode {
            MatchMode::Exact => &ExactMatcher,
            MatchMode::Predicate => self.inner.predicate.as_ref(),
        };

        let marked: Vec<QueryKey> = {
            let mut entries = self.inner.entries_mut();
            entries
                .values_mut()
                .filter(|entry| targets.iter().any(|t| matcher.matches(&entry.key, t)))
                .map(|entry| {
                    entry.stale = true;
                    entry.key.clone()
                })
                .collect()
        };
        self.inner
            .invalidations
            .fetch_add(marked.len() as u64, Ordering::Relaxed);

        let to_refetch: Vec<&QueryKey> = {
            let observers = self.inner.observers();
            marked
                .iter()
                .filter(|key| {
                    let count = observers.get(*key).copied().unwrap_or(0);
                    options.refetch.includes(count)
                })
                .collect()
        };
        for key in &to_refetch {
            self.inner.schedule(key);
        }

        debug!(
            matcher = matcher.name(),
            targets = ?targets,
            marked = marked.len(),
            refetched = to_refetch.len(),
            scope = options.refetch.as_str(),
            "Invalidated cache entries"
        );
        marked.len()
    }

    fn refetch(&self, key: &QueryKey) {
        if let Some(entry) = self.inner.entries_mut().get_mut(key) {
            entry.stale = true;
        }
        self.inner.schedule(key);
    }

    fn keys(&self) -> Vec<QueryKey> {
        self.inner.entries().keys().cloned().collect()
    }

    fn refetch_ticket(&self) -> u64 {
        self.inner.sequence.load(Ordering::SeqCst)
    }

    fn apply_refetch(&self, key: &QueryKey, fetched: Option<Value>, ticket: u64) -> bool {
        let holds = self.inner.holds();
        if holds.contains_key(key) {
            return false;
        }
        let mut entries = self.inner.entries_mut();
        if entries.get(key).is_some_and(|entry| entry.revision > ticket) {
            return false;
        }
        match fetched {
            Some(value) => {
                entries.insert(
                    key.clone(),
                    CacheEntry {
                        key: key.clone(),
                        value,
                        last_updated: Utc::now(),
                        stale: false,
                        revision: self.inner.next_revision(),
                    },
                );
            }
            None => {
                entries.remove(key);
            }
        }
        true
    }

    fn hold_refetches(&self, key: &QueryKey) {
        let mut holds = self.inner.holds();
        *holds.entry(key.clone()).or_insert(0) += 1;
        self.inner.touch(key);
    }

    fn release_refetches(&self, key: &QueryKey) {
        let mut holds = self.inner.holds();
        if let Some(count) = holds.get_mut(key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                holds.remove(key);
            }
        }
        // Fetches started while held read pre-release server state.
        self.inner.touch(key);
    }
}

/// Guard returned by [`InMemoryCacheStore::observe`].
pub struct Observer {
    inner: Arc<Inner>,
    key: QueryKey,
}

impl Observer {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }
}

impl Drop for Observer {
    fn drop(&mut self) {
        let mut observers = self.inner.observers();
        if let Some(count) = observers.get_mut(&self.key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                observers.remove(&self.key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::SegmentMatcher;
    use haul_core::{CacheError, RefetchScope};
    use serde_json::json;

    #[derive(Default)]
    struct Recorder {
        keys: Mutex<Vec<QueryKey>>,
    }

    impl RefetchScheduler for Recorder {
        fn schedule(&self, key: &QueryKey) -> Result<(), CacheError> {
            self.keys.lock().unwrap().push(key.clone());
            Ok(())
        }
    }

    fn store() -> (InMemoryCacheStore, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        (InMemoryCacheStore::new(recorder.clone()), recorder)
    }

    fn scheduled(recorder: &Recorder) -> Vec<QueryKey> {
        let mut keys = recorder.keys.lock().unwrap().clone();
        keys.sort();
        keys
    }

    #[test]
    fn test_set_get_remove() {
        let (store, _) = store();
        let key = QueryKey::from("order-1");
        assert_eq!(store.get(&key), None);
        store.set(&key, json!({"status": "NEW"}));
        assert_eq!(store.get(&key), Some(json!({"status": "NEW"})));
        assert_eq!(store.remove(&key), Some(json!({"status": "NEW"})));
        assert_eq!(store.get(&key), None);

        let stats = store.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
    }

    #[test]
    fn test_exact_invalidation_marks_only_listed_keys() {
        let (store, recorder) = store();
        store.set(&QueryKey::from("order-1"), json!(1));
        store.set(&QueryKey::from("order-10"), json!(10));

        let marked = store.invalidate(
            &["order-1".to_string()],
            InvalidateOptions::exact(RefetchScope::All),
        );
        assert_eq!(marked, 1);
        assert!(store.is_stale(&QueryKey::from("order-1")));
        assert!(!store.is_stale(&QueryKey::from("order-10")));
        assert_eq!(scheduled(&recorder), vec![QueryKey::from("order-1")]);
    }

    #[test]
    fn test_predicate_invalidation_uses_substring() {
        let (store, _) = store();
        store.set(&QueryKey::new(["order-list", "page=1"]), json!([]));
        store.set(&QueryKey::from("order-list"), json!([]));
        store.set(&QueryKey::from("order-1"), json!({}));

        let marked = store.invalidate(
            &["order-list".to_string()],
            InvalidateOptions::predicate(RefetchScope::Active),
        );
        assert_eq!(marked, 2);
        assert!(!store.is_stale(&QueryKey::from("order-1")));
    }

    #[test]
    fn test_segment_matcher_can_replace_substring() {
        let recorder = Arc::new(Recorder::default());
        let store = InMemoryCacheStore::with_matcher(recorder, Arc::new(SegmentMatcher));
        store.set(&QueryKey::from("reorder"), json!(1));
        store.set(&QueryKey::new(["order", "1"]), json!(2));

        let marked = store.invalidate(
            &["order".to_string()],
            InvalidateOptions::predicate(RefetchScope::All),
        );
        assert_eq!(marked, 1);
        assert_eq!(store.predicate_matcher(), "segment");
        assert!(!store.is_stale(&QueryKey::from("reorder")));
    }

    #[test]
    fn test_refetch_scope_follows_observers() {
        let (store, recorder) = store();
        let active = QueryKey::from("order-active");
        let idle = QueryKey::from("order-idle");
        store.set(&active, json!(1));
        store.set(&idle, json!(2));
        let _guard = store.observe(&active);

        store.invalidate(&["order".to_string()], InvalidateOptions::predicate(RefetchScope::Active));
        assert_eq!(scheduled(&recorder), vec![active.clone()]);

        recorder.keys.lock().unwrap().clear();
        store.invalidate(&["order".to_string()], InvalidateOptions::predicate(RefetchScope::Inactive));
        assert_eq!(scheduled(&recorder), vec![idle.clone()]);

        // Both stay stale regardless of scope.
        assert!(store.is_stale(&active));
        assert!(store.is_stale(&idle));
    }

    #[test]
    fn test_observer_guard_releases() {
        let (store, _) = store();
        let key = QueryKey::from("k");
        let a = store.observe(&key);
        let b = store.observe(&key);
        assert_eq!(store.observer_count(&key), 2);
        drop(a);
        assert_eq!(store.observer_count(&key), 1);
        drop(b);
        assert_eq!(store.observer_count(&key), 0);
    }

    #[test]
    fn test_set_clears_stale() {
        let (store, _) = store();
        let key = QueryKey::from("k");
        store.set(&key, json!(1));
        store.refetch(&key);
        assert!(store.is_stale(&key));
        store.set(&key, json!(2));
        assert!(!store.is_stale(&key));
    }

    #[test]
    fn test_refetch_schedules_even_without_entry() {
        let (store, recorder) = store();
        store.refetch(&QueryKey::from("missing"));
        assert_eq!(scheduled(&recorder), vec![QueryKey::from("missing")]);
        assert_eq!(store.stats().refetches_scheduled, 1);
    }

    #[test]
    fn test_refetch_result_older_than_write_is_refused() {
        let (store, _) = store();
        let key = QueryKey::from("order-1");
        store.set(&key, json!({"status": "NEW"}));

        let ticket = store.refetch_ticket();
        store.set(&key, json!({"status": "DONE"}));
        assert!(!store.apply_refetch(&key, Some(json!({"status": "NEW"})), ticket));
        assert_eq!(store.get(&key), Some(json!({"status": "DONE"})));

        let ticket = store.refetch_ticket();
        assert!(store.apply_refetch(&key, Some(json!({"status": "DONE", "v": 2})), ticket));
        assert_eq!(store.get(&key), Some(json!({"status": "DONE", "v": 2})));
    }

    #[test]
    fn test_held_key_refuses_refetches_until_released() {
        let (store, _) = store();
        let key = QueryKey::from("order-1");
        store.set(&key, json!(1));

        let before = store.refetch_ticket();
        store.hold_refetches(&key);
        store.hold_refetches(&key);
        let during = store.refetch_ticket();
        assert!(!store.apply_refetch(&key, Some(json!(2)), during));

        store.release_refetches(&key);
        assert!(!store.apply_refetch(&key, None, store.refetch_ticket()));

        store.release_refetches(&key);
        assert!(!store.apply_refetch(&key, Some(json!(3)), before));
        assert!(!store.apply_refetch(&key, Some(json!(3)), during));
        assert_eq!(store.get(&key), Some(json!(1)));

        assert!(store.apply_refetch(&key, None, store.refetch_ticket()));
        assert_eq!(store.get(&key), None);
    }

    #[test]
    fn test_invalidate_with_no_targets_is_noop() {
        let (store, recorder) = store();
        store.set(&QueryKey::from("k"), json!(1));
        assert_eq!(store.invalidate(&[], InvalidateOptions::default()), 0);
        assert!(scheduled(&recorder).is_empty());
    }
}
