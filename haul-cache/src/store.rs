//! Cache store trait and statistics.

use chrono::{DateTime, Utc};
use haul_core::{MatchMode, QueryKey, RefetchScope};
use serde_json::Value;
use std::sync::Arc;

/// A cached query result.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: QueryKey,
    pub value: Value,
    pub last_updated: DateTime<Utc>,
    /// Set by invalidation, cleared by the next `set`.
    pub stale: bool,
    /// Store-wide write sequence number of the last write to this entry.
    pub revision: u64,
}

/// Options for [`CacheStore::invalidate`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvalidateOptions {
    pub mode: MatchMode,
    pub refetch: RefetchScope,
}

impl InvalidateOptions {
    pub fn exact(refetch: RefetchScope) -> Self {
        Self {
            mode: MatchMode::Exact,
            refetch,
        }
    }

    pub fn predicate(refetch: RefetchScope) -> Self {
        Self {
            mode: MatchMode::Predicate,
            refetch,
        }
    }
}

/// The per-context query cache.
///
/// All operations are synchronous; within a context they are totally
/// ordered. Implementations must be safe to share across tasks.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &QueryKey) -> Option<Value>;

    fn set(&self, key: &QueryKey, value: Value);

    /// Drop an entry, returning its value.
    fn remove(&self, key: &QueryKey) -> Option<Value>;

    /// Mark matching entries stale and schedule refetches for those inside
    /// `options.refetch`. Returns the number of entries marked.
    fn invalidate(&self, targets: &[String], options: InvalidateOptions) -> usize;

    /// Mark `key` stale (if cached) and unconditionally schedule a refetch.
    fn refetch(&self, key: &QueryKey);

    fn keys(&self) -> Vec<QueryKey>;

    /// Taken before a refetch reads from the server.
    fn refetch_ticket(&self) -> u64;

    /// Write back a refetch result taken under `ticket`; `None` drops the
    /// entry.
    ///
    /// Refused while `key` is held, or if `key` was written or held after
    /// the ticket was taken. Returns whether the result was applied.
    fn apply_refetch(&self, key: &QueryKey, fetched: Option<Value>, ticket: u64) -> bool;

    /// Discard refetch results for `key`, including ones already in flight,
    /// until the matching [`CacheStore::release_refetches`]. Holds nest.
    fn hold_refetches(&self, key: &QueryKey);

    fn release_refetches(&self, key: &QueryKey);
}

impl<T: CacheStore + ?Sized> CacheStore for Arc<T> {
    fn get(&self, key: &QueryKey) -> Option<Value> {
        (**self).get(key)
    }

    fn set(&self, key: &QueryKey, value: Value) {
        (**self).set(key, value)
    }

    fn remove(&self, key: &QueryKey) -> Option<Value> {
        (**self).remove(key)
    }

    fn invalidate(&self, targets: &[String], options: InvalidateOptions) -> usize {
        (**self).invalidate(targets, options)
    }

    fn refetch(&self, key: &QueryKey) {
        (**self).refetch(key)
    }

    fn keys(&self) -> Vec<QueryKey> {
        (**self).keys()
    }

    fn refetch_ticket(&self) -> u64 {
        (**self).refetch_ticket()
    }

    fn apply_refetch(&self, key: &QueryKey, fetched: Option<Value>, ticket: u64) -> bool {
        (**self).apply_refetch(key, fetched, ticket)
    }

    fn hold_refetches(&self, key: &QueryKey) {
        (**self).hold_refetches(key)
    }

    fn release_refetches(&self, key: &QueryKey) {
        (**self).release_refetches(key)
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries marked stale by invalidation.
    pub invalidations: u64,
    /// Refetches handed to the scheduler.
    pub refetches_scheduled: u64,
    pub entry_count: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
