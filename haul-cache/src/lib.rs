//! Haul Cache - Query Cache Store
//!
//! Defines the [`CacheStore`] abstraction the mutation executor and the
//! invalidation bus write through, plus an in-memory implementation with
//! observer tracking and queued refetches.

pub mod matcher;
pub mod memory;
pub mod refetch;
pub mod store;

pub use matcher::{ExactMatcher, KeyMatcher, SegmentMatcher, SubstringMatcher};
pub use memory::{InMemoryCacheStore, Observer};
pub use refetch::{QueryFetcher, RefetchQueue, RefetchReceiver, RefetchScheduler, RefetchWorker};
pub use store::{CacheEntry, CacheStats, CacheStore, InvalidateOptions};
