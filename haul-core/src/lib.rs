//! Haul Core - Shared Types for the Cache-Coherence Layer
//!
//! This crate holds everything the cache, bus and mutation crates agree on:
//!
//! - [`QueryKey`]: structural identifier of a cached query
//! - [`InvalidationMessage`]: the cross-context wire contract
//! - [`FieldError`] and [`Priority`]: field-scoped server failures
//! - [`RawError`] and [`classify`]: failure taxonomy for optimistic writes
//! - [`HaulConfig`]: bus and cache tunables
//! - [`InvalidationPublisher`]: the seam the executor publishes through
//!
//! Nothing here performs I/O or spawns tasks.

pub mod classify;
pub mod config;
pub mod error;
pub mod field;
pub mod key;
pub mod message;
pub mod publish;
pub mod raw;

pub use classify::{
    classify, Classification, ClassifiedError, FieldBuckets, UnknownReason, VERSION_FIELD,
    VERSION_MISMATCH_CODE,
};
pub use config::{BusConfig, CacheConfig, HaulConfig};
pub use error::{CacheError, ConfigError, HaulError, HaulResult, TransportError};
pub use field::{FieldError, Priority};
pub use key::QueryKey;
pub use message::{correlation_id, InvalidationMessage, MatchMode, RefetchScope};
pub use publish::{InvalidationPublisher, LocalOnly};
pub use raw::RawError;
