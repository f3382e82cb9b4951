//! Error types for Haul operations

use crate::QueryKey;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Cross-context transport errors.
///
/// These never reach the end user; they are logged on the debug channel and
/// drive the reconnect schedule.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transport construction failed for channel {channel}: {reason}")]
    ConstructionFailed { channel: String, reason: String },

    #[error("Transport for channel {channel} is closed")]
    Closed { channel: String },

    #[error("Failed to post on channel {channel}: {reason}")]
    PostFailed { channel: String, reason: String },
}

/// Cache store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Refetch queue closed, dropped refetch for {key}")]
    RefetchQueueClosed { key: QueryKey },

    #[error("Refetch queue full, dropped refetch for {key}")]
    RefetchQueueFull { key: QueryKey },

    #[error("Fetch failed for {key}: {reason}")]
    FetchFailed { key: QueryKey, reason: String },
}

/// Master error type for all Haul errors.
#[derive(Debug, Error)]
pub enum HaulError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

/// Result type alias for Haul operations.
pub type HaulResult<T> = Result<T, HaulError>;

// =============================================================================
// TESTS
// =============================================================================
