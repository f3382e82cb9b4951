//! Configuration loading for Haul.
//!
//! A TOML file may be supplied with `--config <path>` or the `HAUL_CONFIG`
//! environment variable. Every field in the file is required; when no file
//! is given the built-in defaults apply.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Give up on channel construction after this many consecutive failures.
pub const MAX_RETRY_ATTEMPTS: u32 = 5;
/// Delay before the first reconnect attempt.
pub const INITIAL_RETRY_DELAY_MS: u64 = 1_000;
/// Upper bound on any reconnect delay.
pub const MAX_RETRY_DELAY_MS: u64 = 10_000;
/// Liveness heartbeat period.
pub const HEARTBEAT_INTERVAL_MS: u64 = 30_000;
/// How long a publish-only handle is kept before being closed.
pub const PUBLISH_RELEASE_MS: u64 = 100;
/// Name of the shared invalidation channel.
pub const DEFAULT_CHANNEL_NAME: &str = "query-invalidation";

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "HAUL_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HaulConfig {
    pub bus: BusConfig,
    pub cache: CacheConfig,
}

/// Invalidation bus tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BusConfig {
    pub channel_name: String,
    pub max_retry_attempts: u32,
    pub initial_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub publish_release_ms: u64,
}

/// Cache store tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Maximum refetches waiting for the worker before new ones are dropped.
    pub refetch_queue_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            channel_name: DEFAULT_CHANNEL_NAME.to_string(),
            max_retry_attempts: MAX_RETRY_ATTEMPTS,
            initial_retry_delay_ms: INITIAL_RETRY_DELAY_MS,
            max_retry_delay_ms: MAX_RETRY_DELAY_MS,
            heartbeat_interval_ms: HEARTBEAT_INTERVAL_MS,
            publish_release_ms: PUBLISH_RELEASE_MS,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            refetch_queue_capacity: 1_024,
        }
    }
}

impl BusConfig {
    pub fn initial_retry_delay(&self) -> Duration {
        Duration::from_millis(self.initial_retry_delay_ms)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn publish_release(&self) -> Duration {
        Duration::from_millis(self.publish_release_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "bus.channel_name",
                reason: "must not be empty".to_string(),
            });
        }
        if self.max_retry_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "bus.max_retry_attempts",
                reason: "must be > 0".to_string(),
            });
        }
        if self.initial_retry_delay_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "bus.initial_retry_delay_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.max_retry_delay_ms < self.initial_retry_delay_ms {
            return Err(ConfigError::InvalidValue {
                field: "bus.max_retry_delay_ms",
                reason: "must be >= initial_retry_delay_ms".to_string(),
            });
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "bus.heartbeat_interval_ms",
                reason: "must be > 0".to_string(),
            });
        }
        Ok(())
    }
}

impl HaulConfig {
    /// Load from `--config`/`HAUL_CONFIG`, or fall back to defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let config = match config_path_from_args().or_else(config_path_from_env) {
            Some(path) => Self::from_path(&path)?,
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: HaulConfig = toml::from_str(contents)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bus.validate()?;
        if self.cache.refetch_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache.refetch_queue_capacity",
                reason: "must be > 0".to_string(),
            });
        }
        Ok(())
    }
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var(CONFIG_ENV).ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[bus]
channel_name = "tms-invalidation"
max_retry_attempts = 3
initial_retry_delay_ms = 500
max_retry_delay_ms = 4000
heartbeat_interval_ms = 15000
publish_release_ms = 50

[cache]
refetch_queue_capacity = 64
"#;

    #[test]
    fn test_defaults_are_valid() {
        let config = HaulConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bus.max_retry_attempts, 5);
        assert_eq!(config.bus.initial_retry_delay(), Duration::from_secs(1));
        assert_eq!(config.bus.max_retry_delay(), Duration::from_secs(10));
        assert_eq!(config.bus.heartbeat_interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_parse_toml() {
        let config = HaulConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.bus.channel_name, "tms-invalidation");
        assert_eq!(config.bus.max_retry_attempts, 3);
        assert_eq!(config.cache.refetch_queue_capacity, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let toml = format!("{}\nunexpected = 1\n", SAMPLE);
        assert!(matches!(
            HaulConfig::from_toml(&toml),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_field_rejected() {
        let toml = SAMPLE.replace("publish_release_ms = 50\n", "");
        assert!(HaulConfig::from_toml(&toml).is_err());
    }

    #[test]
    fn test_max_delay_below_initial_rejected() {
        let mut config = HaulConfig::default();
        config.bus.max_retry_delay_ms = 10;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                field: "bus.max_retry_delay_ms",
                ..
            })
        ));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut config = HaulConfig::default();
        config.bus.max_retry_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_channel_rejected() {
        let mut config = HaulConfig::default();
        config.bus.channel_name = "  ".to_string();
        assert!(config.validate().is_err());
    }
}
