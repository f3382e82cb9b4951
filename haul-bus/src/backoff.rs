//! Reconnect backoff policy.

use haul_core::BusConfig;
use std::time::Duration;

/// Delay before the retry that follows failed attempt `attempt` (zero-based).
///
/// `min(initial * 2^attempt, max)`, saturating instead of overflowing.
pub fn next_delay(attempt: u32, config: &BusConfig) -> Duration {
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    let millis = config
        .initial_retry_delay_ms
        .saturating_mul(factor)
        .min(config.max_retry_delay_ms);
    Duration::from_millis(millis)
}

/// Every wait the bus performs before giving up.
///
/// `max_retry_attempts` failures are separated by one fewer waits.
pub fn delay_schedule(config: &BusConfig) -> Vec<Duration> {
    (0..config.max_retry_attempts.saturating_sub(1))
        .map(|attempt| next_delay(attempt, config))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule() {
        let config = BusConfig::default();
        let secs: Vec<u64> = delay_schedule(&config).iter().map(Duration::as_secs).collect();
        assert_eq!(secs, vec![1, 2, 4, 8]);
    }

    #[test]
    fn test_delay_caps_at_max() {
        let config = BusConfig::default();
        assert_eq!(next_delay(4, &config), Duration::from_secs(10));
        assert_eq!(next_delay(63, &config), Duration::from_secs(10));
        assert_eq!(next_delay(u32::MAX, &config), Duration::from_secs(10));
    }

    #[test]
    fn test_single_attempt_has_no_waits() {
        let config = BusConfig {
            max_retry_attempts: 1,
            ..BusConfig::default()
        };
        assert!(delay_schedule(&config).is_empty());
    }
}
