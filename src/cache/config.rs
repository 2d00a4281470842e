//! Cache configuration.
//!
//! Controls the response cache via the `[cache]` section of `postloop.toml`.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

// Default values for cache configuration
const DEFAULT_TTL_MS: u64 = 300_000;
const DEFAULT_MAX_SIZE: usize = 50;
const DEFAULT_SWEEP_INTERVAL_MS: u64 = 60_000;

/// Response cache configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Disabled caches miss on every read and drop every write.
    pub enabled: bool,
    /// Maximum entry age (ms) before it is treated as stale.
    pub ttl_ms: u64,
    /// Maximum number of cached responses.
    pub max_size: usize,
    /// Interval (ms) of the background expiry sweep.
    pub sweep_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_ms: DEFAULT_TTL_MS,
            max_size: DEFAULT_MAX_SIZE,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            ttl_ms: settings.ttl.as_millis() as u64,
            max_size: settings.max_size.get(),
            sweep_interval_ms: settings.sweep_interval.as_millis() as u64,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }

    /// Returns the size bound as NonZeroUsize, clamping to 1 if zero.
    pub fn max_size_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_size).unwrap_or(NonZeroUsize::MIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.ttl_ms, 300_000);
        assert_eq!(config.max_size, 50);
        assert_eq!(config.sweep_interval_ms, 60_000);
        assert_eq!(config.ttl(), Duration::from_secs(300));
    }

    #[test]
    fn non_zero_clamps_to_min() {
        let config = CacheConfig {
            max_size: 0,
            ..Default::default()
        };
        assert_eq!(config.max_size_non_zero().get(), 1);
    }

    #[test]
    fn zero_sweep_interval_is_clamped() {
        let config = CacheConfig {
            sweep_interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.sweep_interval(), Duration::from_millis(1));
    }
}
