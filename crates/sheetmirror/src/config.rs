//! Tunables of the sync engine

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default `user` attached to every write
pub const DEFAULT_USER: &str = "Web App User";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid config value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Timing and retry configuration for the gateway and the reconciler.
///
/// Every field has a default so a config file only needs to name what it
/// overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Cadence of the periodic reconciler
    pub sync_interval_ms: u64,
    /// Quiet period after a write during which reconciliation is skipped
    pub cooldown_ms: u64,
    /// Bound on a single read attempt
    pub read_timeout_ms: u64,
    /// Attempts per read before degrading to an empty result
    pub read_retries: u32,
    /// Linear backoff unit: attempt `n` waits `n * read_backoff_ms`
    pub read_backoff_ms: u64,
    pub user: String,
    /// Capacity of the mirror event and notification channels
    pub event_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_interval_ms: 60_000,
            cooldown_ms: 15_000,
            read_timeout_ms: 45_000,
            read_retries: 3,
            read_backoff_ms: 1_000,
            user: DEFAULT_USER.to_string(),
            event_buffer: 256,
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "sync_interval_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.read_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "read_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.read_retries == 0 {
            return Err(ConfigError::Invalid {
                field: "read_retries",
                reason: "at least one attempt is required".to_string(),
            });
        }
        if self.event_buffer == 0 {
            return Err(ConfigError::Invalid {
                field: "event_buffer",
                reason: "broadcast channels need a capacity of at least one".to_string(),
            });
        }
        if self.user.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "user",
                reason: "must not be blank".to_string(),
            });
        }
        Ok(())
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Wait after the given (1-based) failed attempt
    pub fn read_backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.read_backoff_ms.saturating_mul(u64::from(attempt)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_console() {
        let config = SyncConfig::default();
        assert_eq!(config.sync_interval(), Duration::from_secs(60));
        assert_eq!(config.cooldown(), Duration::from_secs(15));
        assert_eq!(config.read_timeout(), Duration::from_secs(45));
        assert_eq!(config.read_backoff(2), Duration::from_secs(2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_other_defaults() {
        let config: SyncConfig = serde_json::from_str(r#"{"cooldown_ms": 500}"#).unwrap();
        assert_eq!(config.cooldown_ms, 500);
        assert_eq!(config.read_retries, 3);
        assert_eq!(config.user, DEFAULT_USER);
    }

    #[test]
    fn zero_retries_is_rejected() {
        let config = SyncConfig {
            read_retries: 0,
            ..SyncConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "read_retries",
                ..
            })
        ));
    }
}
