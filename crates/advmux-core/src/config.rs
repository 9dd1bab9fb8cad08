//! Scheduler Configuration
//!
//! Table sizes, retry bounds and timing used by the advertising manager.

use core::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{AdvmuxError, Result};

// ----------------------------------------------------------------------------
// Manager Configuration
// ----------------------------------------------------------------------------

/// Configuration for [`AdvertisingManager`](crate::AdvertisingManager)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Maximum number of registered items
    pub max_items: usize,
    /// Maximum number of concurrent groups
    pub max_groups: usize,
    /// Hardware advertising sets the controller supports
    pub max_advertising_sets: usize,
    /// Extra attempts for a random address write rejected as busy
    pub address_retry_limit: u8,
    /// Delay between checks for quiescent sets while a refresh is held
    #[serde(with = "duration_millis")]
    pub refresh_recheck: Duration,
    /// Seed for rotation timeout jitter
    pub rng_seed: u64,
    /// Initial state of the global advertising switch
    pub advertising_allowed: bool,
    /// Initial state of the global connectable switch
    pub connectable_allowed: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_items: 32,
            max_groups: 8,
            max_advertising_sets: 5,
            address_retry_limit: 2,
            refresh_recheck: Duration::from_millis(50),
            rng_seed: 0x5EED_AD5E,
            advertising_allowed: true,
            connectable_allowed: true,
        }
    }
}

impl ManagerConfig {
    /// Small tables for unit and scenario tests
    pub fn testing() -> Self {
        Self {
            max_items: 16,
            rng_seed: 7,
            ..Self::default()
        }
    }

    /// Controller with a single advertising set
    pub fn constrained() -> Self {
        Self {
            max_items: 8,
            max_groups: 2,
            max_advertising_sets: 1,
            ..Self::default()
        }
    }

    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items;
        self
    }

    pub fn with_max_groups(mut self, max_groups: usize) -> Self {
        self.max_groups = max_groups;
        self
    }

    pub fn with_max_advertising_sets(mut self, sets: usize) -> Self {
        self.max_advertising_sets = sets;
        self
    }

    pub fn with_address_retry_limit(mut self, limit: u8) -> Self {
        self.address_retry_limit = limit;
        self
    }

    pub fn with_refresh_recheck(mut self, delay: Duration) -> Self {
        self.refresh_recheck = delay;
        self
    }

    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = seed;
        self
    }

    /// Reject configurations the manager cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_items == 0 {
            return Err(AdvmuxError::config_error("max_items must be non-zero"));
        }
        if self.max_groups == 0 {
            return Err(AdvmuxError::config_error("max_groups must be non-zero"));
        }
        if self.max_advertising_sets == 0 || self.max_advertising_sets > u8::MAX as usize {
            return Err(AdvmuxError::config_error(
                "max_advertising_sets must be between 1 and 255",
            ));
        }
        if self.refresh_recheck.is_zero() {
            return Err(AdvmuxError::config_error("refresh_recheck must be non-zero"));
        }
        Ok(())
    }
}

/// Serialize durations as whole milliseconds
pub mod duration_millis {
    use core::time::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sizing() {
        let config = ManagerConfig::default();
        assert_eq!(config.max_groups, 8);
        assert_eq!(config.max_advertising_sets, 5);
        assert_eq!(config.address_retry_limit, 2);
        assert_eq!(config.refresh_recheck, Duration::from_millis(50));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_tables() {
        assert!(ManagerConfig::default().with_max_groups(0).validate().is_err());
        assert!(ManagerConfig::default()
            .with_max_advertising_sets(0)
            .validate()
            .is_err());
        assert!(ManagerConfig::default()
            .with_refresh_recheck(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn test_serde_fills_missing_fields() {
        let config: ManagerConfig =
            serde_json::from_str(r#"{"max_advertising_sets": 3, "refresh_recheck": 20}"#).unwrap();
        assert_eq!(config.max_advertising_sets, 3);
        assert_eq!(config.refresh_recheck, Duration::from_millis(20));
        assert_eq!(config.max_groups, 8);
    }
}
