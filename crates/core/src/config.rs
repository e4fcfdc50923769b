//! Configuration for the CAS core.
//!
//! [`CasConfig`] ties together ticket issuance, the registry backend, the
//! registry cleaner and the session monitor. Every section has defaults, so
//! an empty document is a valid single-node, in-memory configuration:
//!
//! ```
//! use cas_core::{CasConfig, RegistryConfig};
//!
//! let config: CasConfig = serde_json::from_str("{}")?;
//! assert!(matches!(config.registry, RegistryConfig::Memory));
//!
//! let config: CasConfig = serde_json::from_str(r#"{
//!     "registry": { "type": "cache", "max_entries": 50000 },
//!     "cleaner": { "interval": "30s" },
//!     "monitor": { "session_count_warn_threshold": 10000 }
//! }"#)?;
//! config.validate()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::time::Duration;

use cas_ticket::{ConfigError, TicketConfig};
use cas_ticket_registry::{CacheRegistryConfig, ReplicatedRegistryConfig};
#[cfg(feature = "redis")]
use cas_ticket_registry_redis::RedisRegistryConfig;
use serde::{Deserialize, Serialize};

/// Default number of session lock stripes.
const DEFAULT_LOCK_STRIPES: usize = 64;

/// Default delay between registry cleaner runs.
const DEFAULT_CLEANER_INTERVAL: Duration = Duration::from_secs(120);

/// Default delay before the first cleaner run.
const DEFAULT_CLEANER_START_DELAY: Duration = Duration::from_secs(15);

/// Minimum delay between cleaner runs.
const MIN_CLEANER_INTERVAL: Duration = Duration::from_millis(1);

// ───────────────────────────────────────────────────────────────────────────
// RegistryConfig
// ───────────────────────────────────────────────────────────────────────────

/// Which ticket registry backend to run, with its settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum RegistryConfig {
    /// Process-local map.
    #[default]
    Memory,
    /// Bounded, self-expiring cache.
    Cache(CacheRegistryConfig),
    /// In-process replicated cluster.
    Replicated(ReplicatedRegistryConfig),
    /// External Redis server.
    #[cfg(feature = "redis")]
    Redis(RedisRegistryConfig),
}

impl RegistryConfig {
    /// Validates the selected backend's settings.
    ///
    /// # Errors
    ///
    /// Returns the backend configuration's [`ConfigError`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::Memory => Ok(()),
            Self::Cache(config) => config.validate(),
            Self::Replicated(config) => config.validate(),
            #[cfg(feature = "redis")]
            Self::Redis(config) => config.validate(),
        }
    }
}

// ───────────────────────────────────────────────────────────────────────────
// CleanerConfig
// ───────────────────────────────────────────────────────────────────────────

/// Configuration for the [`RegistryCleaner`](crate::RegistryCleaner).
///
/// # Validation
///
/// - `interval` must be >= 1ms
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct CleanerConfig {
    /// Whether the cleaner runs at all.
    #[serde(default = "default_enabled")]
    #[builder(default = true)]
    pub enabled: bool,

    /// Delay between runs.
    #[serde(with = "humantime_serde", default = "default_cleaner_interval")]
    #[builder(default = DEFAULT_CLEANER_INTERVAL)]
    pub interval: Duration,

    /// Delay before the first run.
    #[serde(with = "humantime_serde", default = "default_cleaner_start_delay")]
    #[builder(default = DEFAULT_CLEANER_START_DELAY)]
    pub start_delay: Duration,
}

fn default_enabled() -> bool {
    true
}

fn default_cleaner_interval() -> Duration {
    DEFAULT_CLEANER_INTERVAL
}

fn default_cleaner_start_delay() -> Duration {
    DEFAULT_CLEANER_START_DELAY
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: DEFAULT_CLEANER_INTERVAL,
            start_delay: DEFAULT_CLEANER_START_DELAY,
        }
    }
}

impl CleanerConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BelowMinimum`] if `interval` is below 1ms.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval < MIN_CLEANER_INTERVAL {
            return Err(ConfigError::BelowMinimum {
                field: "interval",
                value: format!("{:?}", self.interval),
                min: format!("{MIN_CLEANER_INTERVAL:?}"),
            });
        }
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────────────────
// MonitorConfig
// ───────────────────────────────────────────────────────────────────────────

/// Warning thresholds for the [`SessionMonitor`](crate::SessionMonitor).
/// An absent threshold disables that warning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct MonitorConfig {
    /// Warn when more SSO sessions than this are live.
    #[serde(default)]
    pub session_count_warn_threshold: Option<u64>,

    /// Warn when more service tickets than this are live.
    #[serde(default)]
    pub service_ticket_count_warn_threshold: Option<u64>,
}

// ───────────────────────────────────────────────────────────────────────────
// CasConfig
// ───────────────────────────────────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CasConfig {
    /// Ticket identifiers, policies and session tracking.
    #[serde(default)]
    pub ticket: TicketConfig,

    /// Registry backend.
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Registry cleaner.
    #[serde(default)]
    pub cleaner: CleanerConfig,

    /// Session monitor thresholds.
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Number of locks that serialise grants against one session.
    #[serde(default = "default_lock_stripes")]
    pub lock_stripes: usize,
}

fn default_lock_stripes() -> usize {
    DEFAULT_LOCK_STRIPES
}

impl Default for CasConfig {
    fn default() -> Self {
        Self {
            ticket: TicketConfig::default(),
            registry: RegistryConfig::default(),
            cleaner: CleanerConfig::default(),
            monitor: MonitorConfig::default(),
            lock_stripes: DEFAULT_LOCK_STRIPES,
        }
    }
}

impl CasConfig {
    /// Validates every section.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ticket.validate()?;
        self.registry.validate()?;
        self.cleaner.validate()?;
        if self.lock_stripes == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "lock_stripes",
                value: "0".to_owned(),
                min: "1".to_owned(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config: CasConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, CasConfig::default());
        assert!(config.cleaner.enabled);
        assert_eq!(config.cleaner.interval, Duration::from_secs(120));
        assert_eq!(config.monitor.session_count_warn_threshold, None);
        config.validate().unwrap();
    }

    #[test]
    fn test_backend_selection() {
        let config: CasConfig = serde_json::from_str(
            r#"{ "registry": { "type": "replicated", "members": ["a", "b"], "local_member": "b" } }"#,
        )
        .unwrap();
        let RegistryConfig::Replicated(replicated) = &config.registry else {
            panic!("expected replicated backend, got {:?}", config.registry);
        };
        assert_eq!(replicated.backup_count, 1);
        config.validate().unwrap();
    }

    #[test]
    fn test_invalid_backend_settings_are_rejected() {
        let config: CasConfig = serde_json::from_str(
            r#"{ "registry": { "type": "replicated", "members": ["a"], "local_member": "z" } }"#,
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field: "local_member", .. })));
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        assert!(serde_json::from_str::<CasConfig>(r#"{ "registyr": {} }"#).is_err());
        assert!(serde_json::from_str::<CleanerConfig>(r#"{ "every": "1s" }"#).is_err());
    }

    #[test]
    fn test_humantime_durations() {
        let config: CleanerConfig =
            serde_json::from_str(r#"{ "interval": "250ms", "start_delay": "0s" }"#).unwrap();
        assert_eq!(config.interval, Duration::from_millis(250));
        assert_eq!(config.start_delay, Duration::ZERO);
    }

    #[test]
    fn test_zero_stripes_rejected() {
        let config = CasConfig { lock_stripes: 0, ..CasConfig::default() };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BelowMinimum { field: "lock_stripes", .. })
        ));
    }

    #[test]
    fn test_zero_cleaner_interval_rejected() {
        let config = CleanerConfig::builder().interval(Duration::ZERO).build();
        assert!(config.validate().is_err());
    }
}
