//! Configuration for the Redis ticket registry.

use std::time::Duration;

use cas_ticket::ConfigError;
use serde::{Deserialize, Serialize};

/// Default key prefix under which tickets are stored.
pub const DEFAULT_KEY_PREFIX: &str = "cas:ticket:";

/// Default per-command timeout.
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(2);

/// Minimum per-command timeout.
const MIN_OPERATION_TIMEOUT: Duration = Duration::from_millis(1);

/// Configuration for [`RedisTicketRegistry`](crate::RedisTicketRegistry).
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use cas_ticket_registry_redis::RedisRegistryConfig;
///
/// let config = RedisRegistryConfig::builder()
///     .url("redis://cache.example.org:6379")
///     .key_prefix("sso:ticket:")
///     .operation_timeout(Duration::from_millis(500))
///     .build()?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisRegistryConfig {
    /// Connection URL, `redis://` or `rediss://`.
    pub(crate) url: String,

    /// Prefix prepended to every ticket ID.
    #[serde(default = "default_key_prefix")]
    pub(crate) key_prefix: String,

    /// Deadline for each Redis command.
    #[serde(with = "humantime_serde", default = "default_operation_timeout")]
    pub(crate) operation_timeout: Duration,

    /// Retry policy for transient failures.
    #[serde(default)]
    pub(crate) retry_policy: RetryPolicyConfig,
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_owned()
}

fn default_operation_timeout() -> Duration {
    DEFAULT_OPERATION_TIMEOUT
}

/// Serializable retry policy configuration.
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryPolicyConfig {
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    #[builder(default = default_max_retries())]
    pub max_retries: u32,

    /// Initial backoff duration.
    #[serde(with = "humantime_serde", default = "default_initial_backoff")]
    #[builder(default = default_initial_backoff())]
    pub initial_backoff: Duration,

    /// Maximum backoff duration.
    #[serde(with = "humantime_serde", default = "default_max_backoff")]
    #[builder(default = default_max_backoff())]
    pub max_backoff: Duration,
}

fn default_max_retries() -> u32 {
    2
}

fn default_initial_backoff() -> Duration {
    Duration::from_millis(50)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(1)
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
        }
    }
}

#[bon::bon]
impl RedisRegistryConfig {
    /// Creates a new configuration, validating all fields.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `url` does not use the `redis://` or `rediss://` scheme
    /// - `key_prefix` is empty
    /// - `operation_timeout` is below 1ms
    #[builder]
    pub fn new(
        #[builder(into)] url: String,
        #[builder(into, default = default_key_prefix())] key_prefix: String,
        #[builder(default = DEFAULT_OPERATION_TIMEOUT)] operation_timeout: Duration,
        #[builder(default)] retry_policy: RetryPolicyConfig,
    ) -> Result<Self, ConfigError> {
        let config = Self { url, key_prefix, operation_timeout, retry_policy };
        config.validate()?;
        Ok(config)
    }

    /// Validates a deserialized configuration.
    ///
    /// # Errors
    ///
    /// See [`RedisRegistryConfig::builder`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.url.starts_with("redis://") || self.url.starts_with("rediss://")) {
            return Err(ConfigError::invalid("url", "must start with redis:// or rediss://"));
        }
        if self.key_prefix.is_empty() {
            return Err(ConfigError::invalid("key_prefix", "must not be empty"));
        }
        if self.operation_timeout < MIN_OPERATION_TIMEOUT {
            return Err(ConfigError::BelowMinimum {
                field: "operation_timeout",
                value: format!("{}ms", self.operation_timeout.as_millis()),
                min: "1ms".to_owned(),
            });
        }
        Ok(())
    }

    /// Connection URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Key prefix.
    #[must_use]
    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    /// Per-command timeout.
    #[must_use]
    pub fn operation_timeout(&self) -> Duration {
        self.operation_timeout
    }

    /// Retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicyConfig {
        &self.retry_policy
    }
}
