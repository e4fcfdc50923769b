//! Error types for the Redis ticket registry.
//!
//! [`RedisRegistryError`] wraps client errors and maps them onto the generic
//! [`RegistryError`] so that callers see the same classification whichever
//! backend is configured.

use cas_ticket_registry::RegistryError;
use thiserror::Error;

/// Errors specific to the Redis ticket registry.
#[derive(Debug, Error)]
pub enum RedisRegistryError {
    /// Error from the Redis client.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A stored value could not be encoded or decoded.
    #[error("Ticket encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// A command exceeded its deadline.
    #[error("Redis command timed out")]
    Timeout,
}

impl RedisRegistryError {
    /// Whether retrying the command may succeed: transport failures and
    /// timeouts.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Redis(err) => {
                err.is_timeout()
                    || err.is_io_error()
                    || err.is_connection_refusal()
                    || err.is_connection_dropped()
            },
            Self::Encoding(_) => false,
            Self::Timeout => true,
        }
    }

    /// Whether the command certainly never reached the server. Only these
    /// failures are safe to retry for commands that must apply at most once.
    #[must_use]
    pub fn is_unsent(&self) -> bool {
        matches!(self, Self::Redis(err) if err.is_connection_refusal())
    }
}

impl From<RedisRegistryError> for RegistryError {
    fn from(err: RedisRegistryError) -> Self {
        match err {
            RedisRegistryError::Redis(source) => redis_error_to_registry_error(source),
            RedisRegistryError::Encoding(source) => RegistryError::from(source),
            RedisRegistryError::Timeout => RegistryError::timeout(),
        }
    }
}

/// Classifies a client error: transport problems are retryable
/// unavailability, everything else is internal.
fn redis_error_to_registry_error(err: redis::RedisError) -> RegistryError {
    if err.is_timeout() {
        tracing::warn!(error = %err, "Redis command timed out");
        return RegistryError::timeout();
    }
    if err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped() {
        return RegistryError::unavailable_with_source("Redis connection failed", err);
    }
    RegistryError::internal_with_source(err.to_string(), err)
}
