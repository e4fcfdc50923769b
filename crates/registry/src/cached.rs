//! Cache-backed ticket registry.
//!
//! [`CacheTicketRegistry`] stores tickets in a [`moka::future::Cache`] whose
//! per-entry lifetime is the ticket's remaining lifetime at the moment it is
//! written. The cache evicts expired tickets on its own, so no registry
//! cleaner is required; expire-on-read still applies for tickets whose
//! policy expires them before the cache does (use-count exhaustion, an
//! expired parent).
//!
//! # Capacity
//!
//! The cache is bounded. When full, the least recently used tickets are
//! evicted, which logs users out early. Size `max_entries` for the peak
//! number of live tickets.
//!
//! # Usage
//!
//! ```no_run
//! # use cas_ticket_registry::{CacheRegistryConfig, CacheTicketRegistry};
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CacheRegistryConfig::builder().max_entries(50_000).build()?;
//! let registry = CacheTicketRegistry::new(&config);
//! # Ok(())
//! # }
//! ```

use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use cas_ticket::{Clock, ConfigError, Redacted, SharedClock, SystemClock, Ticket};
use moka::{future::Cache, policy::EvictionPolicy};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{error::RegistryResult, registry::TicketRegistry};

// ───────────────────────────────────────────────────────────────────────────
// CacheRegistryConfig
// ───────────────────────────────────────────────────────────────────────────

/// Default maximum number of cached tickets.
const DEFAULT_MAX_ENTRIES: u64 = 100_000;

/// Configuration for [`CacheTicketRegistry`].
///
/// # Validation
///
/// - `max_entries` must be >= 1
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheRegistryConfig {
    #[serde(default = "default_max_entries")]
    max_entries: u64,
}

fn default_max_entries() -> u64 {
    DEFAULT_MAX_ENTRIES
}

impl Default for CacheRegistryConfig {
    fn default() -> Self {
        Self { max_entries: DEFAULT_MAX_ENTRIES }
    }
}

impl CacheRegistryConfig {
    /// Starts building a validated configuration.
    #[must_use]
    pub fn builder() -> CacheRegistryConfigBuilder {
        CacheRegistryConfigBuilder { max_entries: DEFAULT_MAX_ENTRIES }
    }

    /// Returns the maximum number of cached tickets.
    #[must_use]
    pub fn max_entries(&self) -> u64 {
        self.max_entries
    }

    /// Validates a deserialized configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BelowMinimum`] if `max_entries` is 0.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_entries == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "max_entries",
                value: self.max_entries.to_string(),
                min: "1".to_owned(),
            });
        }
        Ok(())
    }
}

/// Builder for [`CacheRegistryConfig`].
#[derive(Debug)]
pub struct CacheRegistryConfigBuilder {
    max_entries: u64,
}

impl CacheRegistryConfigBuilder {
    /// Sets the maximum number of cached tickets.
    #[must_use]
    pub fn max_entries(mut self, max_entries: u64) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Builds the configuration, validating all fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BelowMinimum`] if `max_entries` is 0.
    pub fn build(self) -> Result<CacheRegistryConfig, ConfigError> {
        let config = CacheRegistryConfig { max_entries: self.max_entries };
        config.validate()?;
        Ok(config)
    }
}

// ───────────────────────────────────────────────────────────────────────────
// CacheTicketRegistry
// ───────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
struct CachedTicket {
    ticket: Arc<Ticket>,
    lifetime: Option<Duration>,
}

/// Per-entry expiry: the ticket's remaining lifetime, recomputed on every
/// write so that idle timeouts slide with each use.
struct TicketExpiry;

impl moka::Expiry<String, CachedTicket> for TicketExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedTicket,
        _created_at: Instant,
    ) -> Option<Duration> {
        value.lifetime
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CachedTicket,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.lifetime
    }
}

/// Ticket registry backed by a bounded, self-expiring cache.
///
/// # Cloning
///
/// Clones share the same cache.
#[derive(Clone)]
pub struct CacheTicketRegistry {
    cache: Cache<String, CachedTicket>,
    clock: SharedClock,
}

impl CacheTicketRegistry {
    /// Creates a registry reading the system clock.
    #[must_use]
    pub fn new(config: &CacheRegistryConfig) -> Self {
        Self::with_clock(config, SystemClock::shared())
    }

    /// Creates a registry reading `clock`.
    #[must_use]
    pub fn with_clock(config: &CacheRegistryConfig, clock: SharedClock) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_entries)
            .eviction_policy(EvictionPolicy::lru())
            .expire_after(TicketExpiry)
            .build();
        Self { cache, clock }
    }

    /// Applies pending evictions. Exposed for tests.
    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }
}

impl fmt::Debug for CacheTicketRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheTicketRegistry")
            .field("entries", &self.cache.entry_count())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TicketRegistry for CacheTicketRegistry {
    fn name(&self) -> &'static str {
        "cache"
    }

    fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    #[tracing::instrument(skip_all, fields(ticket_id = %Redacted(ticket.id())))]
    async fn add_ticket(&self, ticket: Ticket) -> RegistryResult<()> {
        let state = ticket.state();
        let lifetime = state.expiration_policy().remaining_lifetime(state, self.clock.now());
        trace!(?lifetime, "caching ticket");
        self.cache
            .insert(ticket.id().to_owned(), CachedTicket { ticket: Arc::new(ticket), lifetime })
            .await;
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(ticket_id = %Redacted(id)))]
    async fn fetch_ticket(&self, id: &str) -> RegistryResult<Option<Ticket>> {
        Ok(self.cache.get(id).await.map(|cached| cached.ticket.as_ref().clone()))
    }

    #[tracing::instrument(skip_all, fields(ticket_id = %Redacted(id)))]
    async fn remove_ticket(&self, id: &str) -> RegistryResult<bool> {
        Ok(self.cache.remove(id).await.is_some())
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_all(&self) -> RegistryResult<Vec<Ticket>> {
        Ok(self.cache.iter().map(|(_, cached)| cached.ticket.as_ref().clone()).collect())
    }
}
