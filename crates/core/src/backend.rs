//! Configuration-selected registry backend.
//!
//! [`TicketRegistryBackend`] is a closed enum over the registries this
//! workspace ships. The backend is chosen once from [`RegistryConfig`] and
//! dispatched statically; the core never boxes its registry.

use async_trait::async_trait;
use cas_ticket::{Clock, SharedClock, Ticket};
use cas_ticket_registry::{
    CacheTicketRegistry, MemoryTicketRegistry, RegistryResult, ReplicatedTicketRegistry,
    TicketCluster, TicketRegistry,
};
#[cfg(feature = "redis")]
use cas_ticket_registry_redis::RedisTicketRegistry;

use crate::{config::RegistryConfig, error::CasResult};

/// The registry backend selected by configuration.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum TicketRegistryBackend {
    /// See [`MemoryTicketRegistry`].
    Memory(MemoryTicketRegistry),
    /// See [`CacheTicketRegistry`].
    Cache(CacheTicketRegistry),
    /// See [`ReplicatedTicketRegistry`].
    Replicated(ReplicatedTicketRegistry),
    /// See [`RedisTicketRegistry`].
    #[cfg(feature = "redis")]
    Redis(RedisTicketRegistry),
}

impl TicketRegistryBackend {
    /// Builds (and for remote backends, connects) the configured backend.
    ///
    /// # Errors
    ///
    /// Returns [`CasError::Config`](crate::CasError::Config) for invalid
    /// settings and [`CasError::Registry`](crate::CasError::Registry) if a
    /// remote backend cannot be reached.
    pub async fn from_config(config: &RegistryConfig, clock: SharedClock) -> CasResult<Self> {
        config.validate()?;
        let backend = match config {
            RegistryConfig::Memory => Self::Memory(MemoryTicketRegistry::with_clock(clock)),
            RegistryConfig::Cache(config) => {
                Self::Cache(CacheTicketRegistry::with_clock(config, clock))
            },
            RegistryConfig::Replicated(config) => {
                let cluster = TicketCluster::new(config, clock)?;
                Self::Replicated(cluster.registry(&config.local_member)?)
            },
            #[cfg(feature = "redis")]
            RegistryConfig::Redis(config) => {
                Self::Redis(RedisTicketRegistry::connect_with_clock(config.clone(), clock).await?)
            },
        };
        tracing::info!(backend = backend.name(), "ticket registry ready");
        Ok(backend)
    }

    fn inner(&self) -> &dyn TicketRegistry {
        match self {
            Self::Memory(registry) => registry,
            Self::Cache(registry) => registry,
            Self::Replicated(registry) => registry,
            #[cfg(feature = "redis")]
            Self::Redis(registry) => registry,
        }
    }
}

#[async_trait]
impl TicketRegistry for TicketRegistryBackend {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn clock(&self) -> &dyn Clock {
        self.inner().clock()
    }

    fn supports_counting(&self) -> bool {
        self.inner().supports_counting()
    }

    async fn add_ticket(&self, ticket: Ticket) -> RegistryResult<()> {
        self.inner().add_ticket(ticket).await
    }

    async fn update_ticket(&self, ticket: Ticket) -> RegistryResult<()> {
        self.inner().update_ticket(ticket).await
    }

    async fn fetch_ticket(&self, id: &str) -> RegistryResult<Option<Ticket>> {
        self.inner().fetch_ticket(id).await
    }

    async fn remove_ticket(&self, id: &str) -> RegistryResult<bool> {
        self.inner().remove_ticket(id).await
    }

    async fn fetch_all(&self) -> RegistryResult<Vec<Ticket>> {
        self.inner().fetch_all().await
    }

    async fn health_check(&self) -> RegistryResult<()> {
        self.inner().health_check().await
    }
}
