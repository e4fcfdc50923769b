//! In-memory ticket registry.
//!
//! [`MemoryTicketRegistry`] keeps tickets in a [`HashMap`] behind a
//! [`parking_lot::RwLock`]. It is the default backend for single-node
//! deployments and the storage used by each member of a
//! [`TicketCluster`](crate::TicketCluster).
//!
//! # Example
//!
//! ```
//! use cas_ticket_registry::{MemoryTicketRegistry, TicketRegistry};
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = MemoryTicketRegistry::new();
//!     assert!(registry.get_ticket("TGT-1-missing").await.unwrap().is_none());
//! }
//! ```
//!
//! # Limitations
//!
//! - Tickets are lost when the process exits
//! - Expired tickets are only reclaimed on read or by a registry cleaner

use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use cas_ticket::{Clock, Redacted, SharedClock, SystemClock, Ticket};
use parking_lot::RwLock;

use crate::{
    error::{RegistryError, RegistryResult},
    registry::TicketRegistry,
};

/// In-memory ticket registry.
///
/// # Cloning
///
/// Cheaply cloneable via [`Arc`]. All clones share the same ticket map.
#[derive(Clone)]
pub struct MemoryTicketRegistry {
    tickets: Arc<RwLock<HashMap<String, Ticket>>>,
    clock: SharedClock,
}

impl MemoryTicketRegistry {
    /// Creates an empty registry reading the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(SystemClock::shared())
    }

    /// Creates an empty registry reading `clock`.
    #[must_use]
    pub fn with_clock(clock: SharedClock) -> Self {
        Self { tickets: Arc::new(RwLock::new(HashMap::new())), clock }
    }

    /// Number of stored tickets, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tickets.read().len()
    }

    /// Whether no tickets are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tickets.read().is_empty()
    }

    // Synchronous primitives for callers that hold their own lock across a
    // sequence of operations.

    pub(crate) fn get(&self, id: &str) -> Option<Ticket> {
        self.tickets.read().get(id).cloned()
    }

    pub(crate) fn insert(&self, ticket: Ticket) {
        self.tickets.write().insert(ticket.id().to_owned(), ticket);
    }

    pub(crate) fn take(&self, id: &str) -> bool {
        self.tickets.write().remove(id).is_some()
    }

    pub(crate) fn ids(&self) -> Vec<String> {
        self.tickets.read().keys().cloned().collect()
    }

    pub(crate) fn snapshot(&self) -> Vec<Ticket> {
        self.tickets.read().values().cloned().collect()
    }
}

impl Default for MemoryTicketRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryTicketRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTicketRegistry").field("tickets", &self.len()).finish_non_exhaustive()
    }
}

#[async_trait]
impl TicketRegistry for MemoryTicketRegistry {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    #[tracing::instrument(skip_all, fields(ticket_id = %Redacted(ticket.id())))]
    async fn add_ticket(&self, ticket: Ticket) -> RegistryResult<()> {
        self.insert(ticket);
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(ticket_id = %Redacted(id)))]
    async fn fetch_ticket(&self, id: &str) -> RegistryResult<Option<Ticket>> {
        Ok(self.get(id))
    }

    #[tracing::instrument(skip_all, fields(ticket_id = %Redacted(id)))]
    async fn remove_ticket(&self, id: &str) -> RegistryResult<bool> {
        Ok(self.take(id))
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_all(&self) -> RegistryResult<Vec<Ticket>> {
        Ok(self.snapshot())
    }

    #[tracing::instrument(skip(self))]
    async fn health_check(&self) -> RegistryResult<()> {
        fail::fail_point!("memory-registry-health-check", |_| {
            Err(RegistryError::unavailable("injected memory registry outage"))
        });
        Ok(())
    }
}
