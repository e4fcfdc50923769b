//! The [`TicketRegistry`] trait.
//!
//! A registry is the sole long-lived owner of tickets. Backends implement a
//! handful of storage primitives; the trait supplies the ticket-aware
//! algorithms on top of them so every backend shares identical semantics:
//!
//! - **Expire-on-read**: a ticket whose policy says expired, or whose granting
//!   ticket is absent or expired, is never returned as live. It is deleted
//!   (with its subtree) on the read that discovers it.
//! - **Cascading delete**: deleting a TGT or PGT deletes every ticket it
//!   granted, recursively. Children that are already gone count as 0.
//! - **Counts**: derived from a reaped snapshot, or [`TicketCount::Unknown`]
//!   for backends that cannot enumerate cheaply.
//!
//! # Implementing a Backend
//!
//! 1. Implement the required primitives ([`add_ticket`](TicketRegistry::add_ticket),
//!    [`fetch_ticket`](TicketRegistry::fetch_ticket),
//!    [`remove_ticket`](TicketRegistry::remove_ticket),
//!    [`fetch_all`](TicketRegistry::fetch_all), [`clock`](TicketRegistry::clock)).
//! 2. Make `remove_ticket` atomic per ID: exactly one concurrent caller may
//!    observe `true`. At-most-once ticket redemption is built on this.
//! 3. Map I/O failures to [`RegistryError::Unavailable`](crate::RegistryError::Unavailable).
//! 4. Run the [`conformance`](crate::conformance) suite against it.

use std::{collections::HashMap, fmt, future::Future, pin::Pin};

use async_trait::async_trait;
use cas_ticket::{Clock, Redacted, Ticket, TicketKind};
use chrono::{DateTime, Utc};

use crate::error::RegistryResult;

/// Maximum number of ancestors inspected when checking a ticket's lineage.
/// Deeper chains are treated as broken.
pub const MAX_LINEAGE_DEPTH: usize = 32;

/// Outcome of looking a ticket up by ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketLookup {
    /// The ticket is live.
    Live(Ticket),
    /// The ticket was present but expired; it has been reaped.
    Expired(Ticket),
    /// No ticket is stored under the ID.
    Absent,
}

impl TicketLookup {
    /// The live ticket, if any.
    #[must_use]
    pub fn into_live(self) -> Option<Ticket> {
        match self {
            Self::Live(ticket) => Some(ticket),
            Self::Expired(_) | Self::Absent => None,
        }
    }
}

/// A ticket count reported for monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketCount {
    /// Exact count of live tickets.
    Known(u64),
    /// The backend cannot count cheaply. Distinct from zero.
    Unknown,
}

impl fmt::Display for TicketCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(n) => write!(f, "{n}"),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

/// Ticket storage shared by every node of a CAS deployment.
#[async_trait]
pub trait TicketRegistry: Send + Sync {
    /// Short backend name used in diagnostics.
    fn name(&self) -> &'static str;

    /// Clock used for expire-on-read decisions.
    fn clock(&self) -> &dyn Clock;

    /// Whether [`session_count`](Self::session_count) and
    /// [`service_ticket_count`](Self::service_ticket_count) can be computed.
    fn supports_counting(&self) -> bool {
        true
    }

    /// Stores `ticket`, overwriting any ticket with the same ID.
    #[must_use = "registry operations may fail and errors must be handled"]
    async fn add_ticket(&self, ticket: Ticket) -> RegistryResult<()>;

    /// Persists mutated ticket state. Backends that hold copies (remote
    /// caches, replicas) do not see in-process mutation without this call.
    #[must_use = "registry operations may fail and errors must be handled"]
    async fn update_ticket(&self, ticket: Ticket) -> RegistryResult<()> {
        self.add_ticket(ticket).await
    }

    /// Returns the stored ticket without evaluating expiry.
    #[must_use = "registry operations may fail and errors must be handled"]
    async fn fetch_ticket(&self, id: &str) -> RegistryResult<Option<Ticket>>;

    /// Removes a single ticket without cascading. Returns `true` only for
    /// the caller that actually removed it.
    #[must_use = "registry operations may fail and errors must be handled"]
    async fn remove_ticket(&self, id: &str) -> RegistryResult<bool>;

    /// Returns every stored ticket without evaluating expiry.
    #[must_use = "registry operations may fail and errors must be handled"]
    async fn fetch_all(&self) -> RegistryResult<Vec<Ticket>>;

    /// Verifies the backend is reachable.
    async fn health_check(&self) -> RegistryResult<()> {
        Ok(())
    }

    /// Looks a ticket up, reaping it if it has expired.
    #[tracing::instrument(skip_all, fields(ticket_id = %Redacted(id)))]
    async fn lookup_ticket(&self, id: &str) -> RegistryResult<TicketLookup> {
        let Some(ticket) = self.fetch_ticket(id).await? else {
            return Ok(TicketLookup::Absent);
        };
        let now = self.clock().now();
        if ticket.is_expired(now) || !lineage_is_live(self, &ticket, now).await? {
            tracing::debug!(kind = %ticket.kind(), "reaping expired ticket on read");
            if let Some(pgt) = ticket.as_proxy_granting() {
                detach_from_parent(self, pgt.granting_ticket_id(), id).await?;
            }
            let reaped = delete_subtree(self, ticket.clone()).await?;
            tracing::debug!(reaped, "expired ticket subtree removed");
            return Ok(TicketLookup::Expired(ticket));
        }
        Ok(TicketLookup::Live(ticket))
    }

    /// Returns the live ticket stored under `id`, if any.
    async fn get_ticket(&self, id: &str) -> RegistryResult<Option<Ticket>> {
        Ok(self.lookup_ticket(id).await?.into_live())
    }

    /// Returns the live ticket stored under `id` if it satisfies
    /// `capability`. A ticket of another kind is treated as not found.
    async fn get_ticket_as(
        &self,
        id: &str,
        capability: TicketKind,
    ) -> RegistryResult<Option<Ticket>> {
        match self.get_ticket(id).await? {
            Some(ticket) if ticket.satisfies(capability) => Ok(Some(ticket)),
            Some(ticket) => {
                tracing::debug!(
                    ticket_id = %Redacted(id),
                    expected = %capability,
                    actual = %ticket.kind(),
                    "ticket does not have the requested capability",
                );
                Ok(None)
            },
            None => Ok(None),
        }
    }

    /// Deletes a ticket and everything it granted. Returns the number of
    /// tickets removed; 0 if `id` was absent.
    #[tracing::instrument(skip_all, fields(ticket_id = %Redacted(id)))]
    async fn delete_ticket(&self, id: &str) -> RegistryResult<u64> {
        let Some(ticket) = self.fetch_ticket(id).await? else {
            return Ok(0);
        };
        if let Some(pgt) = ticket.as_proxy_granting() {
            detach_from_parent(self, pgt.granting_ticket_id(), id).await?;
        }
        let count = delete_subtree(self, ticket).await?;
        tracing::debug!(count, "ticket deleted");
        Ok(count)
    }

    /// Returns every live ticket, reaping expired ones.
    #[tracing::instrument(skip(self))]
    async fn get_tickets(&self) -> RegistryResult<Vec<Ticket>> {
        let snapshot = self.fetch_all().await?;
        let now = self.clock().now();
        let by_id: HashMap<&str, &Ticket> = snapshot.iter().map(|t| (t.id(), t)).collect();

        let mut live = Vec::with_capacity(snapshot.len());
        let mut expired = Vec::new();
        for ticket in &snapshot {
            if is_live_in_snapshot(ticket, &by_id, now) {
                live.push(ticket.clone());
            } else {
                expired.push(ticket.id().to_owned());
            }
        }

        if !expired.is_empty() {
            tracing::debug!(expired = expired.len(), "reaping expired tickets from snapshot");
            for id in &expired {
                self.delete_ticket(id).await?;
            }
        }
        Ok(live)
    }

    /// Number of live ticket-granting tickets (SSO sessions).
    async fn session_count(&self) -> RegistryResult<TicketCount> {
        count_live(self, |kind| kind == TicketKind::TicketGranting).await
    }

    /// Number of live service and proxy tickets.
    async fn service_ticket_count(&self) -> RegistryResult<TicketCount> {
        count_live(self, |kind| kind.satisfies(TicketKind::Service)).await
    }

    /// Removes every ticket. Returns the number removed.
    #[tracing::instrument(skip(self))]
    async fn delete_all(&self) -> RegistryResult<u64> {
        let mut count = 0;
        for ticket in self.fetch_all().await? {
            if self.remove_ticket(ticket.id()).await? {
                count += 1;
            }
        }
        tracing::info!(count, "all tickets deleted");
        Ok(count)
    }
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

async fn count_live<R>(registry: &R, filter: fn(TicketKind) -> bool) -> RegistryResult<TicketCount>
where
    R: TicketRegistry + ?Sized,
{
    if !registry.supports_counting() {
        return Ok(TicketCount::Unknown);
    }
    let tickets = registry.get_tickets().await?;
    Ok(TicketCount::Known(tickets.iter().filter(|t| filter(t.kind())).count() as u64))
}

/// Removes `ticket` and, recursively, every ticket it granted.
fn delete_subtree<'a, R>(registry: &'a R, ticket: Ticket) -> BoxFuture<'a, RegistryResult<u64>>
where
    R: TicketRegistry + ?Sized,
{
    Box::pin(async move {
        let mut count = 0;
        for child_id in ticket.child_ticket_ids() {
            if let Some(child) = registry.fetch_ticket(&child_id).await? {
                count += delete_subtree(registry, child).await?;
            }
        }
        if registry.remove_ticket(ticket.id()).await? {
            count += 1;
        }
        Ok(count)
    })
}

/// Drops `child_id` from its parent's records so the parent no longer
/// cascades into it.
async fn detach_from_parent<R>(registry: &R, parent_id: &str, child_id: &str) -> RegistryResult<()>
where
    R: TicketRegistry + ?Sized,
{
    let Some(mut parent) = registry.fetch_ticket(parent_id).await? else {
        return Ok(());
    };
    let removed = parent.as_ticket_granting_mut().is_some_and(|session| session.remove_child(child_id));
    if removed {
        registry.update_ticket(parent).await?;
    }
    Ok(())
}

/// Walks the granting chain; `false` if any ancestor is absent or expired.
async fn lineage_is_live<R>(registry: &R, ticket: &Ticket, now: DateTime<Utc>) -> RegistryResult<bool>
where
    R: TicketRegistry + ?Sized,
{
    let mut parent_id = ticket.granting_ticket_id().map(str::to_owned);
    for _ in 0..MAX_LINEAGE_DEPTH {
        let Some(id) = parent_id else {
            return Ok(true);
        };
        match registry.fetch_ticket(&id).await? {
            Some(parent) if !parent.is_expired(now) => {
                parent_id = parent.granting_ticket_id().map(str::to_owned);
            },
            _ => return Ok(false),
        }
    }
    Ok(false)
}

fn is_live_in_snapshot(ticket: &Ticket, by_id: &HashMap<&str, &Ticket>, now: DateTime<Utc>) -> bool {
    let mut current = ticket;
    for _ in 0..MAX_LINEAGE_DEPTH {
        if current.is_expired(now) {
            return false;
        }
        match current.granting_ticket_id() {
            None => return true,
            Some(parent_id) => match by_id.get(parent_id) {
                Some(parent) => current = parent,
                None => return false,
            },
        }
    }
    false
}
