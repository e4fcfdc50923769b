//! Shared test utilities for ticket registry testing.
//!
//! Feature-gated behind `testutil`. Enable it in `[dev-dependencies]`:
//!
//! ```toml
//! [dev-dependencies]
//! cas-ticket-registry = { path = "../registry", features = ["testutil"] }
//! ```

use std::sync::Arc;

use cas_ticket::{
    Service, Ticket, TicketFactory, TicketPolicies,
    testutil::{SequentialIdGenerator, authentication},
};
use chrono::{DateTime, Utc};

use crate::{
    error::{RegistryError, RegistryResult},
    registry::TicketRegistry,
};

/// A factory issuing readable sequential IDs (`TGT-1`, `ST-1`, ...) with
/// `policies`.
#[must_use]
pub fn factory(policies: TicketPolicies) -> TicketFactory {
    TicketFactory::builder()
        .id_generator(Arc::new(SequentialIdGenerator::default()))
        .policies(policies)
        .build()
}

/// Service URL `https://app{n}.example.org`.
#[must_use]
pub fn service(n: usize) -> Service {
    Service::new(format!("https://app{n}.example.org"))
}

/// IDs of a session tree written by [`seed_session`].
#[derive(Debug, Clone)]
pub struct SeededSession {
    /// The root ticket-granting ticket.
    pub ticket_granting_ticket: String,
    /// Service tickets granted directly by the TGT.
    pub service_tickets: Vec<String>,
    /// Proxy-granting ticket minted from the first service ticket.
    pub proxy_granting_ticket: String,
    /// Proxy tickets granted by the PGT.
    pub proxy_tickets: Vec<String>,
}

impl SeededSession {
    /// Total number of tickets in the tree.
    #[must_use]
    pub fn len(&self) -> usize {
        2 + self.service_tickets.len() + self.proxy_tickets.len()
    }

    /// Always `false`: a seeded tree has at least a TGT and a PGT.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Writes a TGT with `service_tickets` STs (at least one), a PGT minted
/// from the first ST, and `proxy_tickets` PTs granted by that PGT.
///
/// # Errors
///
/// Returns any registry error raised while writing.
pub async fn seed_session<R: TicketRegistry + ?Sized>(
    registry: &R,
    factory: &TicketFactory,
    principal: &str,
    service_tickets: usize,
    proxy_tickets: usize,
    now: DateTime<Utc>,
) -> RegistryResult<SeededSession> {
    let mut tgt = factory.create_ticket_granting_ticket(authentication(principal), now);
    let mut st_ids = Vec::with_capacity(service_tickets);
    let mut first_st = None;
    for n in 0..service_tickets.max(1) {
        let st = factory
            .grant_service_ticket(&mut tgt, service(n), false, now)
            .map_err(|e| RegistryError::internal(e.to_string()))?;
        st_ids.push(st.id().to_owned());
        let st: Ticket = st.into();
        if first_st.is_none() {
            first_st = Some(st.clone());
        }
        registry.add_ticket(st).await?;
    }

    let mut first_st = first_st.ok_or_else(|| RegistryError::internal("no service ticket"))?;
    let proxied_by = Service::new("https://proxy.example.org/pgtCallback");
    let mut pgt = factory
        .grant_proxy_granting_ticket(&mut first_st, authentication(principal), proxied_by.clone(), now)
        .map_err(|e| RegistryError::internal(e.to_string()))?;
    tgt.record_proxy_granting_ticket(pgt.id(), proxied_by);
    registry.update_ticket(first_st).await?;

    let mut pt_ids = Vec::with_capacity(proxy_tickets);
    for n in 0..proxy_tickets {
        let pt = factory
            .grant_proxy_ticket(&mut pgt, service(100 + n), now)
            .map_err(|e| RegistryError::internal(e.to_string()))?;
        pt_ids.push(pt.id().to_owned());
        registry.add_ticket(pt.into()).await?;
    }

    let seeded = SeededSession {
        ticket_granting_ticket: tgt.id().to_owned(),
        service_tickets: st_ids,
        proxy_granting_ticket: pgt.id().to_owned(),
        proxy_tickets: pt_ids,
    };
    registry.add_ticket(pgt.into()).await?;
    registry.add_ticket(tgt.into()).await?;
    Ok(seeded)
}

/// Assert that a [`RegistryResult`] is a [`RegistryError::Unavailable`].
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use cas_ticket_registry::{assert_unavailable, RegistryError, RegistryResult};
///
/// let result: RegistryResult<()> = Err(RegistryError::unavailable("down"));
/// assert_unavailable!(result);
/// ```
#[macro_export]
macro_rules! assert_unavailable {
    ($result:expr) => {
        assert!(
            matches!($result, Err($crate::error::RegistryError::Unavailable { .. })),
            "expected RegistryError::Unavailable, got: {:?}",
            $result,
        );
    };
    ($result:expr, $msg:expr) => {
        assert!(
            matches!($result, Err($crate::error::RegistryError::Unavailable { .. })),
            "{}: expected RegistryError::Unavailable, got: {:?}",
            $msg,
            $result,
        );
    };
}

/// Assert that a [`RegistryResult`] is `Ok` and return the inner value.
#[macro_export]
macro_rules! assert_registry_ok {
    ($result:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("expected Ok, got RegistryError: {e:?}"),
        }
    };
    ($result:expr, $msg:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("{}: expected Ok, got RegistryError: {e:?}", $msg),
        }
    };
}

/// Whether `result` is an `Unavailable` error.
pub fn is_unavailable<T>(result: &RegistryResult<T>) -> bool {
    matches!(result, Err(RegistryError::Unavailable { .. }))
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use cas_ticket::testutil::epoch;

    use super::*;
    use crate::MemoryTicketRegistry;

    #[tokio::test]
    async fn test_seed_session_writes_whole_tree() {
        let registry = MemoryTicketRegistry::new();
        let factory = factory(TicketPolicies::default());
        let seeded = seed_session(&registry, &factory, "alice", 3, 2, epoch())
            .await
            .expect("seed");

        assert_eq!(seeded.len(), 7);
        assert_eq!(registry.len(), 7);
        assert_eq!(seeded.ticket_granting_ticket, "TGT-1");
        assert_eq!(seeded.proxy_tickets, vec!["PT-1".to_owned(), "PT-2".to_owned()]);
    }

    #[test]
    fn test_assert_unavailable_macro() {
        let result: RegistryResult<()> = Err(RegistryError::unavailable("down"));
        assert_unavailable!(result);
        assert!(is_unavailable(&result));
    }
}
