//! Conformance test suite for [`TicketRegistry`] implementations.
//!
//! Every backend (in-memory, cache, replicated, Redis or third-party) runs
//! the same checks so that the orchestration layer can rely on identical
//! semantics whichever one is configured.
//!
//! # Usage
//!
//! Enable the `testutil` feature and call each function with a fresh
//! registry that reads the supplied [`ManualClock`]:
//!
//! ```no_run
//! use std::sync::Arc;
//! use cas_ticket::testutil::ManualClock;
//! use cas_ticket_registry::{MemoryTicketRegistry, conformance};
//!
//! #[tokio::test]
//! async fn get_missing_returns_none() {
//!     let clock = ManualClock::at_epoch();
//!     let registry = MemoryTicketRegistry::with_clock(Arc::new(clock.clone()));
//!     conformance::get_missing_returns_none(&registry, &clock).await;
//! }
//! ```
//!
//! # Test Categories
//!
//! | Category | Contract aspect |
//! |----------|-----------------|
//! | Storage | add / get / update / typed lookup |
//! | Expiry | expire-on-read, parent-chain expiry, reaping |
//! | Deletion | cascade counts, idempotence, PGT detach |
//! | Counting | session and service-ticket counts |
//! | Concurrent | at-most-once removal |

use std::{sync::Arc, time::Duration};

use cas_ticket::{TicketKind, TicketPolicies, testutil::ManualClock};

use crate::{
    registry::{TicketCount, TicketRegistry},
    testutil::{factory, seed_session, service},
};

// ============================================================================
// Storage
// ============================================================================

/// `get_ticket` on an unknown ID returns `Ok(None)`.
pub async fn get_missing_returns_none<R: TicketRegistry>(registry: &R, _clock: &ManualClock) {
    let result = registry.get_ticket("TGT-404").await;
    assert!(result.is_ok(), "get should not error on missing ticket: {result:?}");
    assert_eq!(result.expect("checked above"), None);
}

/// A stored ticket is returned with its state intact.
pub async fn add_then_get_returns_ticket<R: TicketRegistry>(registry: &R, clock: &ManualClock) {
    let factory = factory(TicketPolicies::default());
    let seeded = seed_session(registry, &factory, "alice", 1, 0, clock_now(clock))
        .await
        .expect("seed");

    let tgt = registry
        .get_ticket(&seeded.ticket_granting_ticket)
        .await
        .expect("get")
        .expect("ticket present");
    let session = tgt.as_ticket_granting().expect("TGT");
    assert_eq!(session.authentication().principal().id(), "alice");
    assert!(session.services().contains_key(&seeded.service_tickets[0]));
}

/// `get_ticket_as` treats a kind mismatch as not found, and a PGT answers
/// a request for a TGT.
pub async fn get_as_checks_capability<R: TicketRegistry>(registry: &R, clock: &ManualClock) {
    let factory = factory(TicketPolicies::default());
    let seeded = seed_session(registry, &factory, "alice", 1, 1, clock_now(clock))
        .await
        .expect("seed");

    let st = registry
        .get_ticket_as(&seeded.service_tickets[0], TicketKind::TicketGranting)
        .await
        .expect("get_as");
    assert!(st.is_none(), "an ST must not satisfy a TGT request");

    let pgt = registry
        .get_ticket_as(&seeded.proxy_granting_ticket, TicketKind::TicketGranting)
        .await
        .expect("get_as");
    assert!(pgt.is_some(), "a PGT satisfies a TGT request");

    let pt = registry
        .get_ticket_as(&seeded.proxy_tickets[0], TicketKind::Service)
        .await
        .expect("get_as");
    assert!(pt.is_some(), "a PT satisfies an ST request");
}

/// `update_ticket` makes in-process mutation visible to later reads.
pub async fn update_persists_mutation<R: TicketRegistry>(registry: &R, clock: &ManualClock) {
    let factory = factory(TicketPolicies::default());
    let now = clock_now(clock);
    let seeded = seed_session(registry, &factory, "alice", 1, 0, now).await.expect("seed");

    let mut tgt = registry
        .get_ticket(&seeded.ticket_granting_ticket)
        .await
        .expect("get")
        .expect("present");
    let session = tgt.as_ticket_granting_mut().expect("TGT");
    let st = factory.grant_service_ticket(session, service(7), false, now).expect("grant");
    registry.add_ticket(st.clone().into()).await.expect("add st");
    registry.update_ticket(tgt).await.expect("update");

    let reread = registry
        .get_ticket(&seeded.ticket_granting_ticket)
        .await
        .expect("get")
        .expect("present");
    assert_eq!(reread.state().count_of_uses(), 2);
    assert!(reread.as_ticket_granting().expect("TGT").services().contains_key(st.id()));
}

// ============================================================================
// Expiry
// ============================================================================

/// An expired ticket is never returned, and reading it reaps it.
pub async fn expired_ticket_is_reaped_on_read<R: TicketRegistry>(
    registry: &R,
    clock: &ManualClock,
) {
    let policies = TicketPolicies::builder()
        .ticket_granting(cas_ticket::ExpirationPolicy::HardTimeout {
            time_to_kill: Duration::from_secs(60),
        })
        .build();
    let factory = factory(policies);
    let seeded = seed_session(registry, &factory, "alice", 1, 0, clock_now(clock))
        .await
        .expect("seed");

    clock.advance(Duration::from_secs(61));
    assert!(registry.get_ticket(&seeded.ticket_granting_ticket).await.expect("get").is_none());
    assert!(
        registry.fetch_ticket(&seeded.ticket_granting_ticket).await.expect("fetch").is_none(),
        "expired ticket must be removed by the read that found it"
    );
}

/// A ticket whose granting ticket expired is treated as expired itself.
pub async fn child_of_expired_parent_is_expired<R: TicketRegistry>(
    registry: &R,
    clock: &ManualClock,
) {
    let policies = TicketPolicies::builder()
        .ticket_granting(cas_ticket::ExpirationPolicy::HardTimeout {
            time_to_kill: Duration::from_secs(60),
        })
        .proxy(cas_ticket::ExpirationPolicy::NeverExpires)
        .build();
    let factory = factory(policies);
    let seeded = seed_session(registry, &factory, "alice", 1, 1, clock_now(clock))
        .await
        .expect("seed");

    clock.advance(Duration::from_secs(61));
    let pt = registry
        .get_ticket(&seeded.proxy_tickets[0])
        .await
        .expect("get");
    assert!(pt.is_none(), "PT of an expired session must not be live");
}

/// `get_tickets` returns only live tickets and reaps the rest.
pub async fn get_tickets_excludes_expired<R: TicketRegistry>(registry: &R, clock: &ManualClock) {
    let policies = TicketPolicies::builder()
        .service(cas_ticket::ExpirationPolicy::single_use(Duration::from_secs(10)))
        .build();
    let factory = factory(policies);
    let seeded = seed_session(registry, &factory, "alice", 3, 0, clock_now(clock))
        .await
        .expect("seed");

    clock.advance(Duration::from_secs(11));
    let live = registry.get_tickets().await.expect("get_tickets");
    let ids: Vec<&str> = live.iter().map(|t| t.id()).collect();
    assert!(ids.contains(&seeded.ticket_granting_ticket.as_str()));
    for st in &seeded.service_tickets {
        assert!(!ids.contains(&st.as_str()), "expired {st} must not be listed");
        assert!(registry.fetch_ticket(st).await.expect("fetch").is_none(), "{st} reaped");
    }
}

// ============================================================================
// Deletion
// ============================================================================

/// Deleting an unknown ID is a no-op returning 0.
pub async fn delete_missing_returns_zero<R: TicketRegistry>(registry: &R, _clock: &ManualClock) {
    assert_eq!(registry.delete_ticket("TGT-404").await.expect("delete"), 0);
}

/// Deleting a TGT removes every descendant and counts them all.
pub async fn delete_session_cascades<R: TicketRegistry>(registry: &R, clock: &ManualClock) {
    let factory = factory(TicketPolicies::default());
    let seeded = seed_session(registry, &factory, "alice", 5, 5, clock_now(clock))
        .await
        .expect("seed");

    let count = registry.delete_ticket(&seeded.ticket_granting_ticket).await.expect("delete");
    assert_eq!(count, seeded.len() as u64);

    for id in seeded
        .service_tickets
        .iter()
        .chain(&seeded.proxy_tickets)
        .chain([&seeded.proxy_granting_ticket, &seeded.ticket_granting_ticket])
    {
        assert!(registry.fetch_ticket(id).await.expect("fetch").is_none(), "{id} should be gone");
    }
}

/// Children already removed count as 0; a repeated delete returns 0.
pub async fn delete_is_idempotent<R: TicketRegistry>(registry: &R, clock: &ManualClock) {
    let factory = factory(TicketPolicies::default());
    let seeded = seed_session(registry, &factory, "alice", 2, 0, clock_now(clock))
        .await
        .expect("seed");

    assert_eq!(registry.delete_ticket(&seeded.service_tickets[1]).await.expect("delete st"), 1);
    let count = registry.delete_ticket(&seeded.ticket_granting_ticket).await.expect("delete");
    assert_eq!(count, seeded.len() as u64 - 1);
    assert_eq!(registry.delete_ticket(&seeded.ticket_granting_ticket).await.expect("again"), 0);
}

/// Deleting a PGT removes its proxy tickets and detaches it from the TGT.
pub async fn delete_proxy_granting_ticket_detaches<R: TicketRegistry>(
    registry: &R,
    clock: &ManualClock,
) {
    let factory = factory(TicketPolicies::default());
    let seeded = seed_session(registry, &factory, "alice", 1, 3, clock_now(clock))
        .await
        .expect("seed");

    let count = registry.delete_ticket(&seeded.proxy_granting_ticket).await.expect("delete");
    assert_eq!(count, 4);

    let tgt = registry
        .get_ticket(&seeded.ticket_granting_ticket)
        .await
        .expect("get")
        .expect("TGT survives");
    let session = tgt.as_ticket_granting().expect("TGT");
    assert!(!session.proxy_granting_tickets().contains_key(&seeded.proxy_granting_ticket));
}

/// `delete_all` empties the registry.
pub async fn delete_all_removes_everything<R: TicketRegistry>(registry: &R, clock: &ManualClock) {
    let factory = factory(TicketPolicies::default());
    let first = seed_session(registry, &factory, "alice", 2, 1, clock_now(clock)).await.expect("seed");
    let second = seed_session(registry, &factory, "bob", 1, 0, clock_now(clock)).await.expect("seed");

    let removed = registry.delete_all().await.expect("delete_all");
    assert_eq!(removed, (first.len() + second.len()) as u64);
    assert!(registry.fetch_all().await.expect("fetch_all").is_empty());
}

// ============================================================================
// Counting
// ============================================================================

/// Counts are exact for counting backends and `Unknown` otherwise.
pub async fn counts_reflect_live_tickets<R: TicketRegistry>(registry: &R, clock: &ManualClock) {
    let factory = factory(TicketPolicies::default());
    seed_session(registry, &factory, "alice", 2, 1, clock_now(clock)).await.expect("seed");
    seed_session(registry, &factory, "bob", 1, 0, clock_now(clock)).await.expect("seed");

    let sessions = registry.session_count().await.expect("session_count");
    let service_tickets = registry.service_ticket_count().await.expect("service_ticket_count");
    if registry.supports_counting() {
        assert_eq!(sessions, TicketCount::Known(2));
        assert_eq!(service_tickets, TicketCount::Known(4));
    } else {
        assert_eq!(sessions, TicketCount::Unknown);
        assert_eq!(service_tickets, TicketCount::Unknown);
    }
}

// ============================================================================
// Concurrent
// ============================================================================

/// Of many concurrent removals of one ID, exactly one observes `true`.
pub async fn concurrent_remove_has_one_winner<R: TicketRegistry + 'static>(
    registry: Arc<R>,
    clock: &ManualClock,
) {
    let factory = factory(TicketPolicies::default());
    let seeded = seed_session(registry.as_ref(), &factory, "alice", 1, 0, clock_now(clock))
        .await
        .expect("seed");
    let id = seeded.service_tickets[0].clone();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let registry = Arc::clone(&registry);
        let id = id.clone();
        handles.push(tokio::spawn(async move { registry.remove_ticket(&id).await }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.expect("task join").expect("remove") {
            winners += 1;
        }
    }
    assert_eq!(winners, 1, "exactly one concurrent remover must win");
}

/// Runs the whole suite against `registry`, emptying it between checks.
pub async fn run_all<R: TicketRegistry + 'static>(registry: Arc<R>, clock: &ManualClock) {
    async fn reset<R: TicketRegistry>(registry: &R) {
        registry.delete_all().await.expect("reset");
    }

    get_missing_returns_none(registry.as_ref(), clock).await;
    add_then_get_returns_ticket(registry.as_ref(), clock).await;
    reset(registry.as_ref()).await;
    get_as_checks_capability(registry.as_ref(), clock).await;
    reset(registry.as_ref()).await;
    update_persists_mutation(registry.as_ref(), clock).await;
    reset(registry.as_ref()).await;
    expired_ticket_is_reaped_on_read(registry.as_ref(), clock).await;
    reset(registry.as_ref()).await;
    child_of_expired_parent_is_expired(registry.as_ref(), clock).await;
    reset(registry.as_ref()).await;
    get_tickets_excludes_expired(registry.as_ref(), clock).await;
    reset(registry.as_ref()).await;
    delete_missing_returns_zero(registry.as_ref(), clock).await;
    delete_session_cascades(registry.as_ref(), clock).await;
    reset(registry.as_ref()).await;
    delete_is_idempotent(registry.as_ref(), clock).await;
    reset(registry.as_ref()).await;
    delete_proxy_granting_ticket_detaches(registry.as_ref(), clock).await;
    reset(registry.as_ref()).await;
    delete_all_removes_everything(registry.as_ref(), clock).await;
    counts_reflect_live_tickets(registry.as_ref(), clock).await;
    reset(registry.as_ref()).await;
    concurrent_remove_has_one_winner(registry, clock).await;
}

fn clock_now(clock: &ManualClock) -> chrono::DateTime<chrono::Utc> {
    cas_ticket::Clock::now(clock)
}
