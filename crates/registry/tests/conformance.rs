//! Conformance suite for the in-process registry backends.
//!
//! Each test function corresponds to a single conformance check, providing
//! fine-grained failure reporting. The `run_all` tests exercise the full
//! suite per backend to verify no check is accidentally omitted.

#![allow(clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use cas_ticket::testutil::ManualClock;
use cas_ticket_registry::{
    CacheRegistryConfig, CacheTicketRegistry, MemoryTicketRegistry, ReplicatedRegistryConfig,
    ReplicatedTicketRegistry, TicketCluster, conformance,
};

fn memory() -> (MemoryTicketRegistry, ManualClock) {
    let clock = ManualClock::at_epoch();
    (MemoryTicketRegistry::with_clock(Arc::new(clock.clone())), clock)
}

fn cache() -> (CacheTicketRegistry, ManualClock) {
    let clock = ManualClock::at_epoch();
    (CacheTicketRegistry::with_clock(&CacheRegistryConfig::default(), Arc::new(clock.clone())), clock)
}

fn replicated() -> (ReplicatedTicketRegistry, ManualClock) {
    let clock = ManualClock::at_epoch();
    let config = ReplicatedRegistryConfig::builder()
        .members(vec!["cas-1".to_owned(), "cas-2".to_owned(), "cas-3".to_owned()])
        .local_member("cas-2")
        .build();
    let cluster = TicketCluster::new(&config, Arc::new(clock.clone())).expect("cluster");
    (cluster.registry("cas-2").expect("member"), clock)
}

macro_rules! conformance_tests {
    ($backend:ident) => {
        mod $backend {
            use super::*;

            #[tokio::test]
            async fn get_missing_returns_none() {
                let (registry, clock) = $backend();
                conformance::get_missing_returns_none(&registry, &clock).await;
            }

            #[tokio::test]
            async fn add_then_get_returns_ticket() {
                let (registry, clock) = $backend();
                conformance::add_then_get_returns_ticket(&registry, &clock).await;
            }

            #[tokio::test]
            async fn get_as_checks_capability() {
                let (registry, clock) = $backend();
                conformance::get_as_checks_capability(&registry, &clock).await;
            }

            #[tokio::test]
            async fn update_persists_mutation() {
                let (registry, clock) = $backend();
                conformance::update_persists_mutation(&registry, &clock).await;
            }

            #[tokio::test]
            async fn expired_ticket_is_reaped_on_read() {
                let (registry, clock) = $backend();
                conformance::expired_ticket_is_reaped_on_read(&registry, &clock).await;
            }

            #[tokio::test]
            async fn child_of_expired_parent_is_expired() {
                let (registry, clock) = $backend();
                conformance::child_of_expired_parent_is_expired(&registry, &clock).await;
            }

            #[tokio::test]
            async fn get_tickets_excludes_expired() {
                let (registry, clock) = $backend();
                conformance::get_tickets_excludes_expired(&registry, &clock).await;
            }

            #[tokio::test]
            async fn delete_missing_returns_zero() {
                let (registry, clock) = $backend();
                conformance::delete_missing_returns_zero(&registry, &clock).await;
            }

            #[tokio::test]
            async fn delete_session_cascades() {
                let (registry, clock) = $backend();
                conformance::delete_session_cascades(&registry, &clock).await;
            }

            #[tokio::test]
            async fn delete_is_idempotent() {
                let (registry, clock) = $backend();
                conformance::delete_is_idempotent(&registry, &clock).await;
            }

            #[tokio::test]
            async fn delete_proxy_granting_ticket_detaches() {
                let (registry, clock) = $backend();
                conformance::delete_proxy_granting_ticket_detaches(&registry, &clock).await;
            }

            #[tokio::test]
            async fn delete_all_removes_everything() {
                let (registry, clock) = $backend();
                conformance::delete_all_removes_everything(&registry, &clock).await;
            }

            #[tokio::test]
            async fn counts_reflect_live_tickets() {
                let (registry, clock) = $backend();
                conformance::counts_reflect_live_tickets(&registry, &clock).await;
            }

            #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
            async fn concurrent_remove_has_one_winner() {
                let (registry, clock) = $backend();
                conformance::concurrent_remove_has_one_winner(Arc::new(registry), &clock).await;
            }

            #[tokio::test]
            async fn run_all() {
                let (registry, clock) = $backend();
                conformance::run_all(Arc::new(registry), &clock).await;
            }
        }
    };
}

conformance_tests!(memory);
conformance_tests!(cache);
conformance_tests!(replicated);
