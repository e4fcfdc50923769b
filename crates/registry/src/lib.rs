//! Ticket registries for the CAS ticketing core.
//!
//! A ticket registry is the shared store every CAS node reads and writes
//! tickets through. This crate defines the [`TicketRegistry`] trait, the
//! ticket-aware algorithms every backend shares (expire-on-read, cascading
//! delete, counting), and three backends:
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`MemoryTicketRegistry`] | single node, tests |
//! | [`CacheTicketRegistry`] | single node, bounded and self-expiring |
//! | [`ReplicatedTicketRegistry`] | several nodes sharing a [`TicketCluster`] |
//!
//! A Redis backend lives in `cas-ticket-registry-redis`.
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables [`testutil`] (session seeding, assert macros) and the [`conformance`]
//!   suite.
//! - **`failpoints`**: Enables fail points for fault-injection tests.

#![deny(unsafe_code)]

pub mod cached;
#[cfg(any(test, feature = "testutil"))]
pub mod conformance;
pub mod error;
pub mod memory;
pub mod registry;
pub mod replicated;
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use cached::{CacheRegistryConfig, CacheRegistryConfigBuilder, CacheTicketRegistry};
pub use cas_ticket::ConfigError;
pub use error::{BoxError, RegistryError, RegistryResult};
pub use memory::MemoryTicketRegistry;
pub use registry::{MAX_LINEAGE_DEPTH, TicketCount, TicketLookup, TicketRegistry};
pub use replicated::{
    ClusterMember, ReplicatedRegistryConfig, ReplicatedTicketRegistry, TicketCluster,
};
