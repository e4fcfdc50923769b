//! Redis-backed ticket registry for multi-node CAS deployments.
//!
//! [`RedisTicketRegistry`] implements
//! [`TicketRegistry`](cas_ticket_registry::TicketRegistry) on top of a
//! shared Redis server so that every CAS node sees the same tickets.
//!
//! # Key Layout
//!
//! ```text
//! {key_prefix}{ticket_id}  →  JSON-encoded ticket, PX = remaining lifetime
//! ```
//!
//! # Failure Handling
//!
//! Every command runs under `operation_timeout` and is retried with
//! exponential backoff on connection errors and timeouts. Ticket removal is
//! the exception: it is retried only on a refused connection, and a timeout
//! is returned as
//! [`RegistryError::Timeout`](cas_ticket_registry::RegistryError::Timeout).
//! An unreachable server surfaces as
//! [`RegistryError::Unavailable`](cas_ticket_registry::RegistryError::Unavailable),
//! never as a missing ticket.
//!
//! # Feature Flags
//!
//! - **`failpoints`**: Enables the `redis-retry-before-sleep` fail point,
//!   which ends a retry loop with the last error.

#![deny(unsafe_code)]

pub mod config;
pub mod error;
mod keys;
pub mod registry;
mod retry;

pub use config::{DEFAULT_KEY_PREFIX, RedisRegistryConfig, RetryPolicyConfig};
pub use error::RedisRegistryError;
pub use registry::RedisTicketRegistry;
