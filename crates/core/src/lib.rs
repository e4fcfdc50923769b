//! Registry-backed CAS services.
//!
//! This crate wires the ticket model (`cas-ticket`) and a ticket registry
//! (`cas-ticket-registry`) into the operations a CAS server exposes:
//!
//! - [`CentralAuthenticationService`]: sessions, service and proxy grants,
//!   validation, access tokens and logout
//! - [`ServicesManager`]: which relying parties may use CAS, and how
//! - [`RegistryCleaner`]: background removal of expired tickets with single
//!   logout for abandoned sessions
//! - [`SessionMonitor`]: session and ticket counts for status pages
//!
//! The registry backend is selected by [`RegistryConfig`] and built with
//! [`TicketRegistryBackend::from_config`].
//!
//! # Feature Flags
//!
//! - **`redis`**: Adds the Redis registry backend.
//! - **`testutil`**: Enables the `testutil` module (recording logout handler).

#![deny(unsafe_code)]

pub mod backend;
pub mod cas;
pub mod cleaner;
pub mod config;
pub mod error;
mod locks;
pub mod logout;
pub mod monitor;
pub mod services;
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;
pub mod validation;

pub use backend::TicketRegistryBackend;
pub use cas::CentralAuthenticationService;
pub use cleaner::{CleanerHandle, RegistryCleaner};
pub use config::{CasConfig, CleanerConfig, MonitorConfig, RegistryConfig};
pub use error::{CasError, CasResult, codes};
pub use logout::{
    LoggingLogoutHandler, LogoutHandler, LogoutRequest, LogoutRequestStatus, SharedLogoutHandler,
    determine_logout_url, logout_requests_for,
};
pub use monitor::{SessionMonitor, SessionStatus, StatusCode};
pub use services::{
    InMemoryServicesManager, LogoutType, ProxyPolicy, RegisteredService, ServicesManager,
};
pub use validation::Assertion;
