//! Ticket model for the CAS ticketing core.
//!
//! This crate defines the tickets a Central Authentication Service issues,
//! how they expire, and how child tickets are minted from their parents.
//! It is storage-agnostic: persistence lives in `cas-ticket-registry`.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 cas-core (orchestration)                    │
//! │   sessions · service access · validation · single logout    │
//! ├─────────────────────────────────────────────────────────────┤
//! │              cas-ticket-registry (+ -redis)                 │
//! │       TicketRegistry trait · cascade · expire-on-read       │
//! ├─────────────────────────────────────────────────────────────┤
//! │                      cas-ticket                             │
//! │  TicketFactory ─ grant protocol ─ Ticket{TGT,PGT,ST,PT,AT}  │
//! │  ExpirationPolicy · TicketIdGenerator · Clock               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use chrono::Utc;
//! use cas_ticket::{Authentication, Principal, Service, TicketConfig, TicketFactory};
//!
//! let factory = TicketFactory::from_config(&TicketConfig::default())?;
//! let now = Utc::now();
//! let authentication = Authentication::builder()
//!     .principal(Principal::new("alice"))
//!     .authentication_date(now)
//!     .build();
//!
//! let mut tgt = factory.create_ticket_granting_ticket(authentication, now);
//! let service = Service::new("https://app.example.org");
//! let mut st = factory.grant_service_ticket(&mut tgt, service.clone(), true, now)?;
//!
//! st.validate(&service, now)?;
//! assert!(st.is_consumed());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module (sequential ID generator, manual clock,
//!   authentication fixtures).

#![deny(unsafe_code)]

pub mod authentication;
pub mod clock;
pub mod error;
pub mod expiration;
pub mod factory;
pub mod id;
pub mod service;
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;
pub mod ticket;

pub use authentication::{Attributes, Authentication, Principal};
pub use clock::{Clock, SharedClock, SystemClock};
pub use error::{ConfigError, TicketError, TicketResult};
pub use expiration::ExpirationPolicy;
pub use factory::{TicketConfig, TicketFactory, TicketPolicies};
pub use id::{
    DefaultTicketIdGenerator, IdGeneratorConfig, Redacted, TicketIdGenerator, TicketIdParts,
    parse_ticket_id, sanitize_ticket_ids,
};
pub use service::Service;
pub use ticket::{
    AccessToken, ProxyGrantingTicket, ProxyTicket, ServiceTicket, ServiceTracking, Ticket,
    TicketGrantingTicket, TicketKind, TicketState,
};
