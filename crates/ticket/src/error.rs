//! Ticket error types and result alias.
//!
//! Every failure that the ticket model itself can detect is expressed as a
//! [`TicketError`]. Registry and orchestration layers wrap these errors
//! rather than re-inventing them, so a caller can always match on the
//! ticket-level cause.
//!
//! # Error Types
//!
//! - [`TicketError::NotFound`] - ID absent, or expired and already reaped
//! - [`TicketError::Expired`] - ticket present but its policy says expired
//! - [`TicketError::InvalidType`] - stored ticket lacks the requested capability
//! - [`TicketError::AlreadyConsumed`] - single-use ticket was already redeemed
//! - [`TicketError::ServiceMismatch`] - ticket was granted for a different service
//! - [`TicketError::ProxyGrantingTicketAlreadyIssued`] - a service ticket may spawn one PGT
//! - [`TicketError::InvalidId`] - identifier does not follow the ticket ID format
//!
//! # Example
//!
//! ```
//! use cas_ticket::{TicketError, TicketResult};
//!
//! fn lookup(id: &str) -> TicketResult<()> {
//!     Err(TicketError::not_found(id))
//! }
//!
//! assert!(lookup("ST-1").unwrap_err().is_invalid_ticket());
//! ```

use thiserror::Error;

use crate::ticket::TicketKind;

/// Result type alias for ticket operations.
pub type TicketResult<T> = Result<T, TicketError>;

/// Errors raised by ticket grants, validation and identifier parsing.
///
/// # Non-exhaustive
///
/// New variants may be added in minor releases. Downstream match expressions
/// must include a wildcard arm.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum TicketError {
    /// No live ticket exists under this ID.
    #[error("Ticket not found: {id}")]
    NotFound {
        /// The ticket ID that was looked up.
        id: String,
    },

    /// The ticket exists but its expiration policy reports it expired.
    #[error("Ticket expired: {id}")]
    Expired {
        /// The expired ticket's ID.
        id: String,
    },

    /// The stored ticket does not satisfy the requested capability.
    #[error("Ticket {id} is a {actual}, expected {expected}")]
    InvalidType {
        /// The ticket ID.
        id: String,
        /// The capability the caller asked for.
        expected: TicketKind,
        /// The kind actually stored under the ID.
        actual: TicketKind,
    },

    /// A single-use ticket has already been redeemed.
    #[error("Ticket already consumed: {id}")]
    AlreadyConsumed {
        /// The consumed ticket's ID.
        id: String,
    },

    /// The ticket was granted for a different service than the one presenting it.
    #[error("Ticket {id} was not issued for service {requested}")]
    ServiceMismatch {
        /// The ticket ID.
        id: String,
        /// The service the ticket was granted for.
        granted: String,
        /// The service that presented the ticket.
        requested: String,
    },

    /// The service ticket already produced a proxy-granting ticket.
    #[error("Ticket {id} already granted a proxy-granting ticket")]
    ProxyGrantingTicketAlreadyIssued {
        /// The service ticket ID.
        id: String,
    },

    /// The identifier does not match `<PREFIX>-<SEQUENCE>-<RANDOM>[-<SUFFIX>]`.
    #[error("Invalid ticket ID: {id}")]
    InvalidId {
        /// The rejected identifier.
        id: String,
    },
}

impl TicketError {
    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Creates a new `Expired` error.
    #[must_use]
    pub fn expired(id: impl Into<String>) -> Self {
        Self::Expired { id: id.into() }
    }

    /// Creates a new `InvalidType` error.
    #[must_use]
    pub fn invalid_type(id: impl Into<String>, expected: TicketKind, actual: TicketKind) -> Self {
        Self::InvalidType { id: id.into(), expected, actual }
    }

    /// Creates a new `AlreadyConsumed` error.
    #[must_use]
    pub fn already_consumed(id: impl Into<String>) -> Self {
        Self::AlreadyConsumed { id: id.into() }
    }

    /// Creates a new `ServiceMismatch` error.
    #[must_use]
    pub fn service_mismatch(
        id: impl Into<String>,
        granted: impl Into<String>,
        requested: impl Into<String>,
    ) -> Self {
        Self::ServiceMismatch { id: id.into(), granted: granted.into(), requested: requested.into() }
    }

    /// Creates a new `ProxyGrantingTicketAlreadyIssued` error.
    #[must_use]
    pub fn proxy_granting_ticket_already_issued(id: impl Into<String>) -> Self {
        Self::ProxyGrantingTicketAlreadyIssued { id: id.into() }
    }

    /// Creates a new `InvalidId` error.
    #[must_use]
    pub fn invalid_id(id: impl Into<String>) -> Self {
        Self::InvalidId { id: id.into() }
    }

    /// Returns the ID of the ticket this error concerns.
    #[must_use]
    pub fn ticket_id(&self) -> &str {
        match self {
            Self::NotFound { id }
            | Self::Expired { id }
            | Self::InvalidType { id, .. }
            | Self::AlreadyConsumed { id }
            | Self::ServiceMismatch { id, .. }
            | Self::ProxyGrantingTicketAlreadyIssued { id }
            | Self::InvalidId { id } => id,
        }
    }

    /// Returns `true` for errors that the validation protocol reports as an
    /// invalid ticket (as opposed to a service or type problem).
    #[must_use]
    pub fn is_invalid_ticket(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::Expired { .. }
                | Self::AlreadyConsumed { .. }
                | Self::InvalidId { .. }
        )
    }
}

/// Errors raised while validating configuration values.
///
/// Returned by the `build()` methods of the configuration builders in this
/// workspace when a field falls outside its permitted range.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A numeric or duration field is below its minimum.
    #[error("{field} must be at least {min}, got {value}")]
    BelowMinimum {
        /// Name of the offending field.
        field: &'static str,
        /// The rejected value, rendered for display.
        value: String,
        /// The minimum accepted value, rendered for display.
        min: String,
    },

    /// A field holds a value that is not acceptable for another reason.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

impl ConfigError {
    /// Creates a new `Invalid` error.
    #[must_use]
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid { field, reason: reason.into() }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(TicketError::not_found("ST-1-abc").to_string(), "Ticket not found: ST-1-abc");
        assert_eq!(
            TicketError::invalid_type("ST-1", TicketKind::TicketGranting, TicketKind::Service)
                .to_string(),
            "Ticket ST-1 is a service ticket, expected ticket-granting ticket"
        );
    }

    #[test]
    fn test_ticket_id_accessor() {
        let err = TicketError::service_mismatch("ST-9", "https://a", "https://b");
        assert_eq!(err.ticket_id(), "ST-9");
    }

    #[test]
    fn test_invalid_ticket_classification() {
        assert!(TicketError::expired("TGT-1").is_invalid_ticket());
        assert!(TicketError::already_consumed("ST-1").is_invalid_ticket());
        assert!(!TicketError::service_mismatch("ST-1", "a", "b").is_invalid_ticket());
        assert!(
            !TicketError::invalid_type("ST-1", TicketKind::TicketGranting, TicketKind::Service)
                .is_invalid_ticket()
        );
    }
}
