//! Orchestration errors and their CAS protocol codes.
//!
//! [`CasError`] wraps the ticket and registry errors unchanged and adds the
//! access-control failures that only the orchestration layer can detect.
//! Every variant maps to the error code a validation response carries.

use cas_ticket::{ConfigError, TicketError};
use cas_ticket_registry::RegistryError;
use thiserror::Error;

/// Result type alias for orchestration operations.
pub type CasResult<T> = Result<T, CasError>;

/// Error codes reported to relying parties.
pub mod codes {
    /// Ticket absent, expired or already used.
    pub const INVALID_TICKET: &str = "INVALID_TICKET";
    /// Ticket exists but is not of the kind the endpoint accepts.
    pub const INVALID_TICKET_SPEC: &str = "INVALID_TICKET_SPEC";
    /// Ticket was issued for another service.
    pub const INVALID_SERVICE: &str = "INVALID_SERVICE";
    /// Service is not registered or not enabled.
    pub const UNAUTHORIZED_SERVICE: &str = "UNAUTHORIZED_SERVICE";
    /// Service may not proxy, or its callback is not allowed.
    pub const UNAUTHORIZED_SERVICE_PROXY: &str = "UNAUTHORIZED_SERVICE_PROXY";
    /// Anything else, including registry outages.
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

/// Errors raised by [`CentralAuthenticationService`](crate::CentralAuthenticationService).
///
/// # Non-exhaustive
///
/// New variants may be added in minor releases. Downstream match expressions
/// must include a wildcard arm.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum CasError {
    /// A ticket-level failure (not found, expired, wrong type, ...).
    #[error(transparent)]
    Ticket(#[from] TicketError),

    /// The registry could not complete the operation.
    #[error("ticket registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// No enabled registered service matches the requesting service.
    #[error("Service is not authorized to use CAS: {service}")]
    UnauthorizedService {
        /// The requesting service.
        service: String,
    },

    /// The service does not participate in single sign-on and no credential
    /// was presented.
    #[error("Service does not allow single sign-on: {service}")]
    UnauthorizedSsoService {
        /// The requesting service.
        service: String,
    },

    /// The service may not obtain proxy tickets or proxy-granting tickets.
    #[error("Service is not authorized to proxy: {service}")]
    UnauthorizedProxy {
        /// The service whose proxy policy refused the request.
        service: String,
    },
}

impl CasError {
    /// Creates a new `UnauthorizedService` error.
    #[must_use]
    pub fn unauthorized_service(service: impl Into<String>) -> Self {
        Self::UnauthorizedService { service: service.into() }
    }

    /// Creates a new `UnauthorizedSsoService` error.
    #[must_use]
    pub fn unauthorized_sso_service(service: impl Into<String>) -> Self {
        Self::UnauthorizedSsoService { service: service.into() }
    }

    /// Creates a new `UnauthorizedProxy` error.
    #[must_use]
    pub fn unauthorized_proxy(service: impl Into<String>) -> Self {
        Self::UnauthorizedProxy { service: service.into() }
    }

    /// The protocol error code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Ticket(TicketError::InvalidType { .. }) => codes::INVALID_TICKET_SPEC,
            Self::Ticket(TicketError::ServiceMismatch { .. }) => codes::INVALID_SERVICE,
            Self::Ticket(_) => codes::INVALID_TICKET,
            Self::UnauthorizedService { .. } | Self::UnauthorizedSsoService { .. } => {
                codes::UNAUTHORIZED_SERVICE
            },
            Self::UnauthorizedProxy { .. } => codes::UNAUTHORIZED_SERVICE_PROXY,
            Self::Registry(_) | Self::Config(_) => codes::INTERNAL_ERROR,
        }
    }

    /// The underlying ticket error, if any.
    #[must_use]
    pub fn as_ticket_error(&self) -> Option<&TicketError> {
        match self {
            Self::Ticket(err) => Some(err),
            _ => None,
        }
    }

    /// Whether retrying the same request may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Registry(err) if err.is_transient())
    }
}

#[cfg(test)]
mod tests {
    use cas_ticket::TicketKind;

    use super::*;

    #[test]
    fn test_protocol_codes() {
        assert_eq!(CasError::from(TicketError::not_found("ST-1")).code(), codes::INVALID_TICKET);
        assert_eq!(CasError::from(TicketError::expired("ST-1")).code(), codes::INVALID_TICKET);
        assert_eq!(
            CasError::from(TicketError::invalid_type(
                "TGT-1",
                TicketKind::Service,
                TicketKind::TicketGranting
            ))
            .code(),
            codes::INVALID_TICKET_SPEC
        );
        assert_eq!(
            CasError::from(TicketError::service_mismatch("ST-1", "a", "b")).code(),
            codes::INVALID_SERVICE
        );
        assert_eq!(CasError::unauthorized_service("x").code(), codes::UNAUTHORIZED_SERVICE);
        assert_eq!(CasError::unauthorized_sso_service("x").code(), codes::UNAUTHORIZED_SERVICE);
        assert_eq!(CasError::unauthorized_proxy("x").code(), codes::UNAUTHORIZED_SERVICE_PROXY);
        assert_eq!(
            CasError::from(RegistryError::unavailable("down")).code(),
            codes::INTERNAL_ERROR
        );
    }

    #[test]
    fn test_transient_follows_registry() {
        assert!(CasError::from(RegistryError::timeout()).is_transient());
        assert!(!CasError::from(RegistryError::internal("bug")).is_transient());
        assert!(!CasError::unauthorized_service("x").is_transient());
    }

    #[test]
    fn test_ticket_error_is_displayed_verbatim() {
        let err = CasError::from(TicketError::not_found("ST-1"));
        assert_eq!(err.to_string(), "Ticket not found: ST-1");
        assert!(err.as_ticket_error().is_some());
    }
}
