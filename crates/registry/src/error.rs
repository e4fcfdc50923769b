//! Registry error types and result alias.
//!
//! All registry backends map their internal failures to [`RegistryError`].
//! "Ticket not found" is never an error at this layer: lookups return
//! `Option`/[`TicketLookup`](crate::TicketLookup) and the orchestration layer
//! decides how absence is reported. A backend that cannot be reached must
//! report [`RegistryError::Unavailable`] rather than pretend the ticket is
//! absent.
//!
//! # Error Types
//!
//! - [`RegistryError::Unavailable`] - backend node or connection unreachable
//! - [`RegistryError::Timeout`] - backend did not answer in time
//! - [`RegistryError::Serialization`] - stored ticket could not be encoded or decoded
//! - [`RegistryError::Internal`] - anything else
//!
//! # Example
//!
//! ```
//! use cas_ticket_registry::{RegistryError, RegistryResult};
//!
//! fn fetch() -> RegistryResult<()> {
//!     Err(RegistryError::unavailable("cache node cas-2 unreachable"))
//! }
//!
//! assert!(fetch().unwrap_err().is_transient());
//! ```

use std::sync::Arc;

use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors that can occur during registry operations.
///
/// # Non-exhaustive
///
/// New variants may be added in minor releases. Downstream match
/// expressions must include a wildcard arm.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum RegistryError {
    /// The backend could not be reached.
    #[error("Ticket registry unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },

    /// The backend did not answer within its deadline.
    #[error("Ticket registry operation timed out")]
    Timeout,

    /// A ticket could not be encoded for storage or decoded on retrieval.
    #[error("Ticket serialization error: {message}")]
    Serialization {
        /// Description of the failure.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },

    /// Backend-specific failure that fits no other category.
    #[error("Ticket registry internal error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },
}

impl RegistryError {
    /// Creates a new `Unavailable` error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable { message: message.into(), source: None }
    }

    /// Creates a new `Unavailable` error with a source error.
    #[must_use]
    pub fn unavailable_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Unavailable { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Timeout` error.
    #[must_use]
    pub fn timeout() -> Self {
        Self::Timeout
    }

    /// Creates a new `Serialization` error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into(), source: None }
    }

    /// Creates a new `Serialization` error with a source error.
    #[must_use]
    pub fn serialization_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Creates a new `Internal` error with a source error.
    #[must_use]
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Internal { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Returns `true` for failures that may succeed on retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout)
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization_with_source(err.to_string(), err)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(RegistryError::unavailable("down").is_transient());
        assert!(RegistryError::timeout().is_transient());
        assert!(!RegistryError::serialization("bad json").is_transient());
        assert!(!RegistryError::internal("boom").is_transient());
    }

    #[test]
    fn test_source_chain_is_preserved() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = RegistryError::unavailable_with_source("connect to cas-2", io);
        assert_eq!(err.to_string(), "Ticket registry unavailable: connect to cas-2");
        assert_eq!(err.source().map(ToString::to_string), Some("refused".to_owned()));
    }

    #[test]
    fn test_json_errors_map_to_serialization() {
        let err: RegistryError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, RegistryError::Serialization { source: Some(_), .. }));
    }
}
