//! The result of a successful ticket validation.

use cas_ticket::{Authentication, Service};
use serde::{Deserialize, Serialize};

/// What a relying party learns when it validates a service or proxy ticket.
///
/// `chained_authentications` lists the authentication of every session the
/// ticket descends from, innermost first: for a proxy ticket, the proxying
/// services' authentications come before the user's. The last entry is
/// always the primary authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assertion {
    primary_authentication: Authentication,
    chained_authentications: Vec<Authentication>,
    service: Service,
    from_new_login: bool,
}

impl Assertion {
    /// Creates an assertion. `primary_authentication` is the last entry of
    /// `chained_authentications`.
    pub(crate) fn new(
        chained_authentications: Vec<Authentication>,
        primary_authentication: Authentication,
        service: Service,
        from_new_login: bool,
    ) -> Self {
        Self { primary_authentication, chained_authentications, service, from_new_login }
    }

    /// The end user's authentication.
    #[must_use]
    pub fn primary_authentication(&self) -> &Authentication {
        &self.primary_authentication
    }

    /// Authentications along the proxy chain, innermost first.
    #[must_use]
    pub fn chained_authentications(&self) -> &[Authentication] {
        &self.chained_authentications
    }

    /// The service the ticket was validated for.
    #[must_use]
    pub fn service(&self) -> &Service {
        &self.service
    }

    /// Whether the ticket was issued straight after a credential was
    /// presented.
    #[must_use]
    pub fn is_from_new_login(&self) -> bool {
        self.from_new_login
    }

    /// Whether the ticket was obtained through at least one proxy.
    #[must_use]
    pub fn is_proxied(&self) -> bool {
        self.chained_authentications.len() > 1
    }
}
