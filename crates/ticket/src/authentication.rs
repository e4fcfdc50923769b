//! Authentication payload carried by ticket-granting tickets.
//!
//! The authentication subsystem is an external collaborator. It hands the
//! core a validated [`Authentication`], which is stored verbatim in the
//! session's TGT and returned to relying parties on validation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Multi-valued attribute map.
pub type Attributes = BTreeMap<String, Vec<String>>;

/// An authenticated subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    id: String,
    #[serde(default)]
    attributes: Attributes,
}

impl Principal {
    /// Creates a principal without attributes.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), attributes: Attributes::new() }
    }

    /// Creates a principal with the given attributes.
    #[must_use]
    pub fn with_attributes(id: impl Into<String>, attributes: Attributes) -> Self {
        Self { id: id.into(), attributes }
    }

    /// The principal identifier, e.g. a username.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Resolved principal attributes.
    #[must_use]
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }
}

/// Result of a successful authentication transaction.
///
/// # Example
///
/// ```
/// use chrono::Utc;
/// use cas_ticket::{Authentication, Principal};
///
/// let authentication = Authentication::builder()
///     .principal(Principal::new("alice"))
///     .authentication_date(Utc::now())
///     .successes(vec!["LdapAuthenticationHandler".to_owned()])
///     .build();
/// assert_eq!(authentication.principal().id(), "alice");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
pub struct Authentication {
    principal: Principal,

    authentication_date: DateTime<Utc>,

    /// Authentication metadata such as the authentication method or a
    /// remember-me flag.
    #[serde(default)]
    #[builder(default)]
    attributes: Attributes,

    /// Names of the handlers that accepted the credentials.
    #[serde(default)]
    #[builder(default)]
    successes: Vec<String>,

    /// Handlers that rejected the credentials, with their failure message.
    #[serde(default)]
    #[builder(default)]
    failures: BTreeMap<String, String>,

    /// Identifiers of the presented credentials, never the secrets.
    #[serde(default)]
    #[builder(default)]
    credentials: Vec<String>,
}

impl Authentication {
    /// The authenticated principal.
    #[must_use]
    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    /// When the authentication took place.
    #[must_use]
    pub fn authentication_date(&self) -> DateTime<Utc> {
        self.authentication_date
    }

    /// Authentication metadata attributes.
    #[must_use]
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Handlers that succeeded.
    #[must_use]
    pub fn successes(&self) -> &[String] {
        &self.successes
    }

    /// Handlers that failed.
    #[must_use]
    pub fn failures(&self) -> &BTreeMap<String, String> {
        &self.failures
    }

    /// Presented credential identifiers.
    #[must_use]
    pub fn credentials(&self) -> &[String] {
        &self.credentials
    }
}
