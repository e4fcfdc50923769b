//! Ticket factory: identifier generation and per-kind policies wrapped
//! around the entity grant methods.
//!
//! The factory is stateless apart from its generator; it never touches a
//! registry. Callers load the parent ticket, ask the factory to mint a
//! child, then persist both.

use std::{collections::BTreeSet, fmt, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    authentication::Authentication,
    error::{ConfigError, TicketResult},
    expiration::ExpirationPolicy,
    id::{DefaultTicketIdGenerator, IdGeneratorConfig, TicketIdGenerator},
    service::Service,
    ticket::{
        AccessToken, ProxyGrantingTicket, ProxyTicket, ServiceTicket, ServiceTracking, Ticket,
        TicketGrantingTicket, TicketKind,
    },
};

/// Default hard lifetime of a session.
pub const DEFAULT_TGT_MAX_TIME_TO_LIVE: Duration = Duration::from_secs(8 * 3600);

/// Default idle timeout of a session.
pub const DEFAULT_TGT_TIME_TO_KILL: Duration = Duration::from_secs(2 * 3600);

/// Default lifetime of service and proxy tickets.
pub const DEFAULT_ST_TIME_TO_KILL: Duration = Duration::from_secs(10);

/// Default lifetime of access tokens.
pub const DEFAULT_ACCESS_TOKEN_TIME_TO_KILL: Duration = Duration::from_secs(7200);

fn default_ticket_granting_policy() -> ExpirationPolicy {
    ExpirationPolicy::TicketGrantingTicket {
        max_time_to_live: DEFAULT_TGT_MAX_TIME_TO_LIVE,
        time_to_kill: DEFAULT_TGT_TIME_TO_KILL,
    }
}

fn default_service_policy() -> ExpirationPolicy {
    ExpirationPolicy::single_use(DEFAULT_ST_TIME_TO_KILL)
}

fn default_access_token_policy() -> ExpirationPolicy {
    ExpirationPolicy::HardTimeout { time_to_kill: DEFAULT_ACCESS_TOKEN_TIME_TO_KILL }
}

/// Expiration policies assigned to newly minted tickets, per kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct TicketPolicies {
    /// Policy for ticket-granting tickets.
    #[serde(default = "default_ticket_granting_policy")]
    #[builder(default = default_ticket_granting_policy())]
    pub ticket_granting: ExpirationPolicy,

    /// Policy for proxy-granting tickets.
    #[serde(default = "default_ticket_granting_policy")]
    #[builder(default = default_ticket_granting_policy())]
    pub proxy_granting: ExpirationPolicy,

    /// Policy for service tickets.
    #[serde(default = "default_service_policy")]
    #[builder(default = default_service_policy())]
    pub service: ExpirationPolicy,

    /// Policy for proxy tickets.
    #[serde(default = "default_service_policy")]
    #[builder(default = default_service_policy())]
    pub proxy: ExpirationPolicy,

    /// Policy for access tokens.
    #[serde(default = "default_access_token_policy")]
    #[builder(default = default_access_token_policy())]
    pub access_token: ExpirationPolicy,
}

impl Default for TicketPolicies {
    fn default() -> Self {
        Self {
            ticket_granting: default_ticket_granting_policy(),
            proxy_granting: default_ticket_granting_policy(),
            service: default_service_policy(),
            proxy: default_service_policy(),
            access_token: default_access_token_policy(),
        }
    }
}

impl TicketPolicies {
    /// The policy for tickets of `kind`.
    #[must_use]
    pub fn for_kind(&self, kind: TicketKind) -> &ExpirationPolicy {
        match kind {
            TicketKind::TicketGranting => &self.ticket_granting,
            TicketKind::ProxyGranting => &self.proxy_granting,
            TicketKind::Service => &self.service,
            TicketKind::Proxy => &self.proxy,
            TicketKind::AccessToken => &self.access_token,
        }
    }
}

/// Configuration for [`TicketFactory`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TicketConfig {
    /// Identifier generation.
    #[serde(default)]
    pub id_generator: IdGeneratorConfig,

    /// Per-kind expiration policies.
    #[serde(default)]
    pub policies: TicketPolicies,

    /// How sessions record the tickets they grant.
    #[serde(default)]
    pub service_tracking: ServiceTracking,

    /// Whether access tokens are redeemable only once.
    #[serde(default)]
    pub access_token_single_use: bool,
}

impl TicketConfig {
    /// Validates nested configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the identifier configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.id_generator.validate()
    }
}

/// Mints tickets of every kind.
///
/// # Example
///
/// ```
/// use chrono::Utc;
/// use cas_ticket::{Authentication, Principal, Service, TicketConfig, TicketFactory};
///
/// let factory = TicketFactory::from_config(&TicketConfig::default())?;
/// let now = Utc::now();
/// let authentication = Authentication::builder()
///     .principal(Principal::new("alice"))
///     .authentication_date(now)
///     .build();
///
/// let mut tgt = factory.create_ticket_granting_ticket(authentication, now);
/// let st = factory.grant_service_ticket(&mut tgt, Service::new("https://app.example.org"), true, now)?;
/// assert!(st.id().starts_with("ST-"));
/// assert!(tgt.services().contains_key(st.id()));
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Clone)]
pub struct TicketFactory {
    id_generator: Arc<dyn TicketIdGenerator>,
    policies: TicketPolicies,
    service_tracking: ServiceTracking,
    access_token_single_use: bool,
}

impl fmt::Debug for TicketFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TicketFactory")
            .field("policies", &self.policies)
            .field("service_tracking", &self.service_tracking)
            .field("access_token_single_use", &self.access_token_single_use)
            .finish_non_exhaustive()
    }
}

#[bon::bon]
impl TicketFactory {
    /// Creates a factory from its parts.
    #[builder]
    pub fn new(
        id_generator: Arc<dyn TicketIdGenerator>,
        #[builder(default)] policies: TicketPolicies,
        #[builder(default)] service_tracking: ServiceTracking,
        #[builder(default)] access_token_single_use: bool,
    ) -> Self {
        Self { id_generator, policies, service_tracking, access_token_single_use }
    }

    /// Creates a factory with the default identifier generator.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` fails validation.
    pub fn from_config(config: &TicketConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            id_generator: Arc::new(DefaultTicketIdGenerator::new(config.id_generator.clone())),
            policies: config.policies.clone(),
            service_tracking: config.service_tracking,
            access_token_single_use: config.access_token_single_use,
        })
    }

    /// The configured policies.
    #[must_use]
    pub fn policies(&self) -> &TicketPolicies {
        &self.policies
    }

    fn next_id(&self, kind: TicketKind) -> String {
        self.id_generator.new_ticket_id(kind)
    }

    /// Starts a new session.
    #[must_use]
    pub fn create_ticket_granting_ticket(
        &self,
        authentication: Authentication,
        now: DateTime<Utc>,
    ) -> TicketGrantingTicket {
        TicketGrantingTicket::new(
            self.next_id(TicketKind::TicketGranting),
            authentication,
            self.policies.ticket_granting.clone(),
            now,
        )
    }

    /// Grants a service ticket from a TGT or a PGT's session.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::Expired`](crate::TicketError::Expired) if the
    /// granting ticket is expired.
    pub fn grant_service_ticket(
        &self,
        granting: &mut TicketGrantingTicket,
        service: Service,
        credential_provided: bool,
        now: DateTime<Utc>,
    ) -> TicketResult<ServiceTicket> {
        granting.grant_service_ticket(
            self.next_id(TicketKind::Service),
            service,
            self.policies.service.clone(),
            credential_provided,
            self.service_tracking,
            now,
        )
    }

    /// Mints a proxy-granting ticket from an ST or PT.
    ///
    /// # Errors
    ///
    /// See [`Ticket::grant_proxy_granting_ticket`].
    pub fn grant_proxy_granting_ticket(
        &self,
        ticket: &mut Ticket,
        authentication: Authentication,
        proxied_by: Service,
        now: DateTime<Utc>,
    ) -> TicketResult<ProxyGrantingTicket> {
        ticket.grant_proxy_granting_ticket(
            self.next_id(TicketKind::ProxyGranting),
            authentication,
            proxied_by,
            self.policies.proxy_granting.clone(),
            now,
        )
    }

    /// Grants a proxy ticket from a PGT.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::Expired`](crate::TicketError::Expired) if the
    /// proxy-granting ticket is expired.
    pub fn grant_proxy_ticket(
        &self,
        pgt: &mut ProxyGrantingTicket,
        service: Service,
        now: DateTime<Utc>,
    ) -> TicketResult<ProxyTicket> {
        pgt.grant_proxy_ticket(
            self.next_id(TicketKind::Proxy),
            service,
            self.policies.proxy.clone(),
            self.service_tracking,
            now,
        )
    }

    /// Creates an access token. When issued from a session, the session
    /// records the token so that it is revoked with the session.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::Expired`](crate::TicketError::Expired) if the
    /// session is expired.
    pub fn create_access_token(
        &self,
        session: Option<&mut TicketGrantingTicket>,
        service: Service,
        authentication: Authentication,
        scopes: BTreeSet<String>,
        now: DateTime<Utc>,
    ) -> TicketResult<AccessToken> {
        let id = self.next_id(TicketKind::AccessToken);
        let granting_ticket_id = match session {
            Some(session) => {
                session.state().ensure_live(now)?;
                session.record_descendant(id.clone());
                Some(session.id().to_owned())
            },
            None => None,
        };
        Ok(AccessToken::builder()
            .id(id)
            .service(service)
            .authentication(authentication)
            .maybe_granting_ticket_id(granting_ticket_id)
            .scopes(scopes)
            .single_use(self.access_token_single_use)
            .expiration_policy(self.policies.access_token.clone())
            .now(now)
            .build())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use chrono::{TimeDelta, TimeZone};

    use super::*;
    use crate::{
        TicketError,
        authentication::Principal,
        testutil::SequentialIdGenerator,
    };

    fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn alice() -> Authentication {
        Authentication::builder().principal(Principal::new("alice")).authentication_date(epoch()).build()
    }

    fn factory() -> TicketFactory {
        TicketFactory::builder().id_generator(Arc::new(SequentialIdGenerator::default())).build()
    }

    #[test]
    fn test_default_policies() {
        let policies = TicketPolicies::default();
        assert_eq!(policies.service.max_uses(), Some(1));
        assert_eq!(policies.for_kind(TicketKind::ProxyGranting), &policies.ticket_granting);
        assert_eq!(
            policies.for_kind(TicketKind::AccessToken),
            &ExpirationPolicy::HardTimeout { time_to_kill: Duration::from_secs(7200) }
        );
    }

    #[test]
    fn test_config_deserializes_partial_document() {
        let config: TicketConfig = serde_json::from_str(
            r#"{
                "policies": { "service": { "type": "hard_timeout", "time_to_kill": "30s" } },
                "service_tracking": "most_recent"
            }"#,
        )
        .unwrap();

        assert_eq!(
            config.policies.service,
            ExpirationPolicy::HardTimeout { time_to_kill: Duration::from_secs(30) }
        );
        assert_eq!(config.policies.ticket_granting, default_ticket_granting_policy());
        assert_eq!(config.service_tracking, ServiceTracking::MostRecent);
        assert!(!config.access_token_single_use);
    }

    #[test]
    fn test_sequential_ids_per_kind() {
        let factory = factory();
        let mut tgt = factory.create_ticket_granting_ticket(alice(), epoch());
        let st = factory
            .grant_service_ticket(&mut tgt, Service::new("https://app.example.org"), false, epoch())
            .unwrap();
        assert_eq!(tgt.id(), "TGT-1");
        assert_eq!(st.id(), "ST-1");
    }

    #[test]
    fn test_proxy_flow() {
        let factory = factory();
        let mut tgt = factory.create_ticket_granting_ticket(alice(), epoch());
        let st = factory
            .grant_service_ticket(&mut tgt, Service::new("https://portal.example.org"), false, epoch())
            .unwrap();
        let mut st = Ticket::from(st);
        let proxy = Service::new("https://portal.example.org/pgtCallback");
        let mut pgt = factory.grant_proxy_granting_ticket(&mut st, alice(), proxy.clone(), epoch()).unwrap();
        let pt = factory
            .grant_proxy_ticket(&mut pgt, Service::new("https://mail.example.org"), epoch())
            .unwrap();

        assert_eq!(pgt.id(), "PGT-1");
        assert_eq!(pgt.granting_ticket_id(), "TGT-1");
        assert_eq!(pt.id(), "PT-1");
        assert_eq!(pt.proxy_chain(), &[proxy]);
    }

    #[test]
    fn test_access_token_recorded_on_session() {
        let factory = factory();
        let mut tgt = factory.create_ticket_granting_ticket(alice(), epoch());
        let scopes = BTreeSet::from(["openid".to_owned(), "profile".to_owned()]);
        let token = factory
            .create_access_token(
                Some(&mut tgt),
                Service::new("https://client.example.org"),
                alice(),
                scopes.clone(),
                epoch(),
            )
            .unwrap();

        assert_eq!(token.id(), "AT-1");
        assert_eq!(token.granting_ticket_id(), Some("TGT-1"));
        assert_eq!(token.scopes(), &scopes);
        assert!(tgt.descendant_tickets().contains("AT-1"));
    }

    #[test]
    fn test_access_token_refused_for_expired_session() {
        let factory = factory();
        let mut tgt = factory.create_ticket_granting_ticket(alice(), epoch());
        let err = factory
            .create_access_token(
                Some(&mut tgt),
                Service::new("https://client.example.org"),
                alice(),
                BTreeSet::new(),
                epoch() + TimeDelta::hours(9),
            )
            .unwrap_err();
        assert_eq!(err, TicketError::expired("TGT-1"));
        assert!(tgt.descendant_tickets().is_empty());
    }
}
