//! Ticket entities and the grant protocol.
//!
//! Every ticket embeds a [`TicketState`] (identity, timestamps, use count and
//! expiration policy). Concrete kinds are plain structs collected in the
//! tagged [`Ticket`] enum, which is the unit the registry stores.
//!
//! # Lineage
//!
//! ```text
//!              TGT ──────────────┬──────────────┐
//!             /   \              │              │
//!           ST     ST ─(pgtUrl)─ PGT            AT
//!                                 │
//!                           PT ───┴─── PT ─(pgtUrl)─ PGT ─ PT
//! ```
//!
//! Tickets reference each other only by ID. A granting ticket (TGT or PGT)
//! records the IDs of the service/proxy tickets, proxy-granting tickets and
//! other descendants it minted, which drives cascading deletion. Every
//! non-root ticket records the ID of the ticket that granted it.
//!
//! # Capabilities
//!
//! Callers look tickets up by capability rather than exact kind:
//!
//! | Requested | Satisfied by |
//! |-----------|--------------|
//! | [`TicketKind::TicketGranting`] | TGT, PGT |
//! | [`TicketKind::Service`] | ST, PT |
//! | any other kind | exactly that kind |

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    authentication::Authentication,
    error::{TicketError, TicketResult},
    expiration::ExpirationPolicy,
    service::Service,
};

// ───────────────────────────────────────────────────────────────────────────
// TicketKind
// ───────────────────────────────────────────────────────────────────────────

/// The kind of a ticket, encoded in the ID prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketKind {
    /// Root of an SSO session (`TGT`).
    TicketGranting,
    /// Delegated session handed to a proxying service (`PGT`).
    ProxyGranting,
    /// Single-service grant (`ST`).
    Service,
    /// Service grant issued through a PGT (`PT`).
    Proxy,
    /// OAuth access token (`AT`).
    AccessToken,
}

impl TicketKind {
    /// The ID prefix for this kind.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::TicketGranting => "TGT",
            Self::ProxyGranting => "PGT",
            Self::Service => "ST",
            Self::Proxy => "PT",
            Self::AccessToken => "AT",
        }
    }

    /// Parses an ID prefix.
    #[must_use]
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "TGT" => Some(Self::TicketGranting),
            "PGT" => Some(Self::ProxyGranting),
            "ST" => Some(Self::Service),
            "PT" => Some(Self::Proxy),
            "AT" => Some(Self::AccessToken),
            _ => None,
        }
    }

    /// Infers the kind from a ticket ID's prefix.
    #[must_use]
    pub fn from_id(id: &str) -> Option<Self> {
        id.split('-').next().and_then(Self::from_prefix)
    }

    /// Returns `true` if a ticket of this kind satisfies a request for
    /// `capability`.
    #[must_use]
    pub const fn satisfies(self, capability: TicketKind) -> bool {
        match capability {
            Self::TicketGranting => matches!(self, Self::TicketGranting | Self::ProxyGranting),
            Self::Service => matches!(self, Self::Service | Self::Proxy),
            Self::ProxyGranting => matches!(self, Self::ProxyGranting),
            Self::Proxy => matches!(self, Self::Proxy),
            Self::AccessToken => matches!(self, Self::AccessToken),
        }
    }
}

impl fmt::Display for TicketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::TicketGranting => "ticket-granting ticket",
            Self::ProxyGranting => "proxy-granting ticket",
            Self::Service => "service ticket",
            Self::Proxy => "proxy ticket",
            Self::AccessToken => "access token",
        })
    }
}

// ───────────────────────────────────────────────────────────────────────────
// TicketState
// ───────────────────────────────────────────────────────────────────────────

/// State shared by every ticket kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketState {
    id: String,
    creation_time: DateTime<Utc>,
    last_time_used: DateTime<Utc>,
    previous_time_used: Option<DateTime<Utc>>,
    count_of_uses: u32,
    expiration_policy: ExpirationPolicy,
}

impl TicketState {
    /// Creates the state of a ticket minted at `now`.
    #[must_use]
    pub fn new(id: impl Into<String>, expiration_policy: ExpirationPolicy, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            creation_time: now,
            last_time_used: now,
            previous_time_used: None,
            count_of_uses: 0,
            expiration_policy,
        }
    }

    /// Ticket identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// When the ticket was minted.
    #[must_use]
    pub fn creation_time(&self) -> DateTime<Utc> {
        self.creation_time
    }

    /// When the ticket was last used, or its creation time if never used.
    #[must_use]
    pub fn last_time_used(&self) -> DateTime<Utc> {
        self.last_time_used
    }

    /// The use before the last one, if any.
    #[must_use]
    pub fn previous_time_used(&self) -> Option<DateTime<Utc>> {
        self.previous_time_used
    }

    /// Number of successful uses.
    #[must_use]
    pub fn count_of_uses(&self) -> u32 {
        self.count_of_uses
    }

    /// The policy attached at creation.
    #[must_use]
    pub fn expiration_policy(&self) -> &ExpirationPolicy {
        &self.expiration_policy
    }

    /// Evaluates the expiration policy at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration_policy.is_expired(self, now)
    }

    /// Records a successful use at `now`.
    pub fn record_use(&mut self, now: DateTime<Utc>) {
        self.previous_time_used = Some(self.last_time_used);
        self.last_time_used = now;
        self.count_of_uses = self.count_of_uses.saturating_add(1);
    }

    /// Fails with [`TicketError::Expired`] if the ticket is expired at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::Expired`] when the policy reports expiry.
    pub fn ensure_live(&self, now: DateTime<Utc>) -> TicketResult<()> {
        if self.is_expired(now) { Err(TicketError::expired(&self.id)) } else { Ok(()) }
    }

    /// Whether the ticket has no uses left once it has been used.
    fn uses_exhausted(&self) -> bool {
        self.count_of_uses >= self.expiration_policy.max_uses().unwrap_or(1)
    }
}

// ───────────────────────────────────────────────────────────────────────────
// Granting tickets
// ───────────────────────────────────────────────────────────────────────────

/// How a granting ticket records the services it issued tickets for.
///
/// The records drive single logout and cascading deletion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceTracking {
    /// Record every granted ticket.
    #[default]
    All,
    /// Keep only the most recent ticket per service.
    MostRecent,
    /// Record nothing, for stateless flows.
    None,
}

/// A ticket-granting ticket: the root of an SSO session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketGrantingTicket {
    state: TicketState,
    authentication: Authentication,
    #[serde(default)]
    services: BTreeMap<String, Service>,
    #[serde(default)]
    proxy_granting_tickets: BTreeMap<String, Service>,
    #[serde(default)]
    descendant_tickets: BTreeSet<String>,
}

impl TicketGrantingTicket {
    /// Creates a session for `authentication`.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        authentication: Authentication,
        expiration_policy: ExpirationPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            state: TicketState::new(id, expiration_policy, now),
            authentication,
            services: BTreeMap::new(),
            proxy_granting_tickets: BTreeMap::new(),
            descendant_tickets: BTreeSet::new(),
        }
    }

    /// Ticket identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        self.state.id()
    }

    /// Shared ticket state.
    #[must_use]
    pub fn state(&self) -> &TicketState {
        &self.state
    }

    /// The session's authentication.
    #[must_use]
    pub fn authentication(&self) -> &Authentication {
        &self.authentication
    }

    /// Service and proxy tickets granted from this ticket, keyed by ticket ID.
    #[must_use]
    pub fn services(&self) -> &BTreeMap<String, Service> {
        &self.services
    }

    /// Child proxy-granting tickets, keyed by ticket ID, with the service
    /// that received each one.
    #[must_use]
    pub fn proxy_granting_tickets(&self) -> &BTreeMap<String, Service> {
        &self.proxy_granting_tickets
    }

    /// Other descendant tickets, such as access tokens.
    #[must_use]
    pub fn descendant_tickets(&self) -> &BTreeSet<String> {
        &self.descendant_tickets
    }

    /// Grants a service ticket for `service`.
    ///
    /// On success the use counter and idle clock are advanced and, depending
    /// on `tracking`, the new ticket is recorded for single logout.
    /// `credential_provided` becomes the ticket's `from_new_login` flag.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::Expired`] if this ticket is expired; nothing is
    /// mutated in that case.
    pub fn grant_service_ticket(
        &mut self,
        id: impl Into<String>,
        service: Service,
        expiration_policy: ExpirationPolicy,
        credential_provided: bool,
        tracking: ServiceTracking,
        now: DateTime<Utc>,
    ) -> TicketResult<ServiceTicket> {
        self.state.ensure_live(now)?;
        let id = id.into();
        self.state.record_use(now);
        match tracking {
            ServiceTracking::All => {
                self.services.insert(id.clone(), service.clone());
            },
            ServiceTracking::MostRecent => {
                self.services.retain(|_, granted| !granted.matches(&service));
                self.services.insert(id.clone(), service.clone());
            },
            ServiceTracking::None => {},
        }
        Ok(ServiceTicket::new(id, service, self.id(), credential_provided, expiration_policy, now))
    }

    /// Records a child proxy-granting ticket.
    pub fn record_proxy_granting_ticket(&mut self, id: impl Into<String>, proxied_by: Service) {
        self.proxy_granting_tickets.insert(id.into(), proxied_by);
    }

    /// Records another descendant ticket, such as an access token.
    pub fn record_descendant(&mut self, id: impl Into<String>) {
        self.descendant_tickets.insert(id.into());
    }

    /// Forgets a child ticket of any kind. Returns `true` if it was recorded.
    pub fn remove_child(&mut self, id: &str) -> bool {
        let service = self.services.remove(id).is_some();
        let proxy = self.proxy_granting_tickets.remove(id).is_some();
        let descendant = self.descendant_tickets.remove(id);
        service || proxy || descendant
    }

    /// Every child ticket ID: granted service/proxy tickets, proxy-granting
    /// tickets and other descendants.
    pub fn child_ticket_ids(&self) -> impl Iterator<Item = &str> {
        self.services
            .keys()
            .chain(self.proxy_granting_tickets.keys())
            .chain(self.descendant_tickets.iter())
            .map(String::as_str)
    }
}

/// A proxy-granting ticket: a delegated session held by a proxying service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyGrantingTicket {
    session: TicketGrantingTicket,
    granting_ticket_id: String,
    proxied_by: Service,
    #[serde(default)]
    proxy_chain: Vec<Service>,
}

impl ProxyGrantingTicket {
    /// Ticket identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        self.session.id()
    }

    /// The session capabilities shared with ticket-granting tickets.
    #[must_use]
    pub fn session(&self) -> &TicketGrantingTicket {
        &self.session
    }

    /// Mutable access to the session capabilities.
    pub fn session_mut(&mut self) -> &mut TicketGrantingTicket {
        &mut self.session
    }

    /// ID of the granting ticket (TGT or PGT) that this ticket descends from.
    #[must_use]
    pub fn granting_ticket_id(&self) -> &str {
        &self.granting_ticket_id
    }

    /// The proxying service holding this ticket.
    #[must_use]
    pub fn proxied_by(&self) -> &Service {
        &self.proxied_by
    }

    /// Proxies that preceded this one, most recent first.
    #[must_use]
    pub fn proxy_chain(&self) -> &[Service] {
        &self.proxy_chain
    }

    /// Grants a proxy ticket for `service`. The ticket's proxy chain is this
    /// ticket's proxying service followed by the inherited chain.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::Expired`] if this ticket is expired.
    pub fn grant_proxy_ticket(
        &mut self,
        id: impl Into<String>,
        service: Service,
        expiration_policy: ExpirationPolicy,
        tracking: ServiceTracking,
        now: DateTime<Utc>,
    ) -> TicketResult<ProxyTicket> {
        let ticket =
            self.session.grant_service_ticket(id, service, expiration_policy, false, tracking, now)?;
        let mut proxy_chain = Vec::with_capacity(self.proxy_chain.len() + 1);
        proxy_chain.push(self.proxied_by.clone());
        proxy_chain.extend(self.proxy_chain.iter().cloned());
        Ok(ProxyTicket { ticket, proxy_chain })
    }
}

// ───────────────────────────────────────────────────────────────────────────
// Service tickets
// ───────────────────────────────────────────────────────────────────────────

/// A service ticket: a short-lived grant for one relying party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTicket {
    state: TicketState,
    service: Service,
    granting_ticket_id: String,
    from_new_login: bool,
    #[serde(default)]
    proxy_granting_ticket_id: Option<String>,
    #[serde(default)]
    consumed: bool,
}

impl ServiceTicket {
    /// Creates a service ticket. Prefer
    /// [`TicketGrantingTicket::grant_service_ticket`], which also maintains
    /// the session's records.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        service: Service,
        granting_ticket_id: impl Into<String>,
        from_new_login: bool,
        expiration_policy: ExpirationPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            state: TicketState::new(id, expiration_policy, now),
            service,
            granting_ticket_id: granting_ticket_id.into(),
            from_new_login,
            proxy_granting_ticket_id: None,
            consumed: false,
        }
    }

    /// Ticket identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        self.state.id()
    }

    /// Shared ticket state.
    #[must_use]
    pub fn state(&self) -> &TicketState {
        &self.state
    }

    /// The service this ticket was granted for.
    #[must_use]
    pub fn service(&self) -> &Service {
        &self.service
    }

    /// ID of the granting ticket (TGT or PGT).
    #[must_use]
    pub fn granting_ticket_id(&self) -> &str {
        &self.granting_ticket_id
    }

    /// Whether the ticket was issued right after credentials were presented
    /// rather than from an existing SSO session.
    #[must_use]
    pub fn is_from_new_login(&self) -> bool {
        self.from_new_login
    }

    /// The proxy-granting ticket minted from this ticket, if any.
    #[must_use]
    pub fn proxy_granting_ticket_id(&self) -> Option<&str> {
        self.proxy_granting_ticket_id.as_deref()
    }

    /// Whether the ticket has been redeemed and has no uses left.
    #[must_use]
    pub fn is_consumed(&self) -> bool {
        self.consumed
    }

    /// Validates the ticket for `service` and records the use.
    ///
    /// Checks run in a fixed order: expiry, then service match, then
    /// consumption. An expired ticket is always reported as expired.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::Expired`], [`TicketError::ServiceMismatch`] or
    /// [`TicketError::AlreadyConsumed`]; the ticket is unchanged on error.
    pub fn validate(&mut self, service: &Service, now: DateTime<Utc>) -> TicketResult<()> {
        self.state.ensure_live(now)?;
        if !self.service.matches(service) {
            return Err(TicketError::service_mismatch(self.id(), self.service.id(), service.id()));
        }
        if self.consumed {
            return Err(TicketError::already_consumed(self.id()));
        }
        self.state.record_use(now);
        self.consumed = self.state.uses_exhausted();
        Ok(())
    }

    /// Mints a proxy-granting ticket for the proxying service `proxied_by`.
    ///
    /// The new ticket descends from this ticket's granting ticket. A service
    /// ticket can produce at most one proxy-granting ticket.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::Expired`], [`TicketError::AlreadyConsumed`] or
    /// [`TicketError::ProxyGrantingTicketAlreadyIssued`].
    pub fn grant_proxy_granting_ticket(
        &mut self,
        id: impl Into<String>,
        authentication: Authentication,
        proxied_by: Service,
        expiration_policy: ExpirationPolicy,
        now: DateTime<Utc>,
    ) -> TicketResult<ProxyGrantingTicket> {
        self.mint_proxy_granting_ticket(
            id.into(),
            authentication,
            proxied_by,
            Vec::new(),
            expiration_policy,
            now,
        )
    }

    fn mint_proxy_granting_ticket(
        &mut self,
        id: String,
        authentication: Authentication,
        proxied_by: Service,
        proxy_chain: Vec<Service>,
        expiration_policy: ExpirationPolicy,
        now: DateTime<Utc>,
    ) -> TicketResult<ProxyGrantingTicket> {
        self.state.ensure_live(now)?;
        if self.consumed {
            return Err(TicketError::already_consumed(self.id()));
        }
        if self.proxy_granting_ticket_id.is_some() {
            return Err(TicketError::proxy_granting_ticket_already_issued(self.id()));
        }
        self.proxy_granting_ticket_id = Some(id.clone());
        Ok(ProxyGrantingTicket {
            session: TicketGrantingTicket::new(id, authentication, expiration_policy, now),
            granting_ticket_id: self.granting_ticket_id.clone(),
            proxied_by,
            proxy_chain,
        })
    }
}

/// A proxy ticket: a service ticket issued through a proxy-granting ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyTicket {
    ticket: ServiceTicket,
    proxy_chain: Vec<Service>,
}

impl ProxyTicket {
    /// Ticket identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        self.ticket.id()
    }

    /// The underlying service-ticket capabilities.
    #[must_use]
    pub fn service_ticket(&self) -> &ServiceTicket {
        &self.ticket
    }

    /// Mutable access to the service-ticket capabilities.
    pub fn service_ticket_mut(&mut self) -> &mut ServiceTicket {
        &mut self.ticket
    }

    /// The services that proxied this request, most recent first.
    #[must_use]
    pub fn proxy_chain(&self) -> &[Service] {
        &self.proxy_chain
    }

    /// Mints a proxy-granting ticket, extending the delegation chain.
    ///
    /// # Errors
    ///
    /// See [`ServiceTicket::grant_proxy_granting_ticket`].
    pub fn grant_proxy_granting_ticket(
        &mut self,
        id: impl Into<String>,
        authentication: Authentication,
        proxied_by: Service,
        expiration_policy: ExpirationPolicy,
        now: DateTime<Utc>,
    ) -> TicketResult<ProxyGrantingTicket> {
        let chain = self.proxy_chain.clone();
        self.ticket.mint_proxy_granting_ticket(
            id.into(),
            authentication,
            proxied_by,
            chain,
            expiration_policy,
            now,
        )
    }
}

// ───────────────────────────────────────────────────────────────────────────
// Access tokens
// ───────────────────────────────────────────────────────────────────────────

/// An OAuth access token bound to an authentication and a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    state: TicketState,
    service: Service,
    authentication: Authentication,
    #[serde(default)]
    granting_ticket_id: Option<String>,
    #[serde(default)]
    scopes: BTreeSet<String>,
    single_use: bool,
    #[serde(default)]
    consumed: bool,
}

#[bon::bon]
impl AccessToken {
    /// Creates an access token.
    #[builder]
    pub fn new(
        #[builder(into)] id: String,
        service: Service,
        authentication: Authentication,
        #[builder(into)] granting_ticket_id: Option<String>,
        #[builder(default)] scopes: BTreeSet<String>,
        #[builder(default)] single_use: bool,
        expiration_policy: ExpirationPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            state: TicketState::new(id, expiration_policy, now),
            service,
            authentication,
            granting_ticket_id,
            scopes,
            single_use,
            consumed: false,
        }
    }

    /// Ticket identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        self.state.id()
    }

    /// Shared ticket state.
    #[must_use]
    pub fn state(&self) -> &TicketState {
        &self.state
    }

    /// The client service the token was issued to.
    #[must_use]
    pub fn service(&self) -> &Service {
        &self.service
    }

    /// The authentication the token represents.
    #[must_use]
    pub fn authentication(&self) -> &Authentication {
        &self.authentication
    }

    /// The session the token was issued from, if any.
    #[must_use]
    pub fn granting_ticket_id(&self) -> Option<&str> {
        self.granting_ticket_id.as_deref()
    }

    /// Granted scopes.
    #[must_use]
    pub fn scopes(&self) -> &BTreeSet<String> {
        &self.scopes
    }

    /// Whether the token is redeemable only once.
    #[must_use]
    pub fn is_single_use(&self) -> bool {
        self.single_use
    }

    /// Whether a single-use token has been redeemed.
    #[must_use]
    pub fn is_consumed(&self) -> bool {
        self.consumed
    }

    /// Validates the token, optionally for a specific service, and records
    /// the use. Check order matches [`ServiceTicket::validate`].
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::Expired`], [`TicketError::ServiceMismatch`] or
    /// [`TicketError::AlreadyConsumed`].
    pub fn validate(&mut self, service: Option<&Service>, now: DateTime<Utc>) -> TicketResult<()> {
        self.state.ensure_live(now)?;
        if let Some(service) = service
            && !self.service.matches(service)
        {
            return Err(TicketError::service_mismatch(self.id(), self.service.id(), service.id()));
        }
        if self.consumed {
            return Err(TicketError::already_consumed(self.id()));
        }
        self.state.record_use(now);
        self.consumed = self.single_use;
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────────────────
// Ticket
// ───────────────────────────────────────────────────────────────────────────

/// Any ticket, as stored in a registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Ticket {
    /// A ticket-granting ticket.
    TicketGranting(TicketGrantingTicket),
    /// A proxy-granting ticket.
    ProxyGranting(ProxyGrantingTicket),
    /// A service ticket.
    Service(ServiceTicket),
    /// A proxy ticket.
    Proxy(ProxyTicket),
    /// An access token.
    AccessToken(AccessToken),
}

impl Ticket {
    /// Ticket identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        self.state().id()
    }

    /// The concrete kind.
    #[must_use]
    pub fn kind(&self) -> TicketKind {
        match self {
            Self::TicketGranting(_) => TicketKind::TicketGranting,
            Self::ProxyGranting(_) => TicketKind::ProxyGranting,
            Self::Service(_) => TicketKind::Service,
            Self::Proxy(_) => TicketKind::Proxy,
            Self::AccessToken(_) => TicketKind::AccessToken,
        }
    }

    /// Shared ticket state.
    #[must_use]
    pub fn state(&self) -> &TicketState {
        match self {
            Self::TicketGranting(t) => &t.state,
            Self::ProxyGranting(t) => &t.session.state,
            Self::Service(t) => &t.state,
            Self::Proxy(t) => &t.ticket.state,
            Self::AccessToken(t) => &t.state,
        }
    }

    /// Evaluates the ticket's own expiration policy at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.state().is_expired(now)
    }

    /// Returns `true` if this ticket satisfies a request for `capability`.
    #[must_use]
    pub fn satisfies(&self, capability: TicketKind) -> bool {
        self.kind().satisfies(capability)
    }

    /// ID of the ticket that granted this one. `None` for a TGT and for an
    /// access token issued without a session.
    #[must_use]
    pub fn granting_ticket_id(&self) -> Option<&str> {
        match self {
            Self::TicketGranting(_) => None,
            Self::ProxyGranting(t) => Some(&t.granting_ticket_id),
            Self::Service(t) => Some(&t.granting_ticket_id),
            Self::Proxy(t) => Some(&t.ticket.granting_ticket_id),
            Self::AccessToken(t) => t.granting_ticket_id.as_deref(),
        }
    }

    /// Session capabilities of a TGT or PGT.
    #[must_use]
    pub fn as_ticket_granting(&self) -> Option<&TicketGrantingTicket> {
        match self {
            Self::TicketGranting(t) => Some(t),
            Self::ProxyGranting(t) => Some(&t.session),
            _ => None,
        }
    }

    /// Mutable session capabilities of a TGT or PGT.
    pub fn as_ticket_granting_mut(&mut self) -> Option<&mut TicketGrantingTicket> {
        match self {
            Self::TicketGranting(t) => Some(t),
            Self::ProxyGranting(t) => Some(&mut t.session),
            _ => None,
        }
    }

    /// Service-ticket capabilities of an ST or PT.
    #[must_use]
    pub fn as_service_ticket(&self) -> Option<&ServiceTicket> {
        match self {
            Self::Service(t) => Some(t),
            Self::Proxy(t) => Some(&t.ticket),
            _ => None,
        }
    }

    /// Mutable service-ticket capabilities of an ST or PT.
    pub fn as_service_ticket_mut(&mut self) -> Option<&mut ServiceTicket> {
        match self {
            Self::Service(t) => Some(t),
            Self::Proxy(t) => Some(&mut t.ticket),
            _ => None,
        }
    }

    /// The ticket as a proxy-granting ticket.
    #[must_use]
    pub fn as_proxy_granting(&self) -> Option<&ProxyGrantingTicket> {
        match self {
            Self::ProxyGranting(t) => Some(t),
            _ => None,
        }
    }

    /// The ticket as a mutable proxy-granting ticket.
    pub fn as_proxy_granting_mut(&mut self) -> Option<&mut ProxyGrantingTicket> {
        match self {
            Self::ProxyGranting(t) => Some(t),
            _ => None,
        }
    }

    /// The ticket as a proxy ticket.
    #[must_use]
    pub fn as_proxy_ticket(&self) -> Option<&ProxyTicket> {
        match self {
            Self::Proxy(t) => Some(t),
            _ => None,
        }
    }

    /// The ticket as an access token.
    #[must_use]
    pub fn as_access_token(&self) -> Option<&AccessToken> {
        match self {
            Self::AccessToken(t) => Some(t),
            _ => None,
        }
    }

    /// The ticket as a mutable access token.
    pub fn as_access_token_mut(&mut self) -> Option<&mut AccessToken> {
        match self {
            Self::AccessToken(t) => Some(t),
            _ => None,
        }
    }

    /// IDs of the tickets this ticket granted. Empty for non-granting kinds.
    #[must_use]
    pub fn child_ticket_ids(&self) -> Vec<String> {
        self.as_ticket_granting()
            .map(|t| t.child_ticket_ids().map(str::to_owned).collect())
            .unwrap_or_default()
    }

    /// Mints a proxy-granting ticket from an ST or PT.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::InvalidType`] for other kinds, otherwise see
    /// [`ServiceTicket::grant_proxy_granting_ticket`].
    pub fn grant_proxy_granting_ticket(
        &mut self,
        id: impl Into<String>,
        authentication: Authentication,
        proxied_by: Service,
        expiration_policy: ExpirationPolicy,
        now: DateTime<Utc>,
    ) -> TicketResult<ProxyGrantingTicket> {
        match self {
            Self::Service(t) => {
                t.grant_proxy_granting_ticket(id, authentication, proxied_by, expiration_policy, now)
            },
            Self::Proxy(t) => {
                t.grant_proxy_granting_ticket(id, authentication, proxied_by, expiration_policy, now)
            },
            other => Err(TicketError::invalid_type(other.id(), TicketKind::Service, other.kind())),
        }
    }
}

impl From<TicketGrantingTicket> for Ticket {
    fn from(ticket: TicketGrantingTicket) -> Self {
        Self::TicketGranting(ticket)
    }
}

impl From<ProxyGrantingTicket> for Ticket {
    fn from(ticket: ProxyGrantingTicket) -> Self {
        Self::ProxyGranting(ticket)
    }
}

impl From<ServiceTicket> for Ticket {
    fn from(ticket: ServiceTicket) -> Self {
        Self::Service(ticket)
    }
}

impl From<ProxyTicket> for Ticket {
    fn from(ticket: ProxyTicket) -> Self {
        Self::Proxy(ticket)
    }
}

impl From<AccessToken> for Ticket {
    fn from(ticket: AccessToken) -> Self {
        Self::AccessToken(ticket)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeDelta, TimeZone};

    use super::*;
    use crate::authentication::Principal;

    fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn alice() -> Authentication {
        Authentication::builder().principal(Principal::new("alice")).authentication_date(epoch()).build()
    }

    fn session_policy() -> ExpirationPolicy {
        ExpirationPolicy::TicketGrantingTicket {
            max_time_to_live: Duration::from_secs(8 * 3600),
            time_to_kill: Duration::from_secs(2 * 3600),
        }
    }

    fn st_policy() -> ExpirationPolicy {
        ExpirationPolicy::single_use(Duration::from_secs(10))
    }

    fn app() -> Service {
        Service::new("https://app.example.org")
    }

    #[test]
    fn test_capability_table() {
        type K = TicketKind;
        assert!(K::TicketGranting.satisfies(K::TicketGranting));
        assert!(K::ProxyGranting.satisfies(K::TicketGranting));
        assert!(!K::Service.satisfies(K::TicketGranting));
        assert!(K::Proxy.satisfies(K::Service));
        assert!(!K::TicketGranting.satisfies(K::Service));
        assert!(!K::Service.satisfies(K::Proxy));
        assert!(!K::ProxyGranting.satisfies(K::AccessToken));
    }

    #[test]
    fn test_prefix_round_trip() {
        for kind in [
            TicketKind::TicketGranting,
            TicketKind::ProxyGranting,
            TicketKind::Service,
            TicketKind::Proxy,
            TicketKind::AccessToken,
        ] {
            assert_eq!(TicketKind::from_prefix(kind.prefix()), Some(kind));
        }
        assert_eq!(TicketKind::from_id("PGT-4-abc"), Some(TicketKind::ProxyGranting));
        assert_eq!(TicketKind::from_id("LT-1-abc"), None);
    }

    #[test]
    fn test_grant_service_ticket_records_service_and_use() {
        let mut tgt = TicketGrantingTicket::new("TGT-1", alice(), session_policy(), epoch());
        let later = epoch() + TimeDelta::seconds(30);
        let st = tgt
            .grant_service_ticket("ST-1", app(), st_policy(), true, ServiceTracking::All, later)
            .unwrap();

        assert_eq!(st.granting_ticket_id(), "TGT-1");
        assert!(st.is_from_new_login());
        assert_eq!(tgt.state().count_of_uses(), 1);
        assert_eq!(tgt.state().last_time_used(), later);
        assert_eq!(tgt.services().get("ST-1"), Some(&app()));
    }

    #[test]
    fn test_grant_from_expired_ticket_mutates_nothing() {
        let mut tgt = TicketGrantingTicket::new("TGT-1", alice(), session_policy(), epoch());
        let before = tgt.clone();
        let err = tgt
            .grant_service_ticket(
                "ST-1",
                app(),
                st_policy(),
                false,
                ServiceTracking::All,
                epoch() + TimeDelta::hours(3),
            )
            .unwrap_err();

        assert_eq!(err, TicketError::expired("TGT-1"));
        assert_eq!(tgt, before);
    }

    #[test]
    fn test_service_tracking_modes() {
        let mut tgt = TicketGrantingTicket::new("TGT-1", alice(), session_policy(), epoch());
        tgt.grant_service_ticket("ST-1", app(), st_policy(), false, ServiceTracking::MostRecent, epoch())
            .unwrap();
        tgt.grant_service_ticket("ST-2", app(), st_policy(), false, ServiceTracking::MostRecent, epoch())
            .unwrap();
        assert_eq!(tgt.services().keys().collect::<Vec<_>>(), vec!["ST-2"]);

        tgt.grant_service_ticket("ST-3", app(), st_policy(), false, ServiceTracking::None, epoch())
            .unwrap();
        assert!(!tgt.services().contains_key("ST-3"));
        assert_eq!(tgt.state().count_of_uses(), 3);
    }

    #[test]
    fn test_validate_checks_expiry_before_consumption() {
        let mut st = ServiceTicket::new("ST-1", app(), "TGT-1", false, st_policy(), epoch());
        st.validate(&app(), epoch()).unwrap();
        assert!(st.is_consumed());

        // Used up under a single-use policy: reported as expired, not consumed.
        assert_eq!(st.validate(&app(), epoch()).unwrap_err(), TicketError::expired("ST-1"));
    }

    #[test]
    fn test_validate_consumption_under_time_only_policy() {
        let policy = ExpirationPolicy::HardTimeout { time_to_kill: Duration::from_secs(10) };
        let mut st = ServiceTicket::new("ST-1", app(), "TGT-1", false, policy, epoch());
        st.validate(&app(), epoch()).unwrap();
        assert_eq!(st.validate(&app(), epoch()).unwrap_err(), TicketError::already_consumed("ST-1"));
    }

    #[test]
    fn test_multi_use_ticket_consumed_on_last_use() {
        let policy = ExpirationPolicy::MultiTimeUseOrTimeout {
            number_of_uses: 2,
            time_to_kill: Duration::from_secs(10),
        };
        let mut st = ServiceTicket::new("ST-1", app(), "TGT-1", false, policy, epoch());
        st.validate(&app(), epoch()).unwrap();
        assert!(!st.is_consumed());
        st.validate(&app(), epoch()).unwrap();
        assert!(st.is_consumed());
    }

    #[test]
    fn test_validate_rejects_other_service_without_consuming() {
        let mut st = ServiceTicket::new("ST-1", app(), "TGT-1", false, st_policy(), epoch());
        let err = st.validate(&Service::new("https://evil.example.org"), epoch()).unwrap_err();
        assert!(matches!(err, TicketError::ServiceMismatch { .. }));
        assert_eq!(st.state().count_of_uses(), 0);
        st.validate(&app(), epoch()).unwrap();
    }

    #[test]
    fn test_proxy_granting_ticket_lineage() {
        let mut st = ServiceTicket::new("ST-1", app(), "TGT-1", false, st_policy(), epoch());
        let proxy = Service::new("https://proxy.example.org/callback");
        let pgt = st
            .grant_proxy_granting_ticket("PGT-1", alice(), proxy.clone(), session_policy(), epoch())
            .unwrap();

        assert_eq!(pgt.granting_ticket_id(), "TGT-1");
        assert_eq!(pgt.proxied_by(), &proxy);
        assert_eq!(st.proxy_granting_ticket_id(), Some("PGT-1"));

        let again = st.grant_proxy_granting_ticket("PGT-2", alice(), proxy, session_policy(), epoch());
        assert_eq!(again.unwrap_err(), TicketError::proxy_granting_ticket_already_issued("ST-1"));
    }

    #[test]
    fn test_proxy_granting_ticket_refused_after_consumption() {
        let policy = ExpirationPolicy::HardTimeout { time_to_kill: Duration::from_secs(10) };
        let mut st = ServiceTicket::new("ST-1", app(), "TGT-1", false, policy, epoch());
        st.validate(&app(), epoch()).unwrap();
        let err = st
            .grant_proxy_granting_ticket("PGT-1", alice(), app(), session_policy(), epoch())
            .unwrap_err();
        assert_eq!(err, TicketError::already_consumed("ST-1"));
    }

    #[test]
    fn test_proxy_chain_grows_through_delegation() {
        let first_proxy = Service::new("https://proxy-a.example.org");
        let second_proxy = Service::new("https://proxy-b.example.org");
        let backend = Service::new("https://backend.example.org");

        let mut st = ServiceTicket::new("ST-1", app(), "TGT-1", false, st_policy(), epoch());
        let mut pgt1 = st
            .grant_proxy_granting_ticket("PGT-1", alice(), first_proxy.clone(), session_policy(), epoch())
            .unwrap();
        let mut pt1 = pgt1
            .grant_proxy_ticket("PT-1", second_proxy.clone(), st_policy(), ServiceTracking::All, epoch())
            .unwrap();
        assert_eq!(pt1.proxy_chain(), std::slice::from_ref(&first_proxy));
        assert_eq!(pgt1.session().services().get("PT-1"), Some(&second_proxy));

        let mut pgt2 = pt1
            .grant_proxy_granting_ticket("PGT-2", alice(), second_proxy.clone(), session_policy(), epoch())
            .unwrap();
        assert_eq!(pgt2.granting_ticket_id(), "PGT-1");

        let pt2 = pgt2
            .grant_proxy_ticket("PT-2", backend, st_policy(), ServiceTracking::All, epoch())
            .unwrap();
        assert_eq!(pt2.proxy_chain(), &[second_proxy, first_proxy]);
        assert_eq!(pt2.service_ticket().granting_ticket_id(), "PGT-2");
    }

    #[test]
    fn test_access_token_single_use() {
        let mut token = AccessToken::builder()
            .id("AT-1")
            .service(app())
            .authentication(alice())
            .granting_ticket_id("TGT-1")
            .single_use(true)
            .expiration_policy(ExpirationPolicy::HardTimeout {
                time_to_kill: Duration::from_secs(7200),
            })
            .now(epoch())
            .build();

        token.validate(None, epoch()).unwrap();
        assert_eq!(token.validate(Some(&app()), epoch()).unwrap_err(), TicketError::already_consumed("AT-1"));
    }

    #[test]
    fn test_ticket_enum_accessors() {
        let mut ticket: Ticket = TicketGrantingTicket::new("TGT-1", alice(), session_policy(), epoch()).into();
        assert_eq!(ticket.kind(), TicketKind::TicketGranting);
        assert!(ticket.satisfies(TicketKind::TicketGranting));
        assert!(ticket.as_service_ticket().is_none());
        assert_eq!(ticket.granting_ticket_id(), None);

        let tgt = ticket.as_ticket_granting_mut().unwrap();
        tgt.grant_service_ticket("ST-1", app(), st_policy(), false, ServiceTracking::All, epoch())
            .unwrap();
        tgt.record_proxy_granting_ticket("PGT-1", app());
        tgt.record_descendant("AT-1");
        assert_eq!(ticket.child_ticket_ids(), vec!["ST-1", "PGT-1", "AT-1"]);

        let err = ticket
            .grant_proxy_granting_ticket("PGT-2", alice(), app(), session_policy(), epoch())
            .unwrap_err();
        assert!(matches!(err, TicketError::InvalidType { .. }));
    }

    #[test]
    fn test_remove_child() {
        let mut tgt = TicketGrantingTicket::new("TGT-1", alice(), session_policy(), epoch());
        tgt.record_proxy_granting_ticket("PGT-1", app());
        assert!(tgt.remove_child("PGT-1"));
        assert!(!tgt.remove_child("PGT-1"));
    }

    #[test]
    fn test_ticket_serde_preserves_state() {
        let mut tgt = TicketGrantingTicket::new("TGT-1", alice(), session_policy(), epoch());
        let st = tgt
            .grant_service_ticket("ST-1", app(), st_policy(), true, ServiceTracking::All, epoch())
            .unwrap();

        for ticket in [Ticket::from(tgt), Ticket::from(st)] {
            let json = serde_json::to_string(&ticket).unwrap();
            let decoded: Ticket = serde_json::from_str(&json).unwrap();
            assert_eq!(decoded, ticket);
            assert_eq!(decoded.state().creation_time(), ticket.state().creation_time());
            assert_eq!(decoded.state().count_of_uses(), ticket.state().count_of_uses());
        }
    }
}
