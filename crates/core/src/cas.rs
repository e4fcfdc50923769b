//! Registry-backed CAS orchestration.
//!
//! [`CentralAuthenticationService`] is the entry point the protocol layer
//! calls. It combines the [`TicketFactory`], a [`TicketRegistry`] and a
//! [`ServicesManager`]:
//!
//! ```text
//!   login ──► create_ticket_granting_ticket ──► TGT
//!                                               │ grant_service_ticket
//!                                               ▼
//!   service ──► validate_service_ticket ◄────── ST ──► grant_proxy_granting_ticket ──► PGT
//!                                                                                       │
//!   proxied service ──► validate_service_ticket ◄── PT ◄── grant_proxy_ticket ──────────┘
//!
//!   logout ──► destroy_ticket_granting_ticket ──► cascade delete + LogoutRequests
//! ```
//!
//! # Concurrency
//!
//! Grants against one session are serialised in-process by striped locks so
//! concurrent grants do not lose each other's session records. Redemption of
//! single-use tickets relies on the registry's atomic removal instead, so at
//! most one caller succeeds even across CAS nodes sharing a registry.

use std::{collections::BTreeSet, fmt, sync::Arc};

use cas_ticket::{
    AccessToken, Authentication, Principal, ProxyGrantingTicket, ProxyTicket, Redacted, Service,
    ServiceTicket, Ticket, TicketError, TicketFactory, TicketGrantingTicket, TicketKind,
};
use cas_ticket_registry::{MAX_LINEAGE_DEPTH, TicketLookup, TicketRegistry};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::{
    backend::TicketRegistryBackend,
    config::CasConfig,
    error::{CasError, CasResult},
    locks::StripedLocks,
    logout::{LogoutRequest, logout_requests_for},
    services::{RegisteredService, ServicesManager},
    validation::Assertion,
};

/// Default number of session lock stripes.
const DEFAULT_LOCK_STRIPES: usize = 64;

/// The CAS ticketing service.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use cas_core::{CentralAuthenticationService, InMemoryServicesManager, RegisteredService};
/// use cas_ticket::{Authentication, Principal, Service, TicketConfig, TicketFactory};
/// use cas_ticket_registry::MemoryTicketRegistry;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let services = InMemoryServicesManager::with_services([RegisteredService::builder()
///     .id(1)
///     .name("app")
///     .service_pattern(r"https://app\.example\.org/.*")
///     .build()?]);
/// let cas = CentralAuthenticationService::builder()
///     .registry(Arc::new(MemoryTicketRegistry::new()))
///     .services(Arc::new(services))
///     .factory(TicketFactory::from_config(&TicketConfig::default())?)
///     .build();
///
/// let authentication = Authentication::builder()
///     .principal(Principal::new("alice"))
///     .authentication_date(chrono::Utc::now())
///     .build();
/// let tgt = cas.create_ticket_granting_ticket(authentication).await?;
/// let service = Service::new("https://app.example.org/home");
/// let st = cas.grant_service_ticket(tgt.id(), &service, true).await?;
///
/// let assertion = cas.validate_service_ticket(st.id(), &service).await?;
/// assert_eq!(assertion.primary_authentication().principal().id(), "alice");
/// # Ok(())
/// # }
/// ```
pub struct CentralAuthenticationService<R = TicketRegistryBackend> {
    registry: Arc<R>,
    services: Arc<dyn ServicesManager>,
    factory: TicketFactory,
    locks: StripedLocks,
}

impl<R> fmt::Debug for CentralAuthenticationService<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CentralAuthenticationService")
            .field("factory", &self.factory)
            .finish_non_exhaustive()
    }
}

impl CentralAuthenticationService<TicketRegistryBackend> {
    /// Builds the configured registry backend and a service around it.
    ///
    /// # Errors
    ///
    /// Returns [`CasError::Config`] for invalid configuration and
    /// [`CasError::Registry`] if the backend cannot be reached.
    pub async fn from_config(
        config: &CasConfig,
        services: Arc<dyn ServicesManager>,
    ) -> CasResult<Self> {
        config.validate()?;
        let registry =
            TicketRegistryBackend::from_config(&config.registry, cas_ticket::SystemClock::shared())
                .await?;
        Ok(Self {
            registry: Arc::new(registry),
            services,
            factory: TicketFactory::from_config(&config.ticket)?,
            locks: StripedLocks::new(config.lock_stripes),
        })
    }
}

#[bon::bon]
impl<R: TicketRegistry> CentralAuthenticationService<R> {
    /// Creates a service over an existing registry.
    #[builder]
    pub fn new(
        registry: Arc<R>,
        services: Arc<dyn ServicesManager>,
        factory: TicketFactory,
        #[builder(default = DEFAULT_LOCK_STRIPES)] lock_stripes: usize,
    ) -> Self {
        Self { registry, services, factory, locks: StripedLocks::new(lock_stripes) }
    }

    /// The ticket registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<R> {
        &self.registry
    }

    /// The services manager.
    #[must_use]
    pub fn services(&self) -> &Arc<dyn ServicesManager> {
        &self.services
    }

    fn now(&self) -> DateTime<Utc> {
        self.registry.clock().now()
    }

    // ───────────────────────────────────────────────────────────────────────
    // Lookups
    // ───────────────────────────────────────────────────────────────────────

    /// Returns the live ticket stored under `id` if it has `capability`.
    ///
    /// # Errors
    ///
    /// - [`TicketError::NotFound`] if no ticket is stored under `id`
    /// - [`TicketError::Expired`] if the ticket (or an ancestor) expired; it
    ///   is reaped as a side effect
    /// - [`TicketError::InvalidType`] if the ticket lacks `capability`
    #[tracing::instrument(skip_all, fields(ticket_id = %Redacted(id), capability = %capability))]
    pub async fn get_ticket(&self, id: &str, capability: TicketKind) -> CasResult<Ticket> {
        match self.registry.lookup_ticket(id).await? {
            TicketLookup::Live(ticket) if ticket.satisfies(capability) => Ok(ticket),
            TicketLookup::Live(ticket) => {
                Err(TicketError::invalid_type(id, capability, ticket.kind()).into())
            },
            TicketLookup::Expired(_) => Err(TicketError::expired(id).into()),
            TicketLookup::Absent => Err(TicketError::not_found(id).into()),
        }
    }

    /// Registration check shared by every grant: the service must be
    /// registered and enabled.
    fn authorize(&self, service: &Service) -> CasResult<Arc<RegisteredService>> {
        match self.services.find_service_by(service) {
            Some(registered) if registered.is_enabled() => Ok(registered),
            Some(_) => {
                warn!(service = %service, "service is registered but disabled");
                Err(CasError::unauthorized_service(service.id()))
            },
            None => {
                warn!(service = %service, "service is not registered");
                Err(CasError::unauthorized_service(service.id()))
            },
        }
    }

    /// Authentications of `granting_id` and each of its ancestors,
    /// innermost first.
    async fn authentication_chain(&self, granting_id: &str) -> CasResult<Vec<Authentication>> {
        let mut chain = Vec::new();
        let mut next = Some(granting_id.to_owned());
        for _ in 0..MAX_LINEAGE_DEPTH {
            let Some(id) = next else {
                return Ok(chain);
            };
            let ticket = self
                .registry
                .fetch_ticket(&id)
                .await?
                .ok_or_else(|| TicketError::not_found(id.as_str()))?;
            let session = ticket.as_ticket_granting().ok_or_else(|| {
                TicketError::invalid_type(id.as_str(), TicketKind::TicketGranting, ticket.kind())
            })?;
            chain.push(session.authentication().clone());
            next = ticket.granting_ticket_id().map(str::to_owned);
        }
        Err(TicketError::not_found(granting_id).into())
    }

    // ───────────────────────────────────────────────────────────────────────
    // Sessions
    // ───────────────────────────────────────────────────────────────────────

    /// Starts an SSO session for `authentication`.
    ///
    /// # Errors
    ///
    /// Returns [`CasError::Registry`] if the ticket cannot be stored.
    #[tracing::instrument(skip_all, fields(principal = authentication.principal().id()))]
    pub async fn create_ticket_granting_ticket(
        &self,
        authentication: Authentication,
    ) -> CasResult<TicketGrantingTicket> {
        let tgt = self.factory.create_ticket_granting_ticket(authentication, self.now());
        self.registry.add_ticket(tgt.clone().into()).await?;
        info!(ticket_id = %Redacted(tgt.id()), "ticket-granting ticket created");
        Ok(tgt)
    }

    /// Grants a service ticket for `service` from the session `tgt_id`.
    ///
    /// `credential_provided` records whether the user just presented
    /// credentials; services that refuse SSO require it.
    ///
    /// # Errors
    ///
    /// - [`TicketError::NotFound`] / [`TicketError::Expired`] /
    ///   [`TicketError::InvalidType`] for a bad `tgt_id`
    /// - [`CasError::UnauthorizedService`] if `service` is not registered
    /// - [`CasError::UnauthorizedSsoService`] if `service` refuses SSO and no
    ///   credential was provided
    #[tracing::instrument(skip_all, fields(ticket_id = %Redacted(tgt_id), service = %service))]
    pub async fn grant_service_ticket(
        &self,
        tgt_id: &str,
        service: &Service,
        credential_provided: bool,
    ) -> CasResult<ServiceTicket> {
        let _session = self.locks.lock(tgt_id).await;
        let mut granting = self.get_ticket(tgt_id, TicketKind::TicketGranting).await?;
        let registered = self.authorize(service)?;
        if !credential_provided && !registered.is_sso_enabled() {
            warn!("service requires a fresh login");
            return Err(CasError::unauthorized_sso_service(service.id()));
        }

        let session = granting.as_ticket_granting_mut().ok_or_else(|| {
            TicketError::invalid_type(tgt_id, TicketKind::TicketGranting, TicketKind::Service)
        })?;
        let st = self.factory.grant_service_ticket(
            session,
            service.clone(),
            credential_provided,
            self.now(),
        )?;
        self.registry.add_ticket(st.clone().into()).await?;
        self.registry.update_ticket(granting).await?;
        info!(service_ticket = %Redacted(st.id()), "service ticket granted");
        Ok(st)
    }

    /// Validates a service or proxy ticket for `service`.
    ///
    /// Checks run in order: existence, registration, expiry, service match,
    /// consumption. A ticket presented by the wrong service is destroyed. A
    /// ticket with no uses left is removed from the registry; only the
    /// caller whose removal succeeds gets the assertion.
    ///
    /// # Errors
    ///
    /// - [`TicketError::NotFound`] if the ticket is absent or another caller
    ///   redeemed it first
    /// - [`TicketError::Expired`], [`TicketError::ServiceMismatch`],
    ///   [`TicketError::InvalidType`]
    /// - [`CasError::UnauthorizedService`]
    #[tracing::instrument(skip_all, fields(ticket_id = %Redacted(st_id), service = %service))]
    pub async fn validate_service_ticket(
        &self,
        st_id: &str,
        service: &Service,
    ) -> CasResult<Assertion> {
        let _ticket = self.locks.lock(st_id).await;
        let mut ticket = self.get_ticket(st_id, TicketKind::Service).await?;
        self.authorize(service)?;

        let st = ticket.as_service_ticket_mut().ok_or_else(|| {
            TicketError::invalid_type(st_id, TicketKind::Service, TicketKind::TicketGranting)
        })?;
        if let Err(err) = st.validate(service, self.now()) {
            if matches!(err, TicketError::ServiceMismatch { .. }) {
                warn!(granted = %st.service(), "ticket presented by another service; destroying it");
                let _removed = self.registry.remove_ticket(st_id).await?;
            }
            return Err(err.into());
        }
        let granting_id = st.granting_ticket_id().to_owned();
        let from_new_login = st.is_from_new_login();
        let consumed = st.is_consumed();

        let chain = self.authentication_chain(&granting_id).await?;
        let primary = chain.last().cloned().ok_or_else(|| TicketError::not_found(granting_id.as_str()))?;

        if consumed {
            if !self.registry.remove_ticket(st_id).await? {
                debug!("ticket redeemed concurrently");
                return Err(TicketError::not_found(st_id).into());
            }
        } else {
            self.registry.update_ticket(ticket).await?;
        }
        info!(proxied = chain.len() > 1, "service ticket validated");
        Ok(Assertion::new(chain, primary, service.clone(), from_new_login))
    }

    // ───────────────────────────────────────────────────────────────────────
    // Proxying
    // ───────────────────────────────────────────────────────────────────────

    /// Mints a proxy-granting ticket for the callback `proxied_by` from a
    /// service or proxy ticket, consuming that ticket.
    ///
    /// The ticket is validated for the service it was granted to, whose
    /// proxy policy must accept `proxied_by`. The new PGT is recorded on the
    /// ticket's granting session so that it is revoked with it.
    ///
    /// # Errors
    ///
    /// - ticket lookup and validation errors as for
    ///   [`validate_service_ticket`](Self::validate_service_ticket)
    /// - [`TicketError::ProxyGrantingTicketAlreadyIssued`]
    /// - [`CasError::UnauthorizedProxy`] if the proxy policy refuses
    ///   `proxied_by`
    #[tracing::instrument(skip_all, fields(ticket_id = %Redacted(st_id), proxied_by = %proxied_by))]
    pub async fn grant_proxy_granting_ticket(
        &self,
        st_id: &str,
        proxied_by: &Service,
    ) -> CasResult<ProxyGrantingTicket> {
        let granting_id = self
            .get_ticket(st_id, TicketKind::Service)
            .await?
            .granting_ticket_id()
            .map(str::to_owned)
            .ok_or_else(|| TicketError::not_found(st_id))?;
        let _session = self.locks.lock(&granting_id).await;

        let mut ticket = self.get_ticket(st_id, TicketKind::Service).await?;
        let service = ticket
            .as_service_ticket()
            .map(|st| st.service().clone())
            .ok_or_else(|| TicketError::invalid_type(st_id, TicketKind::Service, ticket.kind()))?;
        let registered = self.authorize(&service)?;
        if !registered.proxy_policy().is_allowed_callback(proxied_by) {
            warn!(service = %service, "proxy callback refused by proxy policy");
            return Err(CasError::unauthorized_proxy(service.id()));
        }

        let now = self.now();
        let authentication = Authentication::builder()
            .principal(Principal::new(proxied_by.id()))
            .authentication_date(now)
            .build();
        let pgt = self.factory.grant_proxy_granting_ticket(
            &mut ticket,
            authentication,
            proxied_by.clone(),
            now,
        )?;
        if let Some(st) = ticket.as_service_ticket_mut() {
            st.validate(&service, now)?;
        }
        if !self.registry.remove_ticket(st_id).await? {
            debug!("ticket redeemed concurrently");
            return Err(TicketError::not_found(st_id).into());
        }

        let mut parent = self.get_ticket(&granting_id, TicketKind::TicketGranting).await?;
        if let Some(session) = parent.as_ticket_granting_mut() {
            session.record_proxy_granting_ticket(pgt.id(), proxied_by.clone());
        }
        self.registry.add_ticket(pgt.clone().into()).await?;
        self.registry.update_ticket(parent).await?;
        info!(proxy_granting_ticket = %Redacted(pgt.id()), "proxy-granting ticket granted");
        Ok(pgt)
    }

    /// Grants a proxy ticket for `service` from the proxy-granting ticket
    /// `pgt_id`.
    ///
    /// # Errors
    ///
    /// - [`TicketError::NotFound`] / [`TicketError::Expired`] /
    ///   [`TicketError::InvalidType`] for a bad `pgt_id`
    /// - [`CasError::UnauthorizedService`] if `service` is not registered
    /// - [`CasError::UnauthorizedProxy`] if `service` may not be proxied
    #[tracing::instrument(skip_all, fields(ticket_id = %Redacted(pgt_id), service = %service))]
    pub async fn grant_proxy_ticket(
        &self,
        pgt_id: &str,
        service: &Service,
    ) -> CasResult<ProxyTicket> {
        let _session = self.locks.lock(pgt_id).await;
        let mut ticket = self.get_ticket(pgt_id, TicketKind::ProxyGranting).await?;
        let registered = self.authorize(service)?;
        if !registered.proxy_policy().is_allowed_to_proxy() {
            warn!("service does not allow proxying");
            return Err(CasError::unauthorized_proxy(service.id()));
        }

        let pgt = ticket.as_proxy_granting_mut().ok_or_else(|| {
            TicketError::invalid_type(pgt_id, TicketKind::ProxyGranting, TicketKind::TicketGranting)
        })?;
        let pt = self.factory.grant_proxy_ticket(pgt, service.clone(), self.now())?;
        self.registry.add_ticket(pt.clone().into()).await?;
        self.registry.update_ticket(ticket).await?;
        info!(proxy_ticket = %Redacted(pt.id()), "proxy ticket granted");
        Ok(pt)
    }

    // ───────────────────────────────────────────────────────────────────────
    // Access tokens
    // ───────────────────────────────────────────────────────────────────────

    /// Issues an access token for `service` from the session `tgt_id`. The
    /// token carries the session's authentication and is revoked with it.
    ///
    /// # Errors
    ///
    /// Session lookup errors and [`CasError::UnauthorizedService`].
    #[tracing::instrument(skip_all, fields(ticket_id = %Redacted(tgt_id), service = %service))]
    pub async fn create_access_token(
        &self,
        tgt_id: &str,
        service: &Service,
        scopes: BTreeSet<String>,
    ) -> CasResult<AccessToken> {
        let _session = self.locks.lock(tgt_id).await;
        let mut granting = self.get_ticket(tgt_id, TicketKind::TicketGranting).await?;
        self.authorize(service)?;

        let session = granting.as_ticket_granting_mut().ok_or_else(|| {
            TicketError::invalid_type(tgt_id, TicketKind::TicketGranting, TicketKind::AccessToken)
        })?;
        let authentication = session.authentication().clone();
        let token = self.factory.create_access_token(
            Some(session),
            service.clone(),
            authentication,
            scopes,
            self.now(),
        )?;
        self.registry.add_ticket(token.clone().into()).await?;
        self.registry.update_ticket(granting).await?;
        info!(access_token = %Redacted(token.id()), "access token created");
        Ok(token)
    }

    /// Validates an access token, optionally for a specific service, and
    /// returns the authentication it carries.
    ///
    /// # Errors
    ///
    /// - [`TicketError::NotFound`] if absent or redeemed concurrently
    /// - [`TicketError::Expired`], [`TicketError::ServiceMismatch`],
    ///   [`TicketError::InvalidType`]
    #[tracing::instrument(skip_all, fields(ticket_id = %Redacted(id)))]
    pub async fn validate_access_token(
        &self,
        id: &str,
        service: Option<&Service>,
    ) -> CasResult<Authentication> {
        let _ticket = self.locks.lock(id).await;
        let mut ticket = self.get_ticket(id, TicketKind::AccessToken).await?;
        let token = ticket.as_access_token_mut().ok_or_else(|| {
            TicketError::invalid_type(id, TicketKind::AccessToken, TicketKind::Service)
        })?;
        token.validate(service, self.now())?;
        let authentication = token.authentication().clone();

        if token.is_consumed() {
            if !self.registry.remove_ticket(id).await? {
                return Err(TicketError::not_found(id).into());
            }
        } else {
            self.registry.update_ticket(ticket).await?;
        }
        Ok(authentication)
    }

    // ───────────────────────────────────────────────────────────────────────
    // Logout
    // ───────────────────────────────────────────────────────────────────────

    /// Ends the session `tgt_id`: deletes it with every ticket it granted
    /// and returns one logout request per service that must be notified.
    ///
    /// Destroying a session that does not exist is not an error and yields
    /// no requests. An expired session is still destroyed with logout.
    ///
    /// # Errors
    ///
    /// [`TicketError::InvalidType`] if `tgt_id` names a non-session ticket,
    /// or [`CasError::Registry`].
    #[tracing::instrument(skip_all, fields(ticket_id = %Redacted(tgt_id)))]
    pub async fn destroy_ticket_granting_ticket(
        &self,
        tgt_id: &str,
    ) -> CasResult<Vec<LogoutRequest>> {
        let _session = self.locks.lock(tgt_id).await;
        let Some(ticket) = self.registry.fetch_ticket(tgt_id).await? else {
            debug!("no session to destroy");
            return Ok(Vec::new());
        };
        let session = ticket.as_ticket_granting().ok_or_else(|| {
            TicketError::invalid_type(tgt_id, TicketKind::TicketGranting, ticket.kind())
        })?;
        let requests = logout_requests_for(session, self.services.as_ref());
        let deleted = self.registry.delete_ticket(tgt_id).await?;
        info!(deleted, logout_requests = requests.len(), "session destroyed");
        Ok(requests)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use cas_ticket::{
        ExpirationPolicy, TicketPolicies,
        testutil::{ManualClock, authentication},
    };
    use cas_ticket_registry::{MemoryTicketRegistry, testutil::factory};

    use super::*;
    use crate::services::{InMemoryServicesManager, ProxyPolicy};

    const APP: &str = "https://app.example.org";
    const CALLBACK: &str = "https://proxy.example.org/pgtCallback";

    fn services() -> InMemoryServicesManager {
        InMemoryServicesManager::with_services([
            RegisteredService::builder()
                .id(1)
                .name("app")
                .service_pattern(r"https://app\.example\.org(/.*)?")
                .proxy_policy(ProxyPolicy::regex(r"https://proxy\.example\.org/.*").unwrap())
                .build()
                .unwrap(),
            RegisteredService::builder()
                .id(2)
                .name("backend")
                .service_pattern(r"https://backend\.example\.org(/.*)?")
                .proxy_policy(ProxyPolicy::regex(".*").unwrap())
                .build()
                .unwrap(),
            RegisteredService::builder()
                .id(3)
                .name("strict")
                .service_pattern(r"https://strict\.example\.org")
                .sso_enabled(false)
                .build()
                .unwrap(),
            RegisteredService::builder()
                .id(4)
                .name("disabled")
                .service_pattern(r"https://disabled\.example\.org")
                .enabled(false)
                .build()
                .unwrap(),
        ])
    }

    fn cas_with(
        policies: TicketPolicies,
    ) -> (CentralAuthenticationService<MemoryTicketRegistry>, ManualClock) {
        let clock = ManualClock::at_epoch();
        let registry = MemoryTicketRegistry::with_clock(Arc::new(clock.clone()));
        let cas = CentralAuthenticationService::builder()
            .registry(Arc::new(registry))
            .services(Arc::new(services()))
            .factory(factory(policies))
            .build();
        (cas, clock)
    }

    fn cas() -> (CentralAuthenticationService<MemoryTicketRegistry>, ManualClock) {
        cas_with(TicketPolicies::default())
    }

    #[tokio::test]
    async fn test_unregistered_and_disabled_services_are_refused() {
        let (cas, _clock) = cas();
        let tgt = cas.create_ticket_granting_ticket(authentication("alice")).await.unwrap();

        for url in ["https://unknown.example.org", "https://disabled.example.org"] {
            let err = cas.grant_service_ticket(tgt.id(), &Service::new(url), true).await.unwrap_err();
            assert!(matches!(err, CasError::UnauthorizedService { .. }), "{url}: {err:?}");
        }
        assert_eq!(cas.registry().len(), 1);
    }

    #[tokio::test]
    async fn test_sso_refusing_service_requires_credentials() {
        let (cas, _clock) = cas();
        let tgt = cas.create_ticket_granting_ticket(authentication("alice")).await.unwrap();
        let strict = Service::new("https://strict.example.org");

        let err = cas.grant_service_ticket(tgt.id(), &strict, false).await.unwrap_err();
        assert!(matches!(err, CasError::UnauthorizedSsoService { .. }));

        let st = cas.grant_service_ticket(tgt.id(), &strict, true).await.unwrap();
        assert!(st.is_from_new_login());
    }

    #[tokio::test]
    async fn test_get_ticket_reports_type_mismatch() {
        let (cas, _clock) = cas();
        let tgt = cas.create_ticket_granting_ticket(authentication("alice")).await.unwrap();

        let err = cas.get_ticket(tgt.id(), TicketKind::Service).await.unwrap_err();
        assert!(matches!(
            err,
            CasError::Ticket(TicketError::InvalidType {
                expected: TicketKind::Service,
                actual: TicketKind::TicketGranting,
                ..
            })
        ));
        assert!(cas.get_ticket(tgt.id(), TicketKind::TicketGranting).await.is_ok());
    }

    #[tokio::test]
    async fn test_validation_by_wrong_service_destroys_ticket() {
        let (cas, _clock) = cas();
        let tgt = cas.create_ticket_granting_ticket(authentication("alice")).await.unwrap();
        let st = cas.grant_service_ticket(tgt.id(), &Service::new(APP), true).await.unwrap();

        let err = cas
            .validate_service_ticket(st.id(), &Service::new("https://backend.example.org"))
            .await
            .unwrap_err();
        assert!(matches!(err, CasError::Ticket(TicketError::ServiceMismatch { .. })));
        assert_eq!(err.code(), crate::error::codes::INVALID_SERVICE);

        let err = cas.validate_service_ticket(st.id(), &Service::new(APP)).await.unwrap_err();
        assert!(matches!(err, CasError::Ticket(TicketError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_expired_service_ticket_is_reported_expired() {
        let (cas, clock) = cas();
        let tgt = cas.create_ticket_granting_ticket(authentication("alice")).await.unwrap();
        let st = cas.grant_service_ticket(tgt.id(), &Service::new(APP), true).await.unwrap();

        clock.advance(Duration::from_secs(11));
        let err = cas.validate_service_ticket(st.id(), &Service::new(APP)).await.unwrap_err();
        assert!(matches!(err, CasError::Ticket(TicketError::Expired { .. })));
    }

    #[tokio::test]
    async fn test_multi_use_ticket_is_updated_not_removed() {
        let policies = TicketPolicies::builder()
            .service(ExpirationPolicy::MultiTimeUseOrTimeout {
                number_of_uses: 2,
                time_to_kill: Duration::from_secs(60),
            })
            .build();
        let (cas, _clock) = cas_with(policies);
        let tgt = cas.create_ticket_granting_ticket(authentication("alice")).await.unwrap();
        let service = Service::new(APP);
        let st = cas.grant_service_ticket(tgt.id(), &service, false).await.unwrap();

        cas.validate_service_ticket(st.id(), &service).await.unwrap();
        let stored = cas.get_ticket(st.id(), TicketKind::Service).await.unwrap();
        assert_eq!(stored.state().count_of_uses(), 1);

        cas.validate_service_ticket(st.id(), &service).await.unwrap();
        assert!(cas.validate_service_ticket(st.id(), &service).await.is_err());
    }

    #[tokio::test]
    async fn test_proxy_policy_is_enforced() {
        let (cas, _clock) = cas();
        let tgt = cas.create_ticket_granting_ticket(authentication("alice")).await.unwrap();
        let st = cas.grant_service_ticket(tgt.id(), &Service::new(APP), true).await.unwrap();

        let err = cas
            .grant_proxy_granting_ticket(st.id(), &Service::new("https://evil.example.org/cb"))
            .await
            .unwrap_err();
        assert!(matches!(err, CasError::UnauthorizedProxy { .. }));
        assert_eq!(err.code(), crate::error::codes::UNAUTHORIZED_SERVICE_PROXY);

        // The refused attempt leaves the ticket redeemable.
        let pgt = cas.grant_proxy_granting_ticket(st.id(), &Service::new(CALLBACK)).await.unwrap();
        assert_eq!(pgt.granting_ticket_id(), tgt.id());
        assert_eq!(pgt.session().authentication().principal().id(), CALLBACK);

        let strict = Service::new("https://strict.example.org");
        let err = cas.grant_proxy_ticket(pgt.id(), &strict).await.unwrap_err();
        assert!(matches!(err, CasError::UnauthorizedProxy { .. }));
    }

    #[tokio::test]
    async fn test_proxy_ticket_assertion_chains_authentications() {
        let (cas, _clock) = cas();
        let tgt = cas.create_ticket_granting_ticket(authentication("alice")).await.unwrap();
        let st = cas.grant_service_ticket(tgt.id(), &Service::new(APP), true).await.unwrap();
        let pgt = cas.grant_proxy_granting_ticket(st.id(), &Service::new(CALLBACK)).await.unwrap();

        let backend = Service::new("https://backend.example.org/api");
        let pt = cas.grant_proxy_ticket(pgt.id(), &backend).await.unwrap();
        assert_eq!(pt.proxy_chain(), &[Service::new(CALLBACK)]);

        let assertion = cas.validate_service_ticket(pt.id(), &backend).await.unwrap();
        assert!(assertion.is_proxied());
        assert!(!assertion.is_from_new_login());
        let principals: Vec<&str> =
            assertion.chained_authentications().iter().map(|a| a.principal().id()).collect();
        assert_eq!(principals, vec![CALLBACK, "alice"]);
        assert_eq!(assertion.primary_authentication().principal().id(), "alice");
    }

    #[tokio::test]
    async fn test_access_token_round_trip() {
        let (cas, _clock) = cas();
        let tgt = cas.create_ticket_granting_ticket(authentication("alice")).await.unwrap();
        let service = Service::new(APP);
        let scopes = BTreeSet::from(["profile".to_owned()]);
        let token = cas.create_access_token(tgt.id(), &service, scopes).await.unwrap();

        let authentication = cas.validate_access_token(token.id(), Some(&service)).await.unwrap();
        assert_eq!(authentication.principal().id(), "alice");
        let err = cas
            .validate_access_token(token.id(), Some(&Service::new("https://backend.example.org")))
            .await
            .unwrap_err();
        assert!(matches!(err, CasError::Ticket(TicketError::ServiceMismatch { .. })));
        // Not single-use by default.
        assert!(cas.validate_access_token(token.id(), None).await.is_ok());

        let requests = cas.destroy_ticket_granting_ticket(tgt.id()).await.unwrap();
        assert!(requests.is_empty());
        let err = cas.validate_access_token(token.id(), None).await.unwrap_err();
        assert!(matches!(err, CasError::Ticket(TicketError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_destroying_missing_session_is_a_no_op() {
        let (cas, _clock) = cas();
        assert!(cas.destroy_ticket_granting_ticket("TGT-404").await.unwrap().is_empty());
    }
}
