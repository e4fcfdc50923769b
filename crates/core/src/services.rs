//! Registered services and the lookup contract the core consumes.
//!
//! Service-registry persistence is out of scope; the core only needs to map
//! a requesting [`Service`] to the [`RegisteredService`] that governs it.
//! [`InMemoryServicesManager`] is a complete implementation for embedded and
//! test use.

use std::{fmt, sync::Arc};

use cas_ticket::{ConfigError, Service};
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// How a service is told about the end of an SSO session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogoutType {
    /// Does not participate in single logout.
    None,
    /// Server-to-server callback.
    #[default]
    BackChannel,
    /// Callback through the user's browser.
    FrontChannel,
}

/// Whether, and to which callbacks, a service may be issued proxy-granting
/// tickets.
#[derive(Clone, Default)]
pub enum ProxyPolicy {
    /// Proxying is refused.
    #[default]
    Refuse,
    /// Proxying is allowed for callback URLs matching the pattern.
    Regex(Regex),
}

impl ProxyPolicy {
    /// Allows callbacks matching `pattern` (anchored at both ends).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the pattern does not compile.
    pub fn regex(pattern: &str) -> Result<Self, ConfigError> {
        compile_anchored("proxy_policy", pattern).map(Self::Regex)
    }

    /// Whether any proxying is allowed.
    #[must_use]
    pub fn is_allowed_to_proxy(&self) -> bool {
        matches!(self, Self::Regex(_))
    }

    /// Whether `callback` may receive a proxy-granting ticket.
    #[must_use]
    pub fn is_allowed_callback(&self, callback: &Service) -> bool {
        match self {
            Self::Refuse => false,
            Self::Regex(pattern) => pattern.is_match(callback.id()),
        }
    }
}

impl fmt::Debug for ProxyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Refuse => f.write_str("Refuse"),
            Self::Regex(pattern) => f.debug_tuple("Regex").field(&pattern.as_str()).finish(),
        }
    }
}

fn compile_anchored(field: &'static str, pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(&format!("^(?:{pattern})$"))
        .map_err(|e| ConfigError::invalid(field, format!("{pattern}: {e}")))
}

/// A relying party known to this CAS server.
///
/// # Example
///
/// ```
/// use cas_core::{LogoutType, RegisteredService};
/// use cas_ticket::Service;
///
/// let registered = RegisteredService::builder()
///     .id(1)
///     .name("intranet")
///     .service_pattern(r"https://intranet\.example\.org/.*")
///     .logout_type(LogoutType::BackChannel)
///     .build()?;
/// assert!(registered.matches(&Service::new("https://intranet.example.org/home")));
/// assert!(!registered.matches(&Service::new("https://intranet.example.org.evil/")));
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone)]
pub struct RegisteredService {
    id: u64,
    name: String,
    service_pattern: Regex,
    evaluation_order: i32,
    enabled: bool,
    sso_enabled: bool,
    proxy_policy: ProxyPolicy,
    logout_type: LogoutType,
    logout_url: Option<String>,
}

#[bon::bon]
impl RegisteredService {
    /// Creates a registered service.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `service_pattern` does not compile.
    #[builder]
    pub fn new(
        id: u64,
        #[builder(into)] name: String,
        service_pattern: &str,
        #[builder(default)] evaluation_order: i32,
        #[builder(default = true)] enabled: bool,
        #[builder(default = true)] sso_enabled: bool,
        #[builder(default)] proxy_policy: ProxyPolicy,
        #[builder(default)] logout_type: LogoutType,
        #[builder(into)] logout_url: Option<String>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            id,
            name,
            service_pattern: compile_anchored("service_pattern", service_pattern)?,
            evaluation_order,
            enabled,
            sso_enabled,
            proxy_policy,
            logout_type,
            logout_url,
        })
    }

    /// Unique numeric identifier.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lower values are matched first.
    #[must_use]
    pub fn evaluation_order(&self) -> i32 {
        self.evaluation_order
    }

    /// Whether the service may use CAS at all.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether the service accepts tickets issued from an existing SSO session.
    #[must_use]
    pub fn is_sso_enabled(&self) -> bool {
        self.sso_enabled
    }

    /// The service's proxy policy.
    #[must_use]
    pub fn proxy_policy(&self) -> &ProxyPolicy {
        &self.proxy_policy
    }

    /// How the service is notified of logout.
    #[must_use]
    pub fn logout_type(&self) -> LogoutType {
        self.logout_type
    }

    /// Explicit logout callback, overriding the service's own URL.
    #[must_use]
    pub fn logout_url(&self) -> Option<&str> {
        self.logout_url.as_deref()
    }

    /// Whether the service participates in single logout.
    #[must_use]
    pub fn participates_in_single_logout(&self) -> bool {
        self.enabled && self.logout_type != LogoutType::None
    }

    /// Whether `service` falls under this registration.
    #[must_use]
    pub fn matches(&self, service: &Service) -> bool {
        self.service_pattern.is_match(service.id())
    }
}

/// Resolves requesting services to their registrations.
pub trait ServicesManager: Send + Sync {
    /// The registration governing `service`, if any.
    fn find_service_by(&self, service: &Service) -> Option<Arc<RegisteredService>>;

    /// Every registration, in evaluation order.
    fn all_services(&self) -> Vec<Arc<RegisteredService>>;
}

/// Services manager holding its registrations in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryServicesManager {
    services: Arc<RwLock<Vec<Arc<RegisteredService>>>>,
}

impl InMemoryServicesManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a manager holding `services`.
    #[must_use]
    pub fn with_services(services: impl IntoIterator<Item = RegisteredService>) -> Self {
        let manager = Self::new();
        for service in services {
            manager.save(service);
        }
        manager
    }

    /// Adds or replaces (by ID) a registration.
    pub fn save(&self, service: RegisteredService) -> Arc<RegisteredService> {
        let service = Arc::new(service);
        let mut services = self.services.write();
        services.retain(|s| s.id != service.id);
        services.push(Arc::clone(&service));
        services.sort_by_key(|s| (s.evaluation_order, s.id));
        service
    }

    /// Removes a registration. Returns it if it existed.
    pub fn delete(&self, id: u64) -> Option<Arc<RegisteredService>> {
        let mut services = self.services.write();
        let index = services.iter().position(|s| s.id == id)?;
        Some(services.remove(index))
    }
}

impl ServicesManager for InMemoryServicesManager {
    fn find_service_by(&self, service: &Service) -> Option<Arc<RegisteredService>> {
        self.services.read().iter().find(|s| s.matches(service)).cloned()
    }

    fn all_services(&self) -> Vec<Arc<RegisteredService>> {
        self.services.read().clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn registered(id: u64, pattern: &str, order: i32) -> RegisteredService {
        RegisteredService::builder()
            .id(id)
            .name(format!("service-{id}"))
            .service_pattern(pattern)
            .evaluation_order(order)
            .build()
            .unwrap()
    }

    #[test]
    fn test_pattern_is_anchored() {
        let service = registered(1, r"https://app\.example\.org", 0);
        assert!(service.matches(&Service::new("https://app.example.org")));
        assert!(!service.matches(&Service::new("https://app.example.org/extra")));
        assert!(!service.matches(&Service::new("xhttps://app.example.org")));
    }

    #[test]
    fn test_ticket_parameter_does_not_affect_matching() {
        let service = registered(1, r"https://app\.example\.org/login", 0);
        assert!(service.matches(&Service::new("https://app.example.org/login?ticket=ST-1-abc")));
    }

    #[test]
    fn test_invalid_pattern_is_a_config_error() {
        let err = RegisteredService::builder().id(1).name("bad").service_pattern("(").build().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "service_pattern", .. }));
    }

    #[test]
    fn test_lookup_follows_evaluation_order() {
        let manager = InMemoryServicesManager::with_services([
            registered(1, "https://.*", 10),
            registered(2, r"https://app\.example\.org", 0),
        ]);
        let found = manager.find_service_by(&Service::new("https://app.example.org")).unwrap();
        assert_eq!(found.id(), 2);
        let found = manager.find_service_by(&Service::new("https://other.example.org")).unwrap();
        assert_eq!(found.id(), 1);
        assert!(manager.find_service_by(&Service::new("http://plain.example.org")).is_none());
    }

    #[test]
    fn test_save_replaces_and_delete_removes() {
        let manager = InMemoryServicesManager::new();
        manager.save(registered(1, "https://a.example.org", 0));
        manager.save(registered(1, "https://b.example.org", 0));
        assert_eq!(manager.all_services().len(), 1);
        assert!(manager.find_service_by(&Service::new("https://b.example.org")).is_some());

        assert!(manager.delete(1).is_some());
        assert!(manager.delete(1).is_none());
        assert!(manager.all_services().is_empty());
    }

    #[test]
    fn test_proxy_policy() {
        let callback = Service::new("https://proxy.example.org/pgtCallback");
        assert!(!ProxyPolicy::Refuse.is_allowed_callback(&callback));
        assert!(!ProxyPolicy::Refuse.is_allowed_to_proxy());

        let policy = ProxyPolicy::regex(r"https://proxy\.example\.org/.*").unwrap();
        assert!(policy.is_allowed_to_proxy());
        assert!(policy.is_allowed_callback(&callback));
        assert!(!policy.is_allowed_callback(&Service::new("https://evil.example.org/cb")));
    }

    #[test]
    fn test_single_logout_participation() {
        let none = RegisteredService::builder()
            .id(1)
            .name("quiet")
            .service_pattern(".*")
            .logout_type(LogoutType::None)
            .build()
            .unwrap();
        assert!(!none.participates_in_single_logout());
        assert!(registered(2, ".*", 0).participates_in_single_logout());
    }
}
