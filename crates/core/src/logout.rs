//! Single logout.
//!
//! When a session ends, every service that received a ticket from it and
//! participates in single logout gets a [`LogoutRequest`]. Delivering the
//! requests is a collaborator's job ([`LogoutHandler`]); the core only
//! decides who is notified and where.

use std::sync::Arc;

use async_trait::async_trait;
use cas_ticket::{Redacted, Service, TicketGrantingTicket};
use serde::{Deserialize, Serialize};

use crate::services::{LogoutType, RegisteredService, ServicesManager};

/// Delivery state of a [`LogoutRequest`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogoutRequestStatus {
    /// Not sent yet.
    #[default]
    NotAttempted,
    /// Delivered.
    Success,
    /// Delivery failed.
    Failure,
}

/// A notification that the session behind `ticket_id` has ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogoutRequest {
    ticket_id: String,
    service: Service,
    logout_url: String,
    logout_type: LogoutType,
    status: LogoutRequestStatus,
}

impl LogoutRequest {
    /// Creates a request in the [`NotAttempted`](LogoutRequestStatus::NotAttempted) state.
    #[must_use]
    pub fn new(
        ticket_id: impl Into<String>,
        service: Service,
        logout_url: impl Into<String>,
        logout_type: LogoutType,
    ) -> Self {
        Self {
            ticket_id: ticket_id.into(),
            service,
            logout_url: logout_url.into(),
            logout_type,
            status: LogoutRequestStatus::NotAttempted,
        }
    }

    /// The service ticket the service was granted, used as session index.
    #[must_use]
    pub fn ticket_id(&self) -> &str {
        &self.ticket_id
    }

    /// The service being logged out.
    #[must_use]
    pub fn service(&self) -> &Service {
        &self.service
    }

    /// Where the notification goes.
    #[must_use]
    pub fn logout_url(&self) -> &str {
        &self.logout_url
    }

    /// Back- or front-channel delivery.
    #[must_use]
    pub fn logout_type(&self) -> LogoutType {
        self.logout_type
    }

    /// Current delivery state.
    #[must_use]
    pub fn status(&self) -> LogoutRequestStatus {
        self.status
    }

    /// Records a delivery outcome.
    pub fn set_status(&mut self, status: LogoutRequestStatus) {
        self.status = status;
    }
}

/// The URL a logout notification for `service` is sent to: the registered
/// logout URL when set, otherwise the URL the service originally presented.
#[must_use]
pub fn determine_logout_url(registered: &RegisteredService, service: &Service) -> String {
    match registered.logout_url() {
        Some(url) => {
            tracing::debug!(logout_url = url, service = %service, "using registered logout URL");
            url.to_owned()
        },
        None => service.original_url().to_owned(),
    }
}

/// Builds one request per service the session granted a ticket to, skipping
/// services that are unregistered or do not participate in single logout.
#[must_use]
pub fn logout_requests_for(
    session: &TicketGrantingTicket,
    services: &dyn ServicesManager,
) -> Vec<LogoutRequest> {
    session
        .services()
        .iter()
        .filter_map(|(ticket_id, service)| {
            let Some(registered) = services.find_service_by(service) else {
                tracing::debug!(service = %service, "no registration; skipping logout");
                return None;
            };
            if !registered.participates_in_single_logout() {
                return None;
            }
            Some(LogoutRequest::new(
                ticket_id.clone(),
                service.clone(),
                determine_logout_url(&registered, service),
                registered.logout_type(),
            ))
        })
        .collect()
}

/// Delivers logout requests.
#[async_trait]
pub trait LogoutHandler: Send + Sync {
    /// Delivers `requests`, recording each outcome with
    /// [`LogoutRequest::set_status`].
    async fn handle(&self, session_id: &str, requests: &mut [LogoutRequest]);
}

/// Handler that only logs the requests it is given.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingLogoutHandler;

#[async_trait]
impl LogoutHandler for LoggingLogoutHandler {
    async fn handle(&self, session_id: &str, requests: &mut [LogoutRequest]) {
        for request in requests.iter() {
            tracing::info!(
                session_id = %Redacted(session_id),
                service = %request.service(),
                logout_url = request.logout_url(),
                "logout request not delivered: no delivery channel configured",
            );
        }
    }
}

/// Shared handler reference.
pub type SharedLogoutHandler = Arc<dyn LogoutHandler>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use cas_ticket::{ExpirationPolicy, ServiceTracking, testutil::{authentication, epoch}};

    use super::*;
    use crate::services::InMemoryServicesManager;

    fn registered(id: u64, pattern: &str) -> RegisteredService {
        RegisteredService::builder()
            .id(id)
            .name("app")
            .service_pattern(pattern)
            .build()
            .unwrap()
    }

    #[test]
    fn test_registered_logout_url_overrides_service_url() {
        let service = Service::new("https://app.example.org/home?lang=en");
        let plain = registered(1, ".*");
        assert_eq!(determine_logout_url(&plain, &service), "https://app.example.org/home?lang=en");

        let with_url = RegisteredService::builder()
            .id(2)
            .name("app")
            .service_pattern(".*")
            .logout_url("https://app.example.org/slo")
            .build()
            .unwrap();
        assert_eq!(determine_logout_url(&with_url, &service), "https://app.example.org/slo");
    }

    #[test]
    fn test_requests_cover_participating_services_only() {
        let services = InMemoryServicesManager::with_services([
            registered(1, r"https://a\.example\.org"),
            RegisteredService::builder()
                .id(2)
                .name("quiet")
                .service_pattern(r"https://b\.example\.org")
                .logout_type(LogoutType::None)
                .build()
                .unwrap(),
        ]);
        let now = epoch();
        let mut tgt =
            TicketGrantingTicket::new("TGT-1", authentication("alice"), ExpirationPolicy::NeverExpires, now);
        for (id, url) in [("ST-1", "https://a.example.org"), ("ST-2", "https://b.example.org"), ("ST-3", "https://c.example.org")] {
            tgt.grant_service_ticket(
                id,
                Service::new(url),
                ExpirationPolicy::NeverExpires,
                false,
                ServiceTracking::All,
                now,
            )
            .unwrap();
        }

        let requests = logout_requests_for(&tgt, &services);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].ticket_id(), "ST-1");
        assert_eq!(requests[0].logout_url(), "https://a.example.org");
        assert_eq!(requests[0].status(), LogoutRequestStatus::NotAttempted);
    }

    #[tokio::test]
    async fn test_logging_handler_leaves_status_untouched() {
        let mut requests = vec![LogoutRequest::new(
            "ST-1",
            Service::new("https://a.example.org"),
            "https://a.example.org",
            LogoutType::BackChannel,
        )];
        LoggingLogoutHandler.handle("TGT-1-secret", &mut requests).await;
        assert_eq!(requests[0].status(), LogoutRequestStatus::NotAttempted);
    }
}
