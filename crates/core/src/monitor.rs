//! Session statistics for status reports.

use std::{fmt, sync::Arc};

use cas_ticket_registry::{RegistryResult, TicketCount, TicketRegistry};
use serde::Serialize;

use crate::config::MonitorConfig;

/// Health classification of an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    /// The registry could not be queried.
    Error,
    /// A threshold was exceeded.
    Warn,
    /// The registry cannot report counts.
    Unknown,
    /// Counts are within thresholds.
    Ok,
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Error => "ERROR",
            Self::Warn => "WARN",
            Self::Unknown => "UNKNOWN",
            Self::Ok => "OK",
        })
    }
}

/// One observation of the ticket registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    /// Overall classification.
    pub code: StatusCode,
    /// Human-readable summary.
    pub description: String,
    /// Live SSO sessions, when known.
    pub session_count: Option<u64>,
    /// Live service tickets, when known.
    pub service_ticket_count: Option<u64>,
}

/// Reports session and service-ticket counts against warning thresholds.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use cas_core::{MonitorConfig, SessionMonitor, StatusCode};
/// use cas_ticket_registry::MemoryTicketRegistry;
///
/// # #[tokio::main]
/// # async fn main() {
/// let monitor = SessionMonitor::new(Arc::new(MemoryTicketRegistry::new()), MonitorConfig::default());
/// let status = monitor.observe().await;
/// assert_eq!(status.code, StatusCode::Ok);
/// assert_eq!(status.description, "0 sessions. 0 service tickets.");
/// # }
/// ```
pub struct SessionMonitor<R> {
    registry: Arc<R>,
    config: MonitorConfig,
}

impl<R> fmt::Debug for SessionMonitor<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionMonitor").field("config", &self.config).finish_non_exhaustive()
    }
}

impl<R: TicketRegistry> SessionMonitor<R> {
    /// Creates a monitor over `registry`.
    #[must_use]
    pub fn new(registry: Arc<R>, config: MonitorConfig) -> Self {
        Self { registry, config }
    }

    /// Monitor name used in status reports.
    #[must_use]
    pub fn name(&self) -> &'static str {
        "SessionMonitor"
    }

    async fn counts(&self) -> RegistryResult<(TicketCount, TicketCount)> {
        Ok((self.registry.session_count().await?, self.registry.service_ticket_count().await?))
    }

    /// Queries the registry and classifies the result. Never fails: a
    /// registry error becomes an [`StatusCode::Error`] observation.
    #[tracing::instrument(skip(self), fields(registry = self.registry.name()))]
    pub async fn observe(&self) -> SessionStatus {
        let (sessions, tickets) = match self.counts().await {
            Ok(counts) => counts,
            Err(e) => {
                tracing::warn!(error = %e, "session monitor could not query the registry");
                return SessionStatus {
                    code: StatusCode::Error,
                    description: e.to_string(),
                    session_count: None,
                    service_ticket_count: None,
                };
            },
        };

        let (TicketCount::Known(session_count), TicketCount::Known(ticket_count)) = (sessions, tickets)
        else {
            return SessionStatus {
                code: StatusCode::Unknown,
                description: format!(
                    "Ticket registry {} reports unknown session and/or ticket counts.",
                    self.registry.name()
                ),
                session_count: known(sessions),
                service_ticket_count: known(tickets),
            };
        };

        let mut code = StatusCode::Ok;
        let mut description = String::new();
        match self.config.session_count_warn_threshold {
            Some(threshold) if session_count > threshold => {
                code = StatusCode::Warn;
                description
                    .push_str(&format!("Session count ({session_count}) is above threshold {threshold}. "));
            },
            _ => description.push_str(&format!("{session_count} sessions. ")),
        }
        match self.config.service_ticket_count_warn_threshold {
            Some(threshold) if ticket_count > threshold => {
                code = StatusCode::Warn;
                description.push_str(&format!(
                    "Service ticket count ({ticket_count}) is above threshold {threshold}."
                ));
            },
            _ => description.push_str(&format!("{ticket_count} service tickets.")),
        }

        SessionStatus {
            code,
            description,
            session_count: Some(session_count),
            service_ticket_count: Some(ticket_count),
        }
    }
}

fn known(count: TicketCount) -> Option<u64> {
    match count {
        TicketCount::Known(n) => Some(n),
        TicketCount::Unknown => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use async_trait::async_trait;
    use cas_ticket::{Clock, Ticket, TicketPolicies};
    use cas_ticket_registry::{
        MemoryTicketRegistry, ReplicatedRegistryConfig, TicketCluster,
        testutil::{factory, seed_session},
    };

    use super::*;

    /// Memory registry that refuses to count.
    struct OpaqueRegistry(MemoryTicketRegistry);

    #[async_trait]
    impl TicketRegistry for OpaqueRegistry {
        fn name(&self) -> &'static str {
            "opaque"
        }

        fn clock(&self) -> &dyn Clock {
            self.0.clock()
        }

        fn supports_counting(&self) -> bool {
            false
        }

        async fn add_ticket(&self, ticket: Ticket) -> RegistryResult<()> {
            self.0.add_ticket(ticket).await
        }

        async fn fetch_ticket(&self, id: &str) -> RegistryResult<Option<Ticket>> {
            self.0.fetch_ticket(id).await
        }

        async fn remove_ticket(&self, id: &str) -> RegistryResult<bool> {
            self.0.remove_ticket(id).await
        }

        async fn fetch_all(&self) -> RegistryResult<Vec<Ticket>> {
            self.0.fetch_all().await
        }
    }

    async fn seeded_registry() -> Arc<MemoryTicketRegistry> {
        let registry = Arc::new(MemoryTicketRegistry::new());
        // Three STs plus one PT: 4 service tickets, 1 session.
        seed_session(registry.as_ref(), &factory(TicketPolicies::default()), "alice", 3, 1, chrono::Utc::now())
            .await
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn test_counts_within_thresholds() {
        let config = MonitorConfig::builder()
            .session_count_warn_threshold(1)
            .service_ticket_count_warn_threshold(4)
            .build();
        let status = SessionMonitor::new(seeded_registry().await, config).observe().await;

        assert_eq!(status.code, StatusCode::Ok);
        assert_eq!(status.description, "1 sessions. 4 service tickets.");
        assert_eq!(status.session_count, Some(1));
        assert_eq!(status.service_ticket_count, Some(4));
    }

    #[tokio::test]
    async fn test_session_threshold_warns() {
        let config = MonitorConfig::builder().session_count_warn_threshold(0).build();
        let status = SessionMonitor::new(seeded_registry().await, config).observe().await;

        assert_eq!(status.code, StatusCode::Warn);
        assert_eq!(status.description, "Session count (1) is above threshold 0. 4 service tickets.");
    }

    #[tokio::test]
    async fn test_ticket_threshold_warns() {
        let config = MonitorConfig::builder().service_ticket_count_warn_threshold(3).build();
        let status = SessionMonitor::new(seeded_registry().await, config).observe().await;

        assert_eq!(status.code, StatusCode::Warn);
        assert_eq!(status.description, "1 sessions. Service ticket count (4) is above threshold 3.");
    }

    #[tokio::test]
    async fn test_unknown_counts() {
        let registry = Arc::new(OpaqueRegistry(MemoryTicketRegistry::new()));
        let status = SessionMonitor::new(registry, MonitorConfig::default()).observe().await;

        assert_eq!(status.code, StatusCode::Unknown);
        assert_eq!(
            status.description,
            "Ticket registry opaque reports unknown session and/or ticket counts."
        );
        assert_eq!(status.session_count, None);
    }

    #[tokio::test]
    async fn test_registry_failure_is_an_error_status() {
        let config = ReplicatedRegistryConfig::builder()
            .members(vec!["cas-1".to_owned(), "cas-2".to_owned()])
            .local_member("cas-1")
            .build();
        let cluster = TicketCluster::new(&config, cas_ticket::SystemClock::shared()).unwrap();
        let registry = Arc::new(cluster.registry("cas-1").unwrap());
        cluster.set_online("cas-1", false);
        cluster.set_online("cas-2", false);

        let status = SessionMonitor::new(registry, MonitorConfig::default()).observe().await;
        assert_eq!(status.code, StatusCode::Error);
        assert!(status.description.contains("unreachable"), "{}", status.description);
        assert_eq!(status.code.to_string(), "ERROR");
    }
}
