//! Periodic removal of expired tickets.
//!
//! Registries reap expired tickets lazily, on read. Tickets nobody reads
//! again (abandoned sessions) would stay forever, and their services would
//! never hear about the logout. The [`RegistryCleaner`] scans the registry
//! on an interval, hands logout requests for expired sessions to a
//! [`LogoutHandler`], and deletes every expired ticket with its subtree.
//!
//! # Shutdown
//!
//! [`RegistryCleaner::start`] returns a [`CleanerHandle`]. The background
//! task stops when the handle is dropped or
//! [`shutdown`](CleanerHandle::shutdown) is called.

use std::{fmt, sync::Arc, time::Duration};

use cas_ticket::{Redacted, TicketKind};
use cas_ticket_registry::{RegistryResult, TicketRegistry};
use tokio::{select, sync::watch, time::sleep};
use tracing::{debug, info, warn};

use crate::{
    config::CleanerConfig,
    logout::{SharedLogoutHandler, logout_requests_for},
    services::ServicesManager,
};

/// Holds the shutdown signal sender. When dropped, the watch channel
/// closes and the cleaner task exits.
struct ShutdownGuard {
    shutdown_tx: watch::Sender<()>,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Handle to a running cleaner task.
pub struct CleanerHandle {
    shutdown_guard: Option<ShutdownGuard>,
}

impl CleanerHandle {
    /// Signals the cleaner task to stop. Idempotent.
    pub fn shutdown(&self) {
        if let Some(guard) = &self.shutdown_guard {
            let _ = guard.shutdown_tx.send(());
        }
    }

    /// Whether a background task was started.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shutdown_guard.as_ref().is_some_and(|guard| !guard.shutdown_tx.is_closed())
    }
}

impl fmt::Debug for CleanerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CleanerHandle").field("running", &self.is_running()).finish()
    }
}

/// Removes expired tickets and triggers single logout for expired sessions.
pub struct RegistryCleaner<R> {
    registry: Arc<R>,
    services: Arc<dyn ServicesManager>,
    logout_handler: SharedLogoutHandler,
}

impl<R> fmt::Debug for RegistryCleaner<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryCleaner").finish_non_exhaustive()
    }
}

impl<R: TicketRegistry + 'static> RegistryCleaner<R> {
    /// Creates a cleaner. Nothing runs until [`clean`](Self::clean) or
    /// [`start`](Self::start) is called.
    #[must_use]
    pub fn new(
        registry: Arc<R>,
        services: Arc<dyn ServicesManager>,
        logout_handler: SharedLogoutHandler,
    ) -> Self {
        Self { registry, services, logout_handler }
    }

    /// Runs one cleaning pass. Returns the number of tickets deleted.
    ///
    /// # Errors
    ///
    /// Returns the first registry error; tickets handled before it stay
    /// deleted.
    #[tracing::instrument(skip(self), fields(registry = self.registry.name()))]
    pub async fn clean(&self) -> RegistryResult<u64> {
        let now = self.registry.clock().now();
        let expired: Vec<_> =
            self.registry.fetch_all().await?.into_iter().filter(|t| t.is_expired(now)).collect();
        if expired.is_empty() {
            debug!("no expired tickets");
            return Ok(0);
        }

        let mut deleted = 0;
        for ticket in expired {
            if ticket.kind() == TicketKind::TicketGranting
                && let Some(session) = ticket.as_ticket_granting()
            {
                let mut requests = logout_requests_for(session, self.services.as_ref());
                if !requests.is_empty() {
                    debug!(
                        session_id = %Redacted(ticket.id()),
                        requests = requests.len(),
                        "expired session; sending logout requests",
                    );
                    self.logout_handler.handle(ticket.id(), &mut requests).await;
                }
            }
            deleted += self.registry.delete_ticket(ticket.id()).await?;
        }

        // Tickets whose ancestors vanished are reaped by a live listing.
        let _live = self.registry.get_tickets().await?;
        info!(deleted, "expired tickets removed");
        Ok(deleted)
    }

    /// Starts cleaning in the background, first after
    /// `config.start_delay`, then every `config.interval`.
    ///
    /// With `config.enabled == false` no task is spawned and the returned
    /// handle is inert. Must be called from within a Tokio runtime.
    pub fn start(self, config: &CleanerConfig) -> CleanerHandle {
        if !config.enabled {
            info!("registry cleaner disabled");
            return CleanerHandle { shutdown_guard: None };
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let cleaner = Arc::new(self);
        let (start_delay, interval) = (config.start_delay, config.interval);
        tokio::spawn(async move {
            cleaner.run(start_delay, interval, shutdown_rx).await;
        });
        CleanerHandle { shutdown_guard: Some(ShutdownGuard { shutdown_tx }) }
    }

    /// Exits when the shutdown signal is received (i.e., when the watch
    /// sender is dropped or [`CleanerHandle::shutdown`] is called).
    async fn run(&self, start_delay: Duration, interval: Duration, mut shutdown_rx: watch::Receiver<()>) {
        let mut delay = start_delay;
        loop {
            select! {
                _ = sleep(delay) => {}
                _ = shutdown_rx.changed() => {
                    debug!("registry cleaner stopped");
                    return;
                }
            }
            delay = interval;
            if let Err(e) = self.clean().await {
                warn!(error = %e, "registry cleaning failed");
            }
        }
    }
}
