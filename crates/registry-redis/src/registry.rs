//! [`RedisTicketRegistry`]: tickets stored as JSON strings in Redis.
//!
//! Each ticket is written with `SET ... PX <remaining lifetime>` so Redis
//! drops it when its policy would. Removal is a single `DEL`, which Redis
//! executes atomically: of several nodes redeeming the same ticket, exactly
//! one sees a deleted count of 1. A `DEL` whose reply timed out is not
//! retried: the retry would find the key gone and report the ticket absent.
//!
//! Counting would require a full keyspace scan, so session and service
//! ticket counts are reported as [`TicketCount::Unknown`](cas_ticket_registry::TicketCount).

use std::{fmt, future::Future, time::Duration};

use async_trait::async_trait;
use cas_ticket::{Clock, Redacted, SharedClock, SystemClock, Ticket};
use cas_ticket_registry::{RegistryResult, TicketRegistry};
use redis::{AsyncCommands, aio::ConnectionManager};

use crate::{
    config::RedisRegistryConfig,
    error::RedisRegistryError,
    keys::{scan_pattern, ticket_id, ticket_key},
    retry::with_retry,
};

/// Ticket registry backed by Redis.
///
/// # Cloning
///
/// Clones share one multiplexed connection.
#[derive(Clone)]
pub struct RedisTicketRegistry {
    connection: ConnectionManager,
    config: RedisRegistryConfig,
    clock: SharedClock,
}

impl RedisTicketRegistry {
    /// Connects to Redis using the system clock.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Unavailable`] if the server cannot be reached
    /// and [`RegistryError::Internal`] for a malformed URL.
    ///
    /// [`RegistryError::Unavailable`]: cas_ticket_registry::RegistryError::Unavailable
    /// [`RegistryError::Internal`]: cas_ticket_registry::RegistryError::Internal
    pub async fn connect(config: RedisRegistryConfig) -> RegistryResult<Self> {
        Self::connect_with_clock(config, SystemClock::shared()).await
    }

    /// Connects to Redis, reading `clock` for expiry decisions.
    ///
    /// # Errors
    ///
    /// See [`RedisTicketRegistry::connect`].
    pub async fn connect_with_clock(
        config: RedisRegistryConfig,
        clock: SharedClock,
    ) -> RegistryResult<Self> {
        let client = redis::Client::open(config.url()).map_err(RedisRegistryError::from)?;
        let connection = ConnectionManager::new(client).await.map_err(RedisRegistryError::from)?;
        tracing::info!(prefix = config.key_prefix(), "connected to Redis ticket registry");
        Ok(Self { connection, config, clock })
    }

    /// Runs an idempotent Redis command under the configured deadline,
    /// retrying transient failures.
    async fn run<T, F, Fut>(&self, operation: &str, command: F) -> RegistryResult<T>
    where
        F: Fn(ConnectionManager) -> Fut,
        Fut: Future<Output = Result<T, RedisRegistryError>>,
    {
        self.run_with(operation, RedisRegistryError::is_transient, command).await
    }

    /// Runs a command that must apply at most once. It is retried only when
    /// it never reached the server; a timeout is returned to the caller.
    async fn run_at_most_once<T, F, Fut>(&self, operation: &str, command: F) -> RegistryResult<T>
    where
        F: Fn(ConnectionManager) -> Fut,
        Fut: Future<Output = Result<T, RedisRegistryError>>,
    {
        self.run_with(operation, RedisRegistryError::is_unsent, command).await
    }

    async fn run_with<T, F, Fut>(
        &self,
        operation: &str,
        retryable: fn(&RedisRegistryError) -> bool,
        command: F,
    ) -> RegistryResult<T>
    where
        F: Fn(ConnectionManager) -> Fut,
        Fut: Future<Output = Result<T, RedisRegistryError>>,
    {
        let timeout = self.config.operation_timeout();
        with_retry(self.config.retry_policy(), operation, retryable, || {
            let fut = command(self.connection.clone());
            async move {
                match tokio::time::timeout(timeout, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(RedisRegistryError::Timeout),
                }
            }
        })
        .await
    }

    fn key(&self, id: &str) -> String {
        ticket_key(self.config.key_prefix(), id)
    }
}

impl fmt::Debug for RedisTicketRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisTicketRegistry")
            .field("key_prefix", &self.config.key_prefix())
            .finish_non_exhaustive()
    }
}

/// Redis rejects `PX 0`; an already-expired ticket is kept for 1ms so the
/// write still replaces any older copy.
fn px_millis(lifetime: Duration) -> u64 {
    u64::try_from(lifetime.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl TicketRegistry for RedisTicketRegistry {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    fn supports_counting(&self) -> bool {
        false
    }

    #[tracing::instrument(skip_all, fields(ticket_id = %Redacted(ticket.id())))]
    async fn add_ticket(&self, ticket: Ticket) -> RegistryResult<()> {
        let key = self.key(ticket.id());
        let payload = serde_json::to_string(&ticket)?;
        let state = ticket.state();
        let lifetime = state.expiration_policy().remaining_lifetime(state, self.clock.now());

        self.run("add_ticket", |mut conn| {
            let key = key.clone();
            let payload = payload.clone();
            async move {
                match lifetime {
                    Some(lifetime) => conn.pset_ex::<_, _, ()>(key, payload, px_millis(lifetime)).await?,
                    None => conn.set::<_, _, ()>(key, payload).await?,
                }
                Ok(())
            }
        })
        .await
    }

    #[tracing::instrument(skip_all, fields(ticket_id = %Redacted(id)))]
    async fn fetch_ticket(&self, id: &str) -> RegistryResult<Option<Ticket>> {
        let key = self.key(id);
        let payload: Option<String> = self
            .run("fetch_ticket", |mut conn| {
                let key = key.clone();
                async move { Ok(conn.get(key).await?) }
            })
            .await?;
        match payload {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    #[tracing::instrument(skip_all, fields(ticket_id = %Redacted(id)))]
    async fn remove_ticket(&self, id: &str) -> RegistryResult<bool> {
        let key = self.key(id);
        let deleted: u64 = self
            .run_at_most_once("remove_ticket", |mut conn| {
                let key = key.clone();
                async move { Ok(conn.del(key).await?) }
            })
            .await?;
        Ok(deleted > 0)
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_all(&self) -> RegistryResult<Vec<Ticket>> {
        let pattern = scan_pattern(self.config.key_prefix());
        let keys: Vec<String> = self
            .run("scan_tickets", |mut conn| {
                let pattern = pattern.clone();
                async move {
                    let mut keys = Vec::new();
                    let mut iter = conn.scan_match::<_, String>(pattern).await?;
                    while let Some(key) = iter.next_item().await {
                        keys.push(key);
                    }
                    Ok(keys)
                }
            })
            .await?;

        let mut tickets = Vec::with_capacity(keys.len());
        for key in &keys {
            let Some(id) = ticket_id(self.config.key_prefix(), key) else {
                continue;
            };
            if let Some(ticket) = self.fetch_ticket(id).await? {
                tickets.push(ticket);
            }
        }
        Ok(tickets)
    }

    #[tracing::instrument(skip(self))]
    async fn health_check(&self) -> RegistryResult<()> {
        self.run("ping", |mut conn| async move {
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_px_is_never_zero() {
        assert_eq!(px_millis(Duration::ZERO), 1);
        assert_eq!(px_millis(Duration::from_secs(10)), 10_000);
        assert_eq!(px_millis(Duration::MAX), u64::MAX);
    }
}
