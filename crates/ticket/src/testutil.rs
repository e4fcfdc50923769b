//! Deterministic helpers for tests.
//!
//! Feature-gated behind `testutil`. Enable it in `[dev-dependencies]`:
//!
//! ```toml
//! [dev-dependencies]
//! cas-ticket = { path = "../ticket", features = ["testutil"] }
//! ```

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use parking_lot::Mutex;

use crate::{
    authentication::{Authentication, Principal},
    clock::Clock,
    id::TicketIdGenerator,
    ticket::TicketKind,
};

/// Generates readable IDs of the form `TGT-1`, `ST-1`, `ST-2`, ... with an
/// independent counter per kind.
#[derive(Debug, Default)]
pub struct SequentialIdGenerator {
    counters: Mutex<HashMap<TicketKind, u64>>,
}

impl TicketIdGenerator for SequentialIdGenerator {
    fn new_ticket_id(&self, kind: TicketKind) -> String {
        let mut counters = self.counters.lock();
        let next = counters.entry(kind).or_insert(0);
        *next += 1;
        format!("{}-{next}", kind.prefix())
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Creates a clock reading `start`.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Arc::new(Mutex::new(start)) }
    }

    /// Creates a clock reading [`epoch`].
    #[must_use]
    pub fn at_epoch() -> Self {
        Self::new(epoch())
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        if let Some(next) =
            TimeDelta::from_std(by).ok().and_then(|delta| now.checked_add_signed(delta))
        {
            *now = next;
        }
    }

    /// Sets the clock to `at`.
    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock() = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Fixed reference instant used across test suites: 2024-01-01T00:00:00Z.
#[must_use]
pub fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(1_704_067_200, 0).single().unwrap_or_default()
}

/// Authentication for `principal` at [`epoch`].
#[must_use]
pub fn authentication(principal: &str) -> Authentication {
    Authentication::builder()
        .principal(Principal::new(principal))
        .authentication_date(epoch())
        .successes(vec!["TestAuthenticationHandler".to_owned()])
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_ids_are_per_kind() {
        let generator = SequentialIdGenerator::default();
        assert_eq!(generator.new_ticket_id(TicketKind::TicketGranting), "TGT-1");
        assert_eq!(generator.new_ticket_id(TicketKind::Service), "ST-1");
        assert_eq!(generator.new_ticket_id(TicketKind::Service), "ST-2");
    }

    #[test]
    fn test_manual_clock_advances_all_clones() {
        let clock = ManualClock::at_epoch();
        let other = clock.clone();
        clock.advance(Duration::from_secs(90));
        assert_eq!(other.now(), epoch() + TimeDelta::seconds(90));
    }
}
