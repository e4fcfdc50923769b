//! Expiration policies.
//!
//! A policy is attached to a ticket when it is minted and never changes.
//! [`ExpirationPolicy::is_expired`] is a pure function of the ticket's
//! [`TicketState`] and the evaluation instant. For a fixed state it is
//! monotonic in time: once it reports `true` it keeps reporting `true`.
//!
//! # Variants
//!
//! | Policy | Expired when |
//! |--------|--------------|
//! | [`NeverExpires`](ExpirationPolicy::NeverExpires) | never |
//! | [`AlwaysExpires`](ExpirationPolicy::AlwaysExpires) | always |
//! | [`HardTimeout`](ExpirationPolicy::HardTimeout) | `now - created > time_to_kill` |
//! | [`Timeout`](ExpirationPolicy::Timeout) | `now - last_used > time_to_kill` |
//! | [`TicketGrantingTicket`](ExpirationPolicy::TicketGrantingTicket) | hard TTL exceeded or idle for longer than `time_to_kill` |
//! | [`MultiTimeUseOrTimeout`](ExpirationPolicy::MultiTimeUseOrTimeout) | `uses >= number_of_uses` or `now - created > time_to_kill` |
//!
//! The use-count and time checks of `MultiTimeUseOrTimeout` are independent;
//! whichever triggers first expires the ticket.
//!
//! # Configuration
//!
//! Policies deserialize from a tagged map with human-readable durations:
//!
//! ```
//! use std::time::Duration;
//! use cas_ticket::ExpirationPolicy;
//!
//! let policy: ExpirationPolicy = serde_json::from_str(
//!     r#"{"type":"ticket_granting_ticket","max_time_to_live":"8h","time_to_kill":"2h"}"#,
//! )?;
//! assert_eq!(
//!     policy,
//!     ExpirationPolicy::TicketGrantingTicket {
//!         max_time_to_live: Duration::from_secs(8 * 3600),
//!         time_to_kill: Duration::from_secs(2 * 3600),
//!     }
//! );
//! # Ok::<(), serde_json::Error>(())
//! ```

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::ticket::TicketState;

/// Decides when a ticket stops being valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExpirationPolicy {
    /// The ticket never expires. Intended for tests and development.
    NeverExpires,

    /// The ticket is expired from the moment it is read. Simulates eviction
    /// in tests.
    AlwaysExpires,

    /// Fixed lifetime measured from creation, regardless of use.
    HardTimeout {
        /// Maximum age.
        #[serde(with = "humantime_serde")]
        time_to_kill: Duration,
    },

    /// Idle timeout measured from the last successful use.
    Timeout {
        /// Maximum idle time.
        #[serde(with = "humantime_serde")]
        time_to_kill: Duration,
    },

    /// Session policy: a hard lifetime plus an idle timeout that resets on
    /// every successful use.
    TicketGrantingTicket {
        /// Maximum age.
        #[serde(with = "humantime_serde")]
        max_time_to_live: Duration,
        /// Maximum idle time.
        #[serde(with = "humantime_serde")]
        time_to_kill: Duration,
    },

    /// Bounded number of uses within a short lifetime.
    MultiTimeUseOrTimeout {
        /// Uses allowed before the ticket expires.
        number_of_uses: u32,
        /// Maximum age.
        #[serde(with = "humantime_serde")]
        time_to_kill: Duration,
    },
}

impl ExpirationPolicy {
    /// Policy for single-use tickets that must be redeemed within `time_to_kill`.
    #[must_use]
    pub const fn single_use(time_to_kill: Duration) -> Self {
        Self::MultiTimeUseOrTimeout { number_of_uses: 1, time_to_kill }
    }

    /// Returns `true` if a ticket in `state` is expired at `now`.
    #[must_use]
    pub fn is_expired(&self, state: &TicketState, now: DateTime<Utc>) -> bool {
        match self {
            Self::NeverExpires => false,
            Self::AlwaysExpires => true,
            Self::HardTimeout { time_to_kill } => {
                elapsed_exceeds(state.creation_time(), now, *time_to_kill)
            },
            Self::Timeout { time_to_kill } => {
                elapsed_exceeds(state.last_time_used(), now, *time_to_kill)
            },
            Self::TicketGrantingTicket { max_time_to_live, time_to_kill } => {
                elapsed_exceeds(state.creation_time(), now, *max_time_to_live)
                    || elapsed_exceeds(state.last_time_used(), now, *time_to_kill)
            },
            Self::MultiTimeUseOrTimeout { number_of_uses, time_to_kill } => {
                state.count_of_uses() >= *number_of_uses
                    || elapsed_exceeds(state.creation_time(), now, *time_to_kill)
            },
        }
    }

    /// Upper bound on how long a ticket in `state` stays live after `now`
    /// if it is not used again.
    ///
    /// Returns `None` when the policy imposes no bound. Cache backends use
    /// this as the native entry lifetime; the registry re-stores a ticket
    /// after every use, which refreshes the bound.
    #[must_use]
    pub fn remaining_lifetime(&self, state: &TicketState, now: DateTime<Utc>) -> Option<Duration> {
        if self.is_expired(state, now) {
            return Some(Duration::ZERO);
        }
        match self {
            Self::NeverExpires => None,
            Self::AlwaysExpires => Some(Duration::ZERO),
            Self::HardTimeout { time_to_kill }
            | Self::MultiTimeUseOrTimeout { time_to_kill, .. } => {
                deadline(state.creation_time(), *time_to_kill).map(|at| until(now, at))
            },
            Self::Timeout { time_to_kill } => {
                deadline(state.last_time_used(), *time_to_kill).map(|at| until(now, at))
            },
            Self::TicketGrantingTicket { max_time_to_live, time_to_kill } => {
                let hard = deadline(state.creation_time(), *max_time_to_live);
                let idle = deadline(state.last_time_used(), *time_to_kill);
                match (hard, idle) {
                    (Some(hard), Some(idle)) => Some(until(now, hard.min(idle))),
                    (Some(at), None) | (None, Some(at)) => Some(until(now, at)),
                    (None, None) => None,
                }
            },
        }
    }

    /// Maximum number of uses, for policies that count them.
    #[must_use]
    pub fn max_uses(&self) -> Option<u32> {
        match self {
            Self::MultiTimeUseOrTimeout { number_of_uses, .. } => Some(*number_of_uses),
            _ => None,
        }
    }
}

/// Durations that do not fit a `TimeDelta` are treated as unbounded.
fn elapsed_exceeds(since: DateTime<Utc>, now: DateTime<Utc>, limit: Duration) -> bool {
    TimeDelta::from_std(limit).is_ok_and(|limit| now.signed_duration_since(since) > limit)
}

fn deadline(since: DateTime<Utc>, limit: Duration) -> Option<DateTime<Utc>> {
    TimeDelta::from_std(limit).ok().and_then(|limit| since.checked_add_signed(limit))
}

fn until(now: DateTime<Utc>, at: DateTime<Utc>) -> Duration {
    at.signed_duration_since(now).to_std().unwrap_or(Duration::ZERO)
}
