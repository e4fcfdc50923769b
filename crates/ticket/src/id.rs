//! Ticket identifier generation, parsing and log sanitization.
//!
//! Ticket IDs follow `<PREFIX>-<SEQUENCE>-<RANDOM>[-<SUFFIX>]`:
//!
//! ```text
//! TGT-42-q3Vd9kLwY0cJmR7xTb2NpA5sHf8uEzKg-cas01.example.org
//! └┬┘ └┬┘ └──────────────┬───────────────┘ └───────┬───────┘
//!  │   │                 │                          └ optional node suffix
//!  │   │                 └ unguessable alphanumeric part
//!  │   └ per-generator monotonic sequence
//!  └ ticket kind
//! ```
//!
//! The alphabet is restricted to `[A-Za-z0-9.-]`, so an ID never needs
//! escaping inside a URL query parameter.
//!
//! # Sanitization
//!
//! Session-bearing IDs (TGT and PGT) are credentials. [`sanitize_ticket_ids`]
//! masks their random part in free text, and [`Redacted`] does the same for
//! a single ID recorded in a tracing field.

use std::{
    borrow::Cow,
    fmt,
    sync::{
        LazyLock,
        atomic::{AtomicU64, Ordering},
    },
};

use rand::{Rng, distr::Alphanumeric};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    error::{ConfigError, TicketError, TicketResult},
    ticket::TicketKind,
};

/// Default length of the random part of a ticket ID.
pub const DEFAULT_RANDOM_LENGTH: usize = 32;

/// Minimum length of the random part of a ticket ID.
pub const MIN_RANDOM_LENGTH: usize = 16;

/// Number of trailing characters of the random part left visible by
/// [`sanitize_ticket_ids`].
const VISIBLE_TAIL: usize = 4;

#[allow(clippy::expect_used)]
static TICKET_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(TGT|PGT|ST|PT|AT)-(\d+)-([A-Za-z0-9]+)(?:-([A-Za-z0-9.-]+))?$")
        .expect("literal ticket ID pattern")
});

#[allow(clippy::expect_used)]
static SENSITIVE_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b((?:TGT|PGT)-\d+-)([A-Za-z0-9]+)").expect("literal sensitive ID pattern")
});

/// Produces unique ticket identifiers.
///
/// Implementations must be safe for concurrent use and never hand out the
/// same ID twice within a process.
pub trait TicketIdGenerator: Send + Sync + fmt::Debug {
    /// Returns a fresh identifier for a ticket of the given kind.
    fn new_ticket_id(&self, kind: TicketKind) -> String;
}

/// Configuration for [`DefaultTicketIdGenerator`].
///
/// # Example
///
/// ```
/// use cas_ticket::IdGeneratorConfig;
///
/// let config = IdGeneratorConfig::builder()
///     .random_length(40)
///     .suffix("cas01")
///     .build()?;
/// assert_eq!(config.suffix(), Some("cas01"));
/// # Ok::<(), cas_ticket::ConfigError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdGeneratorConfig {
    #[serde(default = "default_random_length")]
    random_length: usize,
    #[serde(default)]
    suffix: Option<String>,
}

fn default_random_length() -> usize {
    DEFAULT_RANDOM_LENGTH
}

impl Default for IdGeneratorConfig {
    fn default() -> Self {
        Self { random_length: DEFAULT_RANDOM_LENGTH, suffix: None }
    }
}

#[bon::bon]
impl IdGeneratorConfig {
    /// Builds a validated generator configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `random_length` is below
    /// [`MIN_RANDOM_LENGTH`] or `suffix` contains characters outside
    /// `[A-Za-z0-9.-]`.
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_RANDOM_LENGTH)] random_length: usize,
        #[builder(into)] suffix: Option<String>,
    ) -> Result<Self, ConfigError> {
        let config = Self { random_length, suffix };
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants enforced by the builder. Deserialized
    /// configurations should be validated before use.
    ///
    /// # Errors
    ///
    /// See [`IdGeneratorConfig::new`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.random_length < MIN_RANDOM_LENGTH {
            return Err(ConfigError::BelowMinimum {
                field: "random_length",
                value: self.random_length.to_string(),
                min: MIN_RANDOM_LENGTH.to_string(),
            });
        }
        if let Some(suffix) = &self.suffix
            && (suffix.is_empty()
                || !suffix.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-'))
        {
            return Err(ConfigError::invalid(
                "suffix",
                format!("{suffix:?} must be non-empty and contain only [A-Za-z0-9.-]"),
            ));
        }
        Ok(())
    }

    /// Length of the random part.
    #[must_use]
    pub fn random_length(&self) -> usize {
        self.random_length
    }

    /// Optional node suffix appended to every ID.
    #[must_use]
    pub fn suffix(&self) -> Option<&str> {
        self.suffix.as_deref()
    }
}

/// Generator combining an atomic sequence with an OS-seeded random part.
#[derive(Debug)]
pub struct DefaultTicketIdGenerator {
    sequence: AtomicU64,
    config: IdGeneratorConfig,
}

impl DefaultTicketIdGenerator {
    /// Creates a generator with the given configuration.
    #[must_use]
    pub fn new(config: IdGeneratorConfig) -> Self {
        Self { sequence: AtomicU64::new(1), config }
    }

    fn random_part(&self) -> String {
        rand::rng()
            .sample_iter(Alphanumeric)
            .take(self.config.random_length)
            .map(char::from)
            .collect()
    }
}

impl Default for DefaultTicketIdGenerator {
    fn default() -> Self {
        Self::new(IdGeneratorConfig::default())
    }
}

impl TicketIdGenerator for DefaultTicketIdGenerator {
    fn new_ticket_id(&self, kind: TicketKind) -> String {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let random = self.random_part();
        match self.config.suffix() {
            Some(suffix) => format!("{}-{sequence}-{random}-{suffix}", kind.prefix()),
            None => format!("{}-{sequence}-{random}", kind.prefix()),
        }
    }
}

/// The components of a well-formed ticket ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TicketIdParts<'a> {
    /// Kind encoded in the prefix.
    pub kind: TicketKind,
    /// Generator sequence number.
    pub sequence: u64,
    /// Random part.
    pub random: &'a str,
    /// Node suffix, if any.
    pub suffix: Option<&'a str>,
}

/// Splits a ticket ID into its components.
///
/// # Errors
///
/// Returns [`TicketError::InvalidId`] if `id` is not of the form
/// `<PREFIX>-<SEQUENCE>-<RANDOM>[-<SUFFIX>]`.
pub fn parse_ticket_id(id: &str) -> TicketResult<TicketIdParts<'_>> {
    let captures = TICKET_ID_PATTERN.captures(id).ok_or_else(|| TicketError::invalid_id(id))?;
    let (Some(prefix), Some(sequence), Some(random)) =
        (captures.get(1), captures.get(2), captures.get(3))
    else {
        return Err(TicketError::invalid_id(id));
    };
    let kind = TicketKind::from_prefix(prefix.as_str()).ok_or_else(|| TicketError::invalid_id(id))?;
    let sequence = sequence.as_str().parse().map_err(|_| TicketError::invalid_id(id))?;
    Ok(TicketIdParts {
        kind,
        sequence,
        random: random.as_str(),
        suffix: captures.get(4).map(|m| m.as_str()),
    })
}

/// Masks the random part of every TGT and PGT identifier found in `text`,
/// keeping the last few characters for correlation.
///
/// ```
/// use cas_ticket::sanitize_ticket_ids;
///
/// let line = "destroyed TGT-7-abcdefghijklmnop-node1 for alice";
/// assert_eq!(sanitize_ticket_ids(line), "destroyed TGT-7-************mnop-node1 for alice");
/// ```
#[must_use]
pub fn sanitize_ticket_ids(text: &str) -> Cow<'_, str> {
    SENSITIVE_ID_PATTERN.replace_all(text, |caps: &regex::Captures<'_>| {
        let head = caps.get(1).map_or("", |m| m.as_str());
        let random = caps.get(2).map_or("", |m| m.as_str());
        let masked = random.len().saturating_sub(VISIBLE_TAIL);
        format!("{head}{}{}", "*".repeat(masked), &random[masked..])
    })
}

/// Display wrapper that renders a ticket ID with its secret part masked.
///
/// Used for every ticket ID recorded in a tracing field:
///
/// ```
/// use cas_ticket::Redacted;
///
/// let id = "PGT-3-0123456789abcdef";
/// assert_eq!(Redacted(id).to_string(), "PGT-3-************cdef");
/// assert_eq!(Redacted("ST-3-0123456789abcdef").to_string(), "ST-3-0123456789abcdef");
/// ```
#[derive(Clone, Copy)]
pub struct Redacted<'a>(pub &'a str);

impl fmt::Display for Redacted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&sanitize_ticket_ids(self.0))
    }
}

impl fmt::Debug for Redacted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
