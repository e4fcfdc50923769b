//! Relying-party service identity.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A service (relying party) requesting or presenting tickets.
///
/// `id` is the canonical service identifier used for matching; `original_url`
/// is the URL exactly as the service presented it and is the default target
/// for single-logout callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Service {
    id: String,
    original_url: String,
}

impl Service {
    /// Creates a service whose identifier and original URL are the same.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        Self { id: canonical_id(&url), original_url: url }
    }

    /// Canonical identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// URL as originally presented.
    #[must_use]
    pub fn original_url(&self) -> &str {
        &self.original_url
    }

    /// Returns `true` if `other` identifies the same relying party.
    #[must_use]
    pub fn matches(&self, other: &Service) -> bool {
        self.id == other.id
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// Drops the fragment and any `ticket` query parameter, which a service
/// echoes back when presenting a ticket.
fn canonical_id(url: &str) -> String {
    let url = url.split('#').next().unwrap_or(url);
    let Some((base, query)) = url.split_once('?') else {
        return url.to_owned();
    };
    let kept: Vec<&str> =
        query.split('&').filter(|pair| !pair.is_empty() && !pair.starts_with("ticket=")).collect();
    if kept.is_empty() { base.to_owned() } else { format!("{base}?{}", kept.join("&")) }
}
