//! Redis key layout.
//!
//! Every ticket lives under `{prefix}{ticket_id}`. Ticket IDs contain only
//! ASCII alphanumerics, `-` and `.`, so the only glob metacharacters that
//! can reach a `SCAN MATCH` pattern come from the configured prefix.

/// Key under which `id` is stored.
pub(crate) fn ticket_key(prefix: &str, id: &str) -> String {
    format!("{prefix}{id}")
}

/// Ticket ID encoded in `key`, if it carries `prefix`.
pub(crate) fn ticket_id<'a>(prefix: &str, key: &'a str) -> Option<&'a str> {
    key.strip_prefix(prefix).filter(|id| !id.is_empty())
}

/// `SCAN MATCH` pattern selecting every ticket key, with the prefix's glob
/// metacharacters escaped.
pub(crate) fn scan_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 2);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('*');
    pattern
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_scan_pattern_escapes_metacharacters() {
        assert_eq!(scan_pattern("cas:ticket:"), "cas:ticket:*");
        assert_eq!(scan_pattern("a*b?[c]"), "a\\*b\\?\\[c\\]*");
    }

    #[test]
    fn test_foreign_keys_are_ignored() {
        assert_eq!(ticket_id("cas:ticket:", "other:TGT-1"), None);
        assert_eq!(ticket_id("cas:ticket:", "cas:ticket:"), None);
    }

    proptest! {
        /// The ID is recovered from the key for any prefix and ticket ID.
        #[test]
        fn key_preserves_ticket_id(
            prefix in "[a-z:*?]{1,12}",
            id in "(TGT|ST|PGT|PT|AT)-[0-9]{1,6}-[A-Za-z0-9]{8,32}",
        ) {
            let key = ticket_key(&prefix, &id);
            prop_assert_eq!(ticket_id(&prefix, &key), Some(id.as_str()));
        }
    }
}
