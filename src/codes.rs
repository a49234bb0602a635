//! Invite code extraction.
//!
//! A code is a run of exactly six characters from `A-Z0-9` standing as a
//! word on its own: `CDNQ4Q` in "join with CDNQ4Q now" matches, while
//! `ABCDEFG` (seven characters) and `abc123` (lowercase) do not.

use std::sync::LazyLock;

use regex::Regex;

/// Length of an invite code.
pub const CODE_LEN: usize = 6;

static CODE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z0-9]{6}\b").unwrap());

/// Extract every candidate code from message text, left to right.
///
/// Duplicates within the same text are kept; the ledger drops them later.
pub fn extract_codes(content: &str) -> Vec<String> {
    if content.is_empty() {
        return Vec::new();
    }

    CODE_PATTERN
        .find_iter(content)
        .map(|m| m.as_str().to_string())
        .collect()
}
