//! Process-lifetime dedup ledger for message ids and codes.
//!
//! Nothing here is persisted: a restart forgets every code it delivered.

use std::collections::HashSet;

/// Record of already-processed message ids and already-delivered codes.
#[derive(Debug, Default)]
pub struct DedupLedger {
    seen_message_ids: HashSet<String>,
    seen_codes: HashSet<String>,
}

impl DedupLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether this message id has never been processed.
    pub fn is_new_message(&self, id: &str) -> bool {
        !self.seen_message_ids.contains(id)
    }

    /// Mark a message as processed. Returns `false` if it already was.
    pub fn mark_message_seen(&mut self, id: &str) -> bool {
        self.seen_message_ids.insert(id.to_string())
    }

    /// Whether this code has never been handed to a sink.
    pub fn is_new_code(&self, code: &str) -> bool {
        !self.seen_codes.contains(code)
    }

    /// Mark a code as handled. Returns `false` if it already was.
    pub fn mark_code_seen(&mut self, code: &str) -> bool {
        self.seen_codes.insert(code.to_string())
    }

    pub fn message_count(&self) -> usize {
        self.seen_message_ids.len()
    }

    pub fn code_count(&self) -> usize {
        self.seen_codes.len()
    }
}
