//! Per-turn state threaded through detection and dispatch.

use std::collections::HashMap;

use super::dedup::DedupGuard;
use crate::inference::types::ToolCall;

/// State scoped to one assistant turn: which calls were dispatched and how
/// far each streamed message has been scanned.
#[derive(Debug, Default)]
pub struct TurnContext {
    turn_index: u64,
    dedup: DedupGuard,
    scanned: HashMap<String, usize>,
}

impl TurnContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new assistant turn, forgetting the previous turn's calls.
    pub fn begin_turn(&mut self) -> u64 {
        self.turn_index += 1;
        self.dedup.clear();
        self.scanned.clear();
        self.turn_index
    }

    pub fn turn_index(&self) -> u64 {
        self.turn_index
    }

    /// See [`DedupGuard::admit`].
    pub fn admit(&mut self, call: &ToolCall) -> bool {
        self.dedup.admit(call)
    }

    pub fn dispatched_count(&self) -> usize {
        self.dedup.len()
    }

    pub fn scanned_len(&self, message_id: &str) -> usize {
        self.scanned.get(message_id).copied().unwrap_or(0)
    }

    pub fn record_scanned(&mut self, message_id: &str, len: usize) {
        self.scanned.insert(message_id.to_string(), len);
    }
}
