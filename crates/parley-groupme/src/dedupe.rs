//! In-process dedupe between the webhook path and the poller.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

/// Ledger entries are evicted FIFO past this size.
const MAX_LEDGER_ENTRIES: usize = 512;

/// Bounded set of message IDs that have already been answered.
///
/// The webhook handler marks every message it replies to; the poller checks
/// the ledger before replying, so webhook-handled messages only move the
/// cursor. The checkpoint itself is mutated by the poller alone, which keeps
/// it contiguous: a message whose webhook delivery was lost stays ahead of
/// the cursor until the poller picks it up. In-memory only — after a restart
/// the poller may double-reply (at-least-once), it never skips a message.
pub struct MessageLedger {
    inner: Mutex<LedgerInner>,
    capacity: usize,
}

struct LedgerInner {
    seen: HashSet<String>,
    order: VecDeque<String>,
}

impl MessageLedger {
    pub fn new() -> Self {
        Self::with_capacity(MAX_LEDGER_ENTRIES)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LedgerInner {
                seen: HashSet::new(),
                order: VecDeque::new(),
            }),
            capacity,
        }
    }

    /// Record a message ID. Returns `false` when it was already present.
    pub fn mark(&self, message_id: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.seen.contains(message_id) {
            return false;
        }
        if inner.order.len() >= self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.seen.remove(&oldest);
            }
        }
        inner.seen.insert(message_id.to_string());
        inner.order.push_back(message_id.to_string());
        true
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.inner.lock().unwrap().seen.contains(message_id)
    }
}

impl Default for MessageLedger {
    fn default() -> Self {
        Self::new()
    }
}
