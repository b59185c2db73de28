use parley_core::types::HistoryEntry;
use serde::{Deserialize, Serialize};

/// Per-user conversation state: bounded history plus a rolling summary.
///
/// Summary, once non-empty, is never cleared — only replaced by the
/// summarizer with a newer digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub user_id: String,
    pub history: Vec<HistoryEntry>,
    pub summary: Option<String>,
}

impl ConversationRecord {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            history: Vec::new(),
            summary: None,
        }
    }
}
