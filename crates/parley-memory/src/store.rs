use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

use parley_core::types::HistoryEntry;

use crate::db::init_db;
use crate::error::StoreError;
use crate::retry::with_retry;
use crate::types::ConversationRecord;

/// Conversation + checkpoint persistence.
///
/// Thread-safe: wraps the SQLite connection in a Mutex. Both the webhook
/// path and the poller hold an Arc to the same store; per-user writes are
/// rare enough that the coarse lock is never contended in practice.
pub struct ConversationStore {
    db: Mutex<Connection>,
}

impl ConversationStore {
    /// Wrap a connection, running schema migrations first.
    pub fn new(conn: Connection) -> Result<Self, StoreError> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// Load a conversation record, or `None` for an unknown user.
    pub fn load(&self, user_id: &str) -> Result<Option<ConversationRecord>, StoreError> {
        let db = self.db.lock().unwrap();
        let row: Option<(String, Option<String>)> = with_retry("conversation load", || {
            db.query_row(
                "SELECT history, summary FROM conversations WHERE user_id = ?1",
                [user_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
        })?;

        let Some((history_json, summary)) = row else {
            return Ok(None);
        };

        let history: Vec<HistoryEntry> = serde_json::from_str(&history_json)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        Ok(Some(ConversationRecord {
            user_id: user_id.to_string(),
            history,
            summary,
        }))
    }

    /// Load a record, creating an empty one for first-time users.
    /// The fresh record is not persisted until the first `save`.
    pub fn load_or_create(&self, user_id: &str) -> Result<ConversationRecord, StoreError> {
        match self.load(user_id)? {
            Some(record) => Ok(record),
            None => {
                debug!(user_id, "creating new conversation record");
                Ok(ConversationRecord::new(user_id))
            }
        }
    }

    /// Upsert a conversation record.
    pub fn save(&self, record: &ConversationRecord) -> Result<(), StoreError> {
        let history_json = serde_json::to_string(&record.history)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let now = chrono::Utc::now().to_rfc3339();

        let db = self.db.lock().unwrap();
        with_retry("conversation save", || {
            db.execute(
                "INSERT INTO conversations (user_id, history, summary, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(user_id) DO UPDATE SET
                     history = excluded.history,
                     summary = excluded.summary,
                     updated_at = excluded.updated_at",
                rusqlite::params![record.user_id, history_json, record.summary, now],
            )
        })?;
        Ok(())
    }

    /// Last message ID the poller has seen for a channel, if any.
    pub fn checkpoint(&self, channel_id: &str) -> Result<Option<String>, StoreError> {
        let db = self.db.lock().unwrap();
        let cursor = with_retry("checkpoint load", || {
            db.query_row(
                "SELECT last_seen_message_id FROM checkpoints WHERE channel_id = ?1",
                [channel_id],
                |row| row.get(0),
            )
            .optional()
        })?;
        Ok(cursor)
    }

    /// Move a channel's poll cursor forward to `message_id`.
    pub fn advance_checkpoint(&self, channel_id: &str, message_id: &str) -> Result<(), StoreError> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        with_retry("checkpoint advance", || {
            db.execute(
                "INSERT INTO checkpoints (channel_id, last_seen_message_id, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(channel_id) DO UPDATE SET
                     last_seen_message_id = excluded.last_seen_message_id,
                     updated_at = excluded.updated_at",
                rusqlite::params![channel_id, message_id, now],
            )
        })?;
        Ok(())
    }
}
