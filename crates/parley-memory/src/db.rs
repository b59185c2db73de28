use rusqlite::{Connection, Result};

/// Initialise conversation tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    create_conversations_table(conn)?;
    create_checkpoints_table(conn)?;
    Ok(())
}

/// One row per user. `history` is a JSON array of {role, text, timestamp}
/// entries, bounded by the pipeline; `summary` is the rolling AI-compressed
/// digest of everything older than the retained history.
fn create_conversations_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS conversations (
            user_id     TEXT PRIMARY KEY,
            history     TEXT NOT NULL,
            summary     TEXT,
            updated_at  TEXT NOT NULL
        );",
    )
}

/// Poll cursor per channel — the last message ID the poller has seen.
fn create_checkpoints_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS checkpoints (
            channel_id            TEXT PRIMARY KEY,
            last_seen_message_id  TEXT NOT NULL,
            updated_at            TEXT NOT NULL
        );",
    )
}
