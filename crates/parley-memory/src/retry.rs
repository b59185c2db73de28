use std::time::Duration;

use rusqlite::ErrorCode;
use tracing::warn;

const MAX_ATTEMPTS: u32 = 3;
const BASE_DELAY_MS: u64 = 50;

/// Run a database operation with bounded retry and exponential backoff.
///
/// Only busy/locked errors are retried — those are the transient failures
/// SQLite surfaces under WAL when another handle holds the write lock.
/// Everything else (constraint violations, corruption) fails immediately.
pub(crate) fn with_retry<T>(
    what: &str,
    mut op: impl FnMut() -> rusqlite::Result<T>,
) -> rusqlite::Result<T> {
    let mut attempt = 0u32;
    loop {
        match op() {
            Err(e) if attempt + 1 < MAX_ATTEMPTS && is_transient(&e) => {
                attempt += 1;
                let delay = BASE_DELAY_MS << (attempt - 1);
                warn!(%what, attempt, delay_ms = delay, error = %e, "transient db error, retrying");
                std::thread::sleep(Duration::from_millis(delay));
            }
            other => return other,
        }
    }
}

fn is_transient(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}
