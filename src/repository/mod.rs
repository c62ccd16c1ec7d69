//! Repository layer for database persistence.
//!
//! Every repository owns the database path and opens short-lived connections
//! per operation; SQLite in WAL mode handles the cross-process concurrency.

mod content;
mod event;
mod feed;
mod task;

pub use content::ContentRepository;
pub use event::{EventLogRepository, EventRecord};
pub use feed::{FeedRepository, FeedSubscription};
pub use task::{TaskFilter, TaskRepository};

use std::path::Path;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Encode a timestamp for storage.
///
/// Fixed microsecond precision with a `Z` suffix keeps lexicographic SQL
/// comparison identical to chronological comparison.
pub fn encode_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp, defaulting to the Unix epoch on bad data.
pub fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Parse an optional stored timestamp.
pub fn parse_timestamp_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}

/// Create a database connection with settings tuned for concurrent workers.
pub fn connect(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;

    // WAL mode allows multiple readers alongside one writer; the setting
    // persists, so this is effectively one-time per database file.
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 30000;
        PRAGMA cache_size = -32000;
        PRAGMA temp_store = MEMORY;
    "#,
    )?;

    Ok(conn)
}

/// Create every table the pipeline needs.
pub fn init_all(db_path: &Path) -> Result<()> {
    ContentRepository::new(db_path)?;
    TaskRepository::new(db_path)?;
    EventLogRepository::new(db_path)?;
    FeedRepository::new(db_path)?;
    Ok(())
}

/// Execute a database operation with retry on lock contention.
///
/// Retries up to 5 times with exponential backoff starting at 100ms.
pub fn with_retry<T, F>(mut operation: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    const MAX_ATTEMPTS: u32 = 5;
    let mut delay_ms = 100;

    for attempt in 0..MAX_ATTEMPTS {
        match operation() {
            Ok(result) => return Ok(result),
            Err(RepositoryError::Database(ref e)) if is_lock_error(e) => {
                if attempt + 1 == MAX_ATTEMPTS {
                    return operation();
                }
                tracing::debug!(
                    delay_ms,
                    attempt = attempt + 1,
                    "database locked, retrying"
                );
                thread::sleep(Duration::from_millis(delay_ms));
                delay_ms *= 2;
            }
            Err(e) => return Err(e),
        }
    }

    operation()
}

fn is_lock_error(e: &rusqlite::Error) -> bool {
    let text = e.to_string();
    text.contains("database is locked")
        || text.contains("SQLITE_BUSY")
        || text.contains("SQLITE_LOCKED")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_sort_lexicographically() {
        let earlier = Utc::now();
        let later = earlier + chrono::Duration::milliseconds(1);
        assert!(encode_timestamp(earlier) < encode_timestamp(later));
    }

    #[test]
    fn timestamp_round_trip_preserves_micros() {
        let now = Utc::now();
        let parsed = parse_timestamp(&encode_timestamp(now));
        assert_eq!(parsed.timestamp_micros(), now.timestamp_micros());
    }

    #[test]
    fn bad_timestamp_defaults_to_epoch() {
        assert_eq!(parse_timestamp("garbage"), DateTime::UNIX_EPOCH);
        assert_eq!(parse_timestamp_opt(Some("garbage".into())), None);
        assert_eq!(parse_timestamp_opt(None), None);
    }

    #[test]
    fn with_retry_returns_first_success() {
        let mut calls = 0;
        let result = with_retry(|| {
            calls += 1;
            Ok(42)
        })
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls, 1);
    }

    #[test]
    fn with_retry_passes_through_non_lock_errors() {
        let mut calls = 0;
        let result: Result<()> = with_retry(|| {
            calls += 1;
            Err(RepositoryError::NotFound("missing row".into()))
        });
        assert!(matches!(result, Err(RepositoryError::NotFound(_))));
        assert_eq!(calls, 1);
    }
}
