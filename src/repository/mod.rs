//! Repository layer for database persistence.
//!
//! SQLite via `rusqlite`, one file, WAL mode. Each entity gets its own
//! repository struct with an `init_schema` run at construction, following
//! the teacher's `SourceRepository`/`CrawlRepository` shape.

mod album;
pub mod duration;
mod sync;

pub use album::AlbumRepository;
pub use duration::DurationRepository;
pub use sync::{SyncLogRepository, SyncProgressRepository};

use std::path::Path;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use thiserror::Error;

/// Parse a datetime string from the database, defaulting to Unix epoch on error.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Parse an optional datetime string from the database.
pub fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}

/// Convert a rusqlite Result<T> to Result<Option<T>>, treating QueryReturnedNoRows as None.
pub fn to_option<T>(result: rusqlite::Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Open a connection with concurrency-friendly pragmas.
pub fn connect(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;

    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 30000;
    "#,
    )?;

    Ok(conn)
}

/// Execute a database operation with linear-backoff retry on lock errors.
///
/// Retries up to 3 times with delay `(attempt + 1) * 500ms`, per spec §4.5
/// "Database lock retries".
pub fn with_retry<T, F>(mut operation: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    const MAX_RETRIES: u32 = 3;

    for attempt in 0..MAX_RETRIES {
        match operation() {
            Ok(result) => return Ok(result),
            Err(RepositoryError::Database(e)) => {
                let msg = e.to_string();
                let is_lock_error = msg.contains("database is locked")
                    || msg.contains("SQLITE_BUSY")
                    || msg.contains("SQLITE_LOCKED");

                if is_lock_error && attempt + 1 < MAX_RETRIES {
                    let delay = Duration::from_millis(u64::from(attempt + 1) * 500);
                    tracing::debug!(
                        "database locked, retrying in {:?} (attempt {}/{})",
                        delay,
                        attempt + 1,
                        MAX_RETRIES
                    );
                    thread::sleep(delay);
                    continue;
                }
                return Err(RepositoryError::Database(e));
            }
            Err(e) => return Err(e),
        }
    }

    operation()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_datetime_invalid_defaults_to_epoch() {
        assert_eq!(parse_datetime("not a date"), DateTime::UNIX_EPOCH);
    }

    #[test]
    fn test_parse_datetime_opt_none() {
        assert_eq!(parse_datetime_opt(None), None);
    }

    #[test]
    fn test_with_retry_succeeds_first_try() {
        let mut calls = 0;
        let result: Result<i32> = with_retry(|| {
            calls += 1;
            Ok(42)
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_with_retry_gives_up_on_non_lock_error() {
        let mut calls = 0;
        let result: Result<i32> = with_retry(|| {
            calls += 1;
            Err(RepositoryError::NotFound("x".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
