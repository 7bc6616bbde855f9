//! Crate-wide error taxonomy.
//!
//! Core engine code (rate limiter, state manager, workers) returns this typed
//! error so worker loops can match on error *kind* (see spec §7); handler and
//! CLI glue upgrades it to `anyhow::Error` at the boundary.

use thiserror::Error;

use crate::repository::RepositoryError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("rate limited, retry after {retry_after_s}s")]
    RateLimited { retry_after_s: u64 },

    #[error("provider returned HTTP {status}: {body}")]
    ProviderHttp { status: u16, body: String },

    #[error("pagination exhausted")]
    ProviderPaginationEnd,

    #[error("database lock timeout after {attempts} attempts")]
    LockTimeout { attempts: u32 },

    #[error("track fetch failed: {0}")]
    TrackFetchFailed(String),

    #[error("operation cancelled")]
    ContextCancelled,

    #[error("no consensus reached")]
    NoConsensus,

    #[error("no results from any provider")]
    NoResults,

    #[error("illegal state transition")]
    InvalidState,

    #[error("database error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Whether this error represents a transient database lock, retryable
    /// with linear backoff per §4.5 "Database lock retries".
    pub fn is_lock_error(&self) -> bool {
        match self {
            AppError::Repository(RepositoryError::Database(e)) => {
                let msg = e.to_string();
                msg.contains("database is locked")
                    || msg.contains("SQLITE_BUSY")
                    || msg.contains("SQLITE_LOCKED")
                    || msg.contains("deadlock")
                    || msg.contains("try restarting transaction")
            }
            _ => false,
        }
    }
}
