//! Error types for the buffer and workspace index.

use thiserror::Error;

/// Convenience result alias.
pub type Result<T> = std::result::Result<T, EventsError>;

/// Errors from the workspace index and buffer plumbing.
#[derive(Debug, Error)]
pub enum EventsError {
    /// SQLite-level failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool exhausted or broken.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Invariant violation or corrupt stored data.
    #[error("internal error: {0}")]
    Internal(String),
}
