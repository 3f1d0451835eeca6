//! Unified error types for roomwatch.
//!
//! Every variant renders with an upper-case code prefix so log lines and
//! summaries can be grepped by failure class.

use tokio_rusqlite::rusqlite;

/// Unified error types for the crawl, merge and persistence pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input parameters (e.g., zero batch size, empty search URL).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// URL could not be parsed or uses an unsupported scheme.
    #[error("INVALID_URL: {0}")]
    InvalidUrl(String),

    /// Listing carries neither a source id nor a usable link.
    #[error("MISSING_IDENTITY: {0}")]
    MissingIdentity(String),

    /// Database operation failed.
    #[error("DB_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("DB_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// A batch transaction exceeded its wall-clock budget.
    #[error("TX_TIMEOUT: {0}")]
    TransactionTimeout(String),

    /// JSON column could not be encoded or decoded.
    #[error("SERIALIZATION: {0}")]
    Serialization(String),

    /// HTTP error response.
    #[error("HTTP_ERROR: {0}")]
    HttpError(String),

    /// Upstream answered 429 on every attempt.
    #[error("RATE_LIMITED: {0}")]
    RateLimited(String),

    /// Fetch failed after retries were exhausted.
    #[error("FETCH_FAILED: {0}")]
    FetchFailed(String),
}

impl Error {
    /// True when no write can succeed: the connection is gone, or the database
    /// is full, read-only or cannot be opened.
    pub fn is_backend_unavailable(&self) -> bool {
        match self {
            Error::Database(tokio_rusqlite::Error::ConnectionClosed) => true,
            Error::Database(tokio_rusqlite::Error::Error(rusqlite::Error::SqliteFailure(e, _))) => matches!(
                e.code,
                rusqlite::ErrorCode::DiskFull | rusqlite::ErrorCode::ReadOnly | rusqlite::ErrorCode::CannotOpen
            ),
            _ => false,
        }
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
