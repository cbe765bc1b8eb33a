//! canary-reader
//!
//! Backend query boundary for the canary comparator.
//!
//! The comparator only needs two questions answered by the log backend:
//! "which of my entries did you store between `start` and `end`" and "how many
//! of my entries match this window". [`QueryReader`] is that contract;
//! [`LokiReader`] answers it over Loki's HTTP query API.

mod loki;

use std::fmt;

use chrono::{DateTime, Utc};

pub use loki::LokiReader;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors a [`QueryReader`] implementation may return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderError {
    /// Network or transport failure.
    Transport(String),
    /// The backend answered with a non-success status.
    Api { status: u16, message: String },
    /// A response payload (or one of its log lines) could not be decoded.
    Decode(String),
    /// The reader itself is misconfigured (e.g. an unusable base URL).
    Config(String),
}

impl fmt::Display for ReaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReaderError::Transport(msg) => write!(f, "transport error: {msg}"),
            ReaderError::Api { status, message } => {
                write!(f, "backend api error status={status}: {message}")
            }
            ReaderError::Decode(msg) => write!(f, "decode error: {msg}"),
            ReaderError::Config(msg) => write!(f, "config error: {msg}"),
        }
    }
}

impl std::error::Error for ReaderError {}

// ---------------------------------------------------------------------------
// Reader trait
// ---------------------------------------------------------------------------

/// Independent query path into the log backend.
///
/// Implementations must be `Send + Sync`: the comparator shares one reader
/// between its loop and every detached verification task.
#[async_trait::async_trait]
pub trait QueryReader: Send + Sync {
    /// Timestamps of the canary entries the backend stored in `[start, end]`.
    ///
    /// Order is whatever the backend returns; callers only test membership.
    async fn query(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, ReaderError>;

    /// Aggregate count of canary entries over `range` (e.g. `"24h"`).
    async fn query_count_over_time(&self, range: &str) -> Result<f64, ReaderError>;
}
