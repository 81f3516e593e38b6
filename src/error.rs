// error.rs - Centralized error handling using thiserror

/// Crate-wide Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the cache and sync engine
///
/// Uses thiserror for ergonomic error handling and automatic Display impl.
/// `NotFound` is a recoverable signal, distinct from I/O failure, and is
/// never logged.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Whether this error is the remote's rate-limit signal.
    ///
    /// The remote surfaces rate limiting inconsistently across endpoints, so
    /// recognition is by message substring rather than a structured code.
    pub fn is_rate_limited(&self) -> bool {
        let msg = self.to_string();
        msg.contains("RATELIMITED")
            || msg.contains("Rate limit exceeded")
            || msg.contains("rate limit")
    }

    /// Whether this error indicates the on-disk schema no longer matches the
    /// code. Only meaningful during the initial open probe.
    pub fn is_schema_mismatch(&self) -> bool {
        let msg = self.to_string();
        msg.contains("no such column")
            || msg.contains("no such table")
            || msg.contains("SQL logic error")
    }
}

// Implement conversions from common error types
impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Network(err.to_string())
    }
}
