//! Error types for spyglass

use thiserror::Error;

/// Result type alias for spyglass operations
pub type Result<T> = std::result::Result<T, SpyglassError>;

/// Unified error type for all spyglass operations
#[derive(Error, Debug, Clone)]
pub enum SpyglassError {
    /// Operator-visible precondition failure (e.g. multi-worker server in
    /// full-process mode, or a second full-process activation). The
    /// triggering action is aborted and no state is changed.
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// A server-side logging parameter was rejected (insufficient privilege,
    /// unknown parameter). Names the offending parameter and its cause so
    /// the operator can fix the configuration.
    #[error("Cannot change parameter '{name}': {cause}\nDisable query logging or re-enable it to read the setup instructions")]
    Parameter { name: String, cause: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(String),

    /// External log-analyzer failure. Always downgraded to a recorded
    /// diagnostic by callers on the dump path.
    #[error("Log analyzer error: {0}")]
    Analyzer(String),
}

impl SpyglassError {
    /// Returns true if this error indicates an operator misconfiguration
    /// that must be surfaced synchronously rather than logged and swallowed.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            SpyglassError::Precondition(_)
                | SpyglassError::Parameter { .. }
                | SpyglassError::InvalidState(_)
        )
    }

    /// Returns true if this error belongs to a best-effort path and may be
    /// deliberately ignored after logging.
    pub fn is_best_effort(&self) -> bool {
        matches!(self, SpyglassError::Analyzer(_))
    }
}

impl From<serde_json::Error> for SpyglassError {
    fn from(err: serde_json::Error) -> Self {
        SpyglassError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for SpyglassError {
    fn from(err: std::io::Error) -> Self {
        SpyglassError::Io(err.to_string())
    }
}

// PostgreSQL-specific error conversions (when postgres-errors feature is enabled)
#[cfg(feature = "postgres-errors")]
impl From<sqlx::Error> for SpyglassError {
    fn from(err: sqlx::Error) -> Self {
        use sqlx::Error;
        match &err {
            Error::Configuration(_) => SpyglassError::Connection(err.to_string()),
            Error::Io(_) => SpyglassError::Connection(err.to_string()),
            Error::Tls(_) => SpyglassError::Connection(err.to_string()),
            Error::Protocol(_) => SpyglassError::Connection(err.to_string()),
            Error::PoolTimedOut => {
                SpyglassError::Connection("Connection pool timed out".to_string())
            }
            Error::PoolClosed => SpyglassError::Connection("Connection pool closed".to_string()),
            Error::RowNotFound => SpyglassError::Database("Row not found".to_string()),
            _ => SpyglassError::Database(err.to_string()),
        }
    }
}
