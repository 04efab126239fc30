//! Error types for the ledger mutation engine

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {

    // =============================
    // Recoverable executor errors
    // =============================
    //
    // These four never propagate out of the dispatcher: they are
    // converted into clarifying or refusal message fragments.

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Integrity error: {0}")]
    Integrity(String),

    // =============================
    // Infrastructure errors
    // =============================

    #[error("Database error: {0}")]
    Database(String),

    #[error("Intent producer error: {0}")]
    Producer(String),

    #[error("External sync failure: {0}")]
    ExternalSync(String),

    // =============================
    // External library conversions
    // =============================

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Whether the dispatcher may recover this error into a user-facing
    /// message fragment instead of failing the whole message.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::Validation(_)
                | EngineError::NotFound(_)
                | EngineError::Conflict(_)
                | EngineError::Integrity(_)
        )
    }

    /// The bare user-facing message for recoverable errors. The
    /// recoverable variants carry text written for the end user; the
    /// infrastructure variants do not.
    pub fn user_message(&self) -> Option<&str> {
        match self {
            EngineError::Validation(msg)
            | EngineError::NotFound(msg)
            | EngineError::Conflict(msg)
            | EngineError::Integrity(msg) => Some(msg),
            _ => None,
        }
    }
}
