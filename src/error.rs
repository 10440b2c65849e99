use thiserror::Error;

/// Main error type for termdex operations
#[derive(Error, Debug)]
pub enum TermdexError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Missing proximity data: {0}")]
    MissingProximityData(String),

    #[error("Codec overflow: {0}")]
    CodecOverflow(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for termdex operations
pub type Result<T> = std::result::Result<T, TermdexError>;

impl TermdexError {
    /// Wrap a storage engine error.
    pub fn storage(err: impl std::fmt::Display) -> Self {
        TermdexError::Storage(err.to_string())
    }

    /// Errors a caller may recover from locally as an empty match.
    pub fn recovers_to_empty(&self) -> bool {
        matches!(self, TermdexError::NotFound(_))
    }

    /// Errors that abort the surrounding commit or query.
    pub fn is_fatal(&self) -> bool {
        !self.recovers_to_empty()
    }
}
