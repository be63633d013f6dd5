use loctable::GuardError;
use thiserror::Error;

/// Error types for generation, storage and the pipeline
#[derive(Debug, Error)]
pub enum MtError {
    /// Generator could not be reached or is overloaded (retryable)
    #[error("Generator unavailable: {0}")]
    GeneratorUnavailable(String),
    /// Generator did not answer in time (retryable)
    #[error("Generator timed out after {0} seconds")]
    GeneratorTimeout(u64),
    /// Generator answered but the answer is unusable
    #[error("Translation error: {0}")]
    Translation(String),
    /// Bad configuration or credentials
    #[error("Configuration error: {0}")]
    Config(String),
    /// Transport failure talking to a remote provider (retryable)
    #[error("Network error: {0}")]
    Network(String),
    #[error("Invalid locale: {0}")]
    InvalidLocale(String),
    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),
    /// The store's connection thread is gone
    #[error("Database connection error: {0}")]
    Database(#[from] tokio_rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// An approval would silently replace a pinned translation
    #[error("Approved translation for segment '{segment_id}' ({locale}) is pinned")]
    PinnedTranslation { segment_id: String, locale: String },
    #[error(transparent)]
    Guard(#[from] GuardError),
    /// The pipeline was cancelled before the call started
    #[error("Cancelled")]
    Cancelled,
}

impl MtError {
    /// Whether a single retry may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MtError::GeneratorUnavailable(_) | MtError::GeneratorTimeout(_) | MtError::Network(_)
        )
    }
}

/// Result type for MT operations
pub type MtResult<T> = Result<T, MtError>;
