use thiserror::Error;

pub type Result<T> = std::result::Result<T, VectorStoreError>;

#[derive(Error, Debug)]
pub enum VectorStoreError {
    #[error("Embedding error: {0}")]
    EmbeddingError(String),

    #[error("Embedding backend unavailable after {attempts} attempt(s): {last_error}")]
    EmbeddingUnavailable { attempts: usize, last_error: String },

    #[error("Invalid vector dimension for {context}: expected {expected}, got {actual}")]
    InvalidDimension {
        context: String,
        expected: usize,
        actual: usize,
    },

    #[error("No index has been published yet")]
    IndexUnavailable,

    #[error("Index corruption: {0}")]
    IndexCorruption(String),

    #[error("Incompatible index artifact {path}: {reason}")]
    IncompatibleArtifact { path: String, reason: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl VectorStoreError {
    pub(crate) fn dimension(context: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::InvalidDimension {
            context: context.into(),
            expected,
            actual,
        }
    }

    /// Transient conditions a caller may retry later.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::EmbeddingUnavailable { .. } | Self::IndexUnavailable)
    }

    /// Build or version defects that must never be masked.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidDimension { .. } | Self::IndexCorruption(_)
        )
    }
}
