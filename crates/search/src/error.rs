use lookalike_catalog::CatalogError;
use lookalike_vector_store::VectorStoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SearchError>;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Invalid search request: {0}")]
    InputError(String),

    #[error("Vector store error: {0}")]
    VectorStoreError(#[from] VectorStoreError),

    #[error("Catalog error: {0}")]
    CatalogError(#[from] CatalogError),

    #[error("Query image unavailable: {0}")]
    ImageFetch(#[source] CatalogError),

    #[error("{0}")]
    Other(String),
}

impl SearchError {
    pub(crate) fn input(message: impl Into<String>) -> Self {
        Self::InputError(message.into())
    }

    /// Index corruption or dimension skew.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::VectorStoreError(err) => err.is_fatal(),
            _ => false,
        }
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::VectorStoreError(err) => err.is_retryable(),
            _ => false,
        }
    }

    #[must_use]
    pub const fn is_input_error(&self) -> bool {
        matches!(self, Self::InputError(_))
    }
}
