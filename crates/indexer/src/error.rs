use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexerError>;

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Catalog error: {0}")]
    CatalogError(#[from] lookalike_catalog::CatalogError),

    #[error("Vector store error: {0}")]
    VectorStoreError(#[from] lookalike_vector_store::VectorStoreError),

    #[error("Nothing to index: {attempted} item(s) attempted, {skipped} skipped")]
    EmptyBuild { attempted: usize, skipped: usize },

    #[error("Invalid build configuration: {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Dimension skew or corruption surfaced while building.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::VectorStoreError(err) => err.is_fatal(),
            _ => false,
        }
    }
}
