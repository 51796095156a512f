use anyhow::Result;
use lookalike_indexer::IndexerError;
use lookalike_search::SearchError;
use lookalike_vector_store::VectorStoreError;
use serde::Serialize;
use serde_json::Value;
use std::io::{self, Write};

/// Process exit code for rejected input.
pub const EXIT_INPUT: i32 = 2;
pub const EXIT_FAILURE: i32 = 1;

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    Error,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    pub retryable: bool,
    pub fatal: bool,
}

#[derive(Debug, Default, Serialize)]
pub struct Meta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,
    pub duration_ms: u64,
}

/// JSON document written to stdout for every command.
#[derive(Debug, Serialize)]
pub struct Response {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub data: Value,
    pub meta: Meta,
}

impl Response {
    pub fn ok(data: Value, meta: Meta) -> Self {
        Self {
            status: Status::Ok,
            error: None,
            data,
            meta,
        }
    }

    pub fn error(err: &anyhow::Error, meta: Meta) -> Self {
        Self {
            status: Status::Error,
            error: Some(classify(err)),
            data: Value::Null,
            meta,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match &self.error {
            None => 0,
            Some(body) if body.code == "input_error" => EXIT_INPUT,
            Some(_) => EXIT_FAILURE,
        }
    }
}

fn store_code(err: &VectorStoreError) -> &'static str {
    match err {
        VectorStoreError::EmbeddingError(_) => "embedding_failure",
        VectorStoreError::EmbeddingUnavailable { .. } => "embedding_unavailable",
        VectorStoreError::InvalidDimension { .. } => "dimension_mismatch",
        VectorStoreError::IndexUnavailable => "index_unavailable",
        VectorStoreError::IndexCorruption(_) => "index_corruption",
        VectorStoreError::IncompatibleArtifact { .. } => "incompatible_artifact",
        VectorStoreError::IoError(_) | VectorStoreError::SerializationError(_) => "io_error",
        VectorStoreError::Other(_) => "internal",
    }
}

/// Map an error chain onto a stable code plus retry/fatal flags.
pub fn classify(err: &anyhow::Error) -> ErrorBody {
    let mut code = "internal";
    let mut retryable = false;
    let mut fatal = false;
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<SearchError>() {
            retryable = e.is_retryable();
            fatal = e.is_fatal();
            code = match e {
                SearchError::InputError(_) => "input_error",
                SearchError::ImageFetch(_) => "image_fetch",
                SearchError::CatalogError(_) => "catalog_error",
                SearchError::VectorStoreError(inner) => store_code(inner),
                SearchError::Other(_) => "internal",
            };
            break;
        }
        if let Some(e) = cause.downcast_ref::<IndexerError>() {
            fatal = e.is_fatal();
            code = match e {
                IndexerError::EmptyBuild { .. } => "empty_build",
                IndexerError::InvalidConfig(_) => "input_error",
                IndexerError::CatalogError(_) => "catalog_error",
                IndexerError::VectorStoreError(inner) => {
                    retryable = inner.is_retryable();
                    store_code(inner)
                }
                IndexerError::IoError(_) => "io_error",
                IndexerError::Other(_) => "internal",
            };
            break;
        }
        if let Some(e) = cause.downcast_ref::<VectorStoreError>() {
            retryable = e.is_retryable();
            fatal = e.is_fatal();
            code = store_code(e);
            break;
        }
        if cause.downcast_ref::<lookalike_catalog::CatalogError>().is_some() {
            code = "catalog_error";
            break;
        }
    }
    ErrorBody {
        code,
        message: format!("{err:#}"),
        retryable,
        fatal,
    }
}

pub fn print_stdout(text: &str) -> Result<()> {
    let mut stdout = io::stdout().lock();
    if let Err(err) = stdout
        .write_all(text.as_bytes())
        .and_then(|()| stdout.write_all(b"\n"))
        .and_then(|()| stdout.flush())
    {
        if err.kind() == io::ErrorKind::BrokenPipe {
            return Ok(());
        }
        return Err(err.into());
    }
    Ok(())
}
