use crate::error::{CatalogError, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Where an image comes from: a catalog reference or an uploaded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Url(String),
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl ImageSource {
    /// Interpret a catalog image reference. `http(s)://` is a URL, anything else a
    /// filesystem path.
    #[must_use]
    pub fn from_reference(reference: &str) -> Self {
        let trimmed = reference.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            Self::Url(trimmed.to_string())
        } else {
            Self::Path(PathBuf::from(trimmed))
        }
    }

    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Url(url) => url.clone(),
            Self::Path(path) => path.display().to_string(),
            Self::Bytes(bytes) => format!("<bytes:{}>", bytes.len()),
        }
    }
}

/// Turns an [`ImageSource`] into raw image bytes.
#[async_trait]
pub trait ImageResolver: Send + Sync {
    async fn resolve(&self, source: &ImageSource) -> Result<Vec<u8>>;
}

/// Resolves URLs over HTTP(S) and paths from the local filesystem. Relative paths
/// are taken relative to `base_dir` when one is set.
#[derive(Debug, Clone)]
pub struct DefaultImageResolver {
    client: Client,
    base_dir: Option<PathBuf>,
}

impl DefaultImageResolver {
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_FETCH_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CatalogError::Other(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_dir: None,
        })
    }

    #[must_use]
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(base_dir.into());
        self
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    async fn fetch_url(&self, url: &str) -> Result<Vec<u8>> {
        let fetch_error = |reason: String| CatalogError::FetchError {
            reference: url.to_string(),
            reason,
        };
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(fetch_error(format!("HTTP {status}")));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ImageResolver for DefaultImageResolver {
    async fn resolve(&self, source: &ImageSource) -> Result<Vec<u8>> {
        let bytes = match source {
            ImageSource::Bytes(bytes) => bytes.clone(),
            ImageSource::Url(url) => self.fetch_url(url).await?,
            ImageSource::Path(path) => {
                let resolved = self.resolve_path(path);
                tokio::fs::read(&resolved)
                    .await
                    .map_err(|e| CatalogError::FetchError {
                        reference: resolved.display().to_string(),
                        reason: e.to_string(),
                    })?
            }
        };

        if bytes.is_empty() {
            return Err(CatalogError::FetchError {
                reference: source.describe(),
                reason: "empty image payload".to_string(),
            });
        }
        log::debug!("Resolved image {} ({} bytes)", source.describe(), bytes.len());
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn reference_kinds() {
        assert_eq!(
            ImageSource::from_reference(" https://cdn/x.jpg "),
            ImageSource::Url("https://cdn/x.jpg".to_string())
        );
        assert_eq!(
            ImageSource::from_reference("images/x.jpg"),
            ImageSource::Path(PathBuf::from("images/x.jpg"))
        );
    }

    #[tokio::test]
    async fn resolves_relative_paths_against_base_dir() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.jpg"), b"jpeg").unwrap();

        let resolver = DefaultImageResolver::new()
            .unwrap()
            .with_base_dir(tmp.path());
        let bytes = resolver
            .resolve(&ImageSource::from_reference("a.jpg"))
            .await
            .unwrap();
        assert_eq!(bytes, b"jpeg");
    }

    #[tokio::test]
    async fn missing_file_and_empty_payload_are_fetch_errors() {
        let resolver = DefaultImageResolver::new().unwrap();
        let err = resolver
            .resolve(&ImageSource::Path(PathBuf::from("/definitely/not/here.jpg")))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::FetchError { .. }));

        let err = resolver
            .resolve(&ImageSource::Bytes(Vec::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::FetchError { .. }));
    }
}
