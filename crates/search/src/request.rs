use crate::engine::{search_in, validate_k, PartialResolution, QueryEngine, ResolvedResult};
use crate::{Result, SearchError};
use lookalike_catalog::{ImageResolver, ImageSource};
use lookalike_vector_store::JointEmbedder;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

pub const DEFAULT_K: usize = 5;

/// A similarity query: an image, optionally refined by a text phrase.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub image: Option<ImageSource>,
    pub text: Option<String>,
    pub k: usize,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            image: None,
            text: None,
            k: DEFAULT_K,
        }
    }
}

impl SearchRequest {
    #[must_use]
    pub fn new(image: ImageSource) -> Self {
        Self {
            image: Some(image),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    #[must_use]
    pub const fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    /// Reject the request before any image fetch, embedding, or index work.
    pub fn validate(&self) -> Result<&ImageSource> {
        validate_k(self.k)?;
        let has_text = self.text.as_deref().is_some_and(|t| !t.trim().is_empty());
        let Some(image) = &self.image else {
            return Err(SearchError::input(if has_text {
                "an image is required; text alone cannot be searched"
            } else {
                "neither image nor text was provided"
            }));
        };
        let empty = match image {
            ImageSource::Url(url) => url.trim().is_empty(),
            ImageSource::Path(path) => path.as_os_str().is_empty(),
            ImageSource::Bytes(bytes) => bytes.is_empty(),
        };
        if empty {
            return Err(SearchError::input("image reference is empty"));
        }
        Ok(image)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SearchTimings {
    pub fetch_ms: u64,
    pub embed_ms: u64,
    pub search_ms: u64,
    pub resolve_ms: u64,
    pub total_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub build_id: String,
    pub results: Vec<ResolvedResult>,
    pub warnings: Vec<PartialResolution>,
    pub timings: SearchTimings,
}

/// End-to-end product lookup: fetch the query image, embed it alongside the
/// optional text, search, and join with the catalog.
pub struct ProductSearch {
    engine: QueryEngine,
    embedder: JointEmbedder,
    images: Arc<dyn ImageResolver>,
}

impl ProductSearch {
    pub fn new(engine: QueryEngine, embedder: JointEmbedder, images: Arc<dyn ImageResolver>) -> Self {
        Self {
            engine,
            embedder,
            images,
        }
    }

    #[must_use]
    pub const fn engine(&self) -> &QueryEngine {
        &self.engine
    }

    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        let started = Instant::now();
        let image = request.validate()?;
        // Pin before embedding so a missing index fails without model work.
        let snapshot = self.engine.store().current()?;

        let bytes = self
            .images
            .resolve(image)
            .await
            .map_err(SearchError::ImageFetch)?;
        let fetched = Instant::now();

        let query = self
            .embedder
            .embed(request.text.as_deref(), Some(&bytes))
            .await?;
        let embedded = Instant::now();

        let hits = search_in(&snapshot, &query, request.k)?;
        let searched = Instant::now();

        let resolved = self.engine.resolve(hits).await?;
        let finished = Instant::now();

        let timings = SearchTimings {
            fetch_ms: millis(fetched - started),
            embed_ms: millis(embedded - fetched),
            search_ms: millis(searched - embedded),
            resolve_ms: millis(finished - searched),
            total_ms: millis(finished - started),
        };
        log::debug!(
            "Search for {} returned {} result(s), {} unresolved, in {}ms",
            image.describe(),
            resolved.results.len(),
            resolved.unresolved.len(),
            timings.total_ms
        );
        Ok(SearchResponse {
            build_id: snapshot.build_id().to_string(),
            results: resolved.results,
            warnings: resolved.unresolved,
            timings,
        })
    }
}

fn millis(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_k_matches_constant() {
        assert_eq!(SearchRequest::default().k, DEFAULT_K);
    }

    #[test]
    fn missing_image_is_rejected() {
        let err = SearchRequest::default().validate().unwrap_err();
        assert!(err.to_string().contains("neither image nor text"), "{err}");

        let err = SearchRequest::default()
            .with_text("red dress")
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("image is required"), "{err}");
    }

    #[test]
    fn empty_references_and_zero_k_are_rejected() {
        let blank = SearchRequest::new(ImageSource::from_reference("  "));
        assert!(blank.validate().unwrap_err().is_input_error());

        let no_bytes = SearchRequest::new(ImageSource::Bytes(Vec::new()));
        assert!(no_bytes.validate().unwrap_err().is_input_error());

        let zero = SearchRequest::new(ImageSource::from_reference("a.jpg")).with_k(0);
        assert!(zero.validate().unwrap_err().is_input_error());
    }

    #[test]
    fn text_is_optional() {
        let request = SearchRequest::new(ImageSource::from_reference("https://cdn/x.jpg"));
        assert!(request.validate().is_ok());
    }
}
