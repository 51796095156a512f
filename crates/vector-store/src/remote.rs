use crate::embeddings::{ensure_dimension, EmbeddingProvider};
use crate::error::{Result, VectorStoreError};
use crate::types::Modality;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const OUTPUT_NAME: &str = "embedding";
/// Upper bound on retries after the first attempt.
pub const MAX_REMOTE_RETRIES: usize = 5;
pub const MAX_RETRY_BACKOFF_MS: u64 = 10_000;

/// Connection settings for a KServe v2 (Triton) inference endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub url: String,
    pub text_model: String,
    pub image_model: String,
    pub model_version: Option<String>,
    pub timeout_ms: u64,
    pub max_retries: usize,
    pub retry_backoff_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8000".to_string(),
            text_model: "text_encoder".to_string(),
            image_model: "image_encoder".to_string(),
            model_version: None,
            timeout_ms: 10_000,
            max_retries: 2,
            retry_backoff_ms: 250,
        }
    }
}

#[derive(Debug, Serialize)]
struct InferRequest<'a> {
    inputs: [InferInput<'a>; 1],
    outputs: [RequestedOutput; 1],
}

#[derive(Debug, Serialize)]
struct InferInput<'a> {
    name: &'static str,
    shape: [usize; 1],
    datatype: &'static str,
    data: [&'a str; 1],
}

#[derive(Debug, Serialize)]
struct RequestedOutput {
    name: &'static str,
}

#[derive(Debug, Deserialize)]
struct InferResponse {
    outputs: Vec<InferOutput>,
}

#[derive(Debug, Deserialize)]
struct InferOutput {
    name: String,
    #[serde(default)]
    data: Vec<f32>,
}

enum Attempt {
    Transient(String),
    Fatal(VectorStoreError),
}

/// Embedding backend calling a remote inference service. Transport failures,
/// timeouts and 5xx responses are retried with linear backoff; client errors and
/// malformed outputs are not.
pub struct RemoteEmbedder {
    client: Client,
    base_url: String,
    text_model: String,
    image_model: String,
    model_version: Option<String>,
    max_retries: usize,
    retry_backoff: Duration,
    text_dimension: usize,
    image_dimension: usize,
}

impl RemoteEmbedder {
    pub fn new(config: &RemoteConfig, text_dimension: usize, image_dimension: usize) -> Result<Self> {
        let base_url = config.url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(VectorStoreError::EmbeddingError(
                "remote embedding url is empty".to_string(),
            ));
        }
        let max_retries = config.max_retries.min(MAX_REMOTE_RETRIES);
        if max_retries < config.max_retries {
            log::warn!(
                "Remote max_retries {} capped to {MAX_REMOTE_RETRIES}",
                config.max_retries
            );
        }
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms.max(1)))
            .build()
            .map_err(|e| VectorStoreError::EmbeddingError(format!("HTTP client setup failed: {e}")))?;
        Ok(Self {
            client,
            base_url,
            text_model: config.text_model.clone(),
            image_model: config.image_model.clone(),
            model_version: config.model_version.clone(),
            max_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms.min(MAX_RETRY_BACKOFF_MS)),
            text_dimension,
            image_dimension,
        })
    }

    fn infer_url(&self, model: &str) -> String {
        match &self.model_version {
            Some(version) => format!(
                "{}/v2/models/{model}/versions/{version}/infer",
                self.base_url
            ),
            None => format!("{}/v2/models/{model}/infer", self.base_url),
        }
    }

    async fn infer(
        &self,
        modality: Modality,
        model: &str,
        payload: &str,
        expected: usize,
    ) -> Result<Vec<f32>> {
        let url = self.infer_url(model);
        let request = InferRequest {
            inputs: [InferInput {
                name: modality.as_str(),
                shape: [1],
                datatype: "BYTES",
                data: [payload],
            }],
            outputs: [RequestedOutput { name: OUTPUT_NAME }],
        };

        let attempts = self.max_retries + 1;
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match self.attempt(&url, &request).await {
                Ok(vector) => {
                    ensure_dimension(&vector, modality, expected)?;
                    return Ok(vector);
                }
                Err(Attempt::Fatal(err)) => return Err(err),
                Err(Attempt::Transient(reason)) => {
                    log::warn!(
                        "{} inference attempt {attempt}/{attempts} against {url} failed: {reason}",
                        modality.as_str()
                    );
                    last_error = reason;
                    if attempt < attempts {
                        tokio::time::sleep(self.retry_backoff * attempt as u32).await;
                    }
                }
            }
        }
        Err(VectorStoreError::EmbeddingUnavailable {
            attempts,
            last_error,
        })
    }

    async fn attempt(&self, url: &str, request: &InferRequest<'_>) -> std::result::Result<Vec<f32>, Attempt> {
        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| Attempt::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Attempt::Transient(format!("HTTP {status}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Attempt::Fatal(VectorStoreError::EmbeddingError(format!(
                "inference request rejected with HTTP {status}: {}",
                body.trim()
            ))));
        }

        let parsed: InferResponse = response
            .json()
            .await
            .map_err(|e| Attempt::Transient(format!("unreadable inference response: {e}")))?;
        let output = parsed
            .outputs
            .iter()
            .find(|o| o.name == OUTPUT_NAME)
            .or_else(|| parsed.outputs.first())
            .ok_or_else(|| {
                Attempt::Fatal(VectorStoreError::EmbeddingError(
                    "inference response has no outputs".to_string(),
                ))
            })?;
        Ok(output.data.clone())
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteEmbedder {
    fn fingerprint(&self) -> String {
        format!(
            "remote:{}+{}@{}",
            self.text_model,
            self.image_model,
            self.model_version.as_deref().unwrap_or("latest")
        )
    }

    fn text_dimension(&self) -> usize {
        self.text_dimension
    }

    fn image_dimension(&self) -> usize {
        self.image_dimension
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        self.infer(Modality::Text, &self.text_model, text, self.text_dimension)
            .await
    }

    async fn embed_image(&self, image: &[u8]) -> Result<Vec<f32>> {
        let encoded = BASE64.encode(image);
        self.infer(
            Modality::Image,
            &self.image_model,
            &encoded,
            self.image_dimension,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infer_url_includes_optional_version() {
        let mut config = RemoteConfig {
            url: "http://triton:8000/".to_string(),
            ..RemoteConfig::default()
        };
        let embedder = RemoteEmbedder::new(&config, 4, 4).unwrap();
        assert_eq!(
            embedder.infer_url("bert"),
            "http://triton:8000/v2/models/bert/infer"
        );

        config.model_version = Some("3".to_string());
        let embedder = RemoteEmbedder::new(&config, 4, 4).unwrap();
        assert_eq!(
            embedder.infer_url("bert"),
            "http://triton:8000/v2/models/bert/versions/3/infer"
        );
        assert!(embedder.fingerprint().ends_with("@3"));
    }

    #[test]
    fn retry_settings_are_capped() {
        let config = RemoteConfig {
            max_retries: 10_000,
            retry_backoff_ms: u64::MAX,
            ..RemoteConfig::default()
        };
        let embedder = RemoteEmbedder::new(&config, 4, 4).unwrap();
        assert_eq!(embedder.max_retries, MAX_REMOTE_RETRIES);
        assert_eq!(
            embedder.retry_backoff,
            Duration::from_millis(MAX_RETRY_BACKOFF_MS)
        );
    }

    #[test]
    fn empty_url_is_rejected() {
        let config = RemoteConfig {
            url: "  ".to_string(),
            ..RemoteConfig::default()
        };
        assert!(RemoteEmbedder::new(&config, 4, 4).is_err());
    }
}
