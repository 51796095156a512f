use crate::combiner::VectorCombiner;
use crate::embedding_cache::{CachedEmbedder, EmbeddingCache};
use crate::error::{Result, VectorStoreError};
use crate::local::LocalEmbedder;
use crate::remote::{RemoteConfig, RemoteEmbedder};
use crate::types::{JointVector, Modality};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Produces per-modality vectors. Implementations must be deterministic for the
/// same input and the same model version; [`EmbeddingProvider::fingerprint`] names
/// that version.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Stable identifier of backend + model version.
    fn fingerprint(&self) -> String;

    fn text_dimension(&self) -> usize;

    fn image_dimension(&self) -> usize;

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_image(&self, image: &[u8]) -> Result<Vec<f32>>;
}

pub(crate) fn ensure_dimension(vec: &[f32], modality: Modality, expected: usize) -> Result<()> {
    if vec.len() != expected {
        return Err(VectorStoreError::dimension(
            format!("{} embedding", modality.as_str()),
            expected,
            vec.len(),
        ));
    }
    Ok(())
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingBackend {
    #[default]
    Local,
    Remote,
}

impl EmbeddingBackend {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

impl std::str::FromStr for EmbeddingBackend {
    type Err = VectorStoreError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "remote" | "triton" => Ok(Self::Remote),
            other => Err(VectorStoreError::EmbeddingError(format!(
                "Unsupported embedding backend '{other}' (expected 'local' or 'remote')"
            ))),
        }
    }
}

/// Inference engine of the local backend.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalEngine {
    #[default]
    Onnx,
    Stub,
}

impl std::str::FromStr for LocalEngine {
    type Err = VectorStoreError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "onnx" | "fast" => Ok(Self::Onnx),
            "stub" => Ok(Self::Stub),
            other => Err(VectorStoreError::EmbeddingError(format!(
                "Unsupported local embedding engine '{other}' (expected 'onnx' or 'stub')"
            ))),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    pub engine: LocalEngine,
    pub model_dir: PathBuf,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            engine: LocalEngine::Onnx,
            model_dir: PathBuf::from("models"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub dir: Option<PathBuf>,
    pub expiry_days: u64,
    pub max_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
            expiry_days: 30,
            max_bytes: 0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,
    pub text_dimension: usize,
    pub image_dimension: usize,
    pub local: LocalConfig,
    pub remote: RemoteConfig,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Local,
            text_dimension: 768,
            image_dimension: 768,
            local: LocalConfig::default(),
            remote: RemoteConfig::default(),
        }
    }
}

impl EmbeddingConfig {
    #[must_use]
    pub const fn combiner(&self) -> VectorCombiner {
        VectorCombiner::new(self.text_dimension, self.image_dimension)
    }
}

/// Construct the configured backend. This is the only place the backend choice is
/// made; everything downstream holds a trait object.
pub fn build_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    if config.text_dimension == 0 || config.image_dimension == 0 {
        return Err(VectorStoreError::EmbeddingError(
            "text and image dimensions must be non-zero".to_string(),
        ));
    }
    let provider: Arc<dyn EmbeddingProvider> = match config.backend {
        EmbeddingBackend::Local => match config.local.engine {
            LocalEngine::Onnx => Arc::new(LocalEmbedder::onnx(
                &config.local.model_dir,
                config.text_dimension,
                config.image_dimension,
            )?),
            LocalEngine::Stub => Arc::new(LocalEmbedder::stub(
                config.text_dimension,
                config.image_dimension,
            )),
        },
        EmbeddingBackend::Remote => Arc::new(RemoteEmbedder::new(
            &config.remote,
            config.text_dimension,
            config.image_dimension,
        )?),
    };
    log::info!(
        "Embedding backend '{}' ready ({}; text dim {}, image dim {})",
        config.backend.as_str(),
        provider.fingerprint(),
        provider.text_dimension(),
        provider.image_dimension()
    );
    Ok(provider)
}

/// Wrap `provider` in an on-disk embedding cache when the cache is enabled.
#[must_use]
pub fn with_cache(
    provider: Arc<dyn EmbeddingProvider>,
    cache: &CacheConfig,
    default_dir: PathBuf,
) -> Arc<dyn EmbeddingProvider> {
    if !cache.enabled {
        return provider;
    }
    let dir = cache.dir.clone().unwrap_or(default_dir);
    let store = EmbeddingCache::new(dir).with_expiry_days(cache.expiry_days);
    Arc::new(CachedEmbedder::new(provider, store))
}

/// Computes joint vectors from raw inputs. Both the index builder and the query
/// path go through this type so the two sides can never drift apart.
#[derive(Clone)]
pub struct JointEmbedder {
    provider: Arc<dyn EmbeddingProvider>,
    combiner: VectorCombiner,
}

impl JointEmbedder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, combiner: VectorCombiner) -> Result<Self> {
        if provider.text_dimension() != combiner.text_dimension() {
            return Err(VectorStoreError::dimension(
                format!("text encoder {}", provider.fingerprint()),
                combiner.text_dimension(),
                provider.text_dimension(),
            ));
        }
        if provider.image_dimension() != combiner.image_dimension() {
            return Err(VectorStoreError::dimension(
                format!("image encoder {}", provider.fingerprint()),
                combiner.image_dimension(),
                provider.image_dimension(),
            ));
        }
        Ok(Self { provider, combiner })
    }

    #[must_use]
    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    #[must_use]
    pub const fn combiner(&self) -> VectorCombiner {
        self.combiner
    }

    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.combiner.dimension()
    }

    /// Embed the present modalities and combine them. Blank text counts as absent.
    pub async fn embed(&self, text: Option<&str>, image: Option<&[u8]>) -> Result<JointVector> {
        let text = text.map(str::trim).filter(|t| !t.is_empty());

        let text_future = async {
            match text {
                Some(text) => self.provider.embed_text(text).await.map(Some),
                None => Ok(None),
            }
        };
        let image_future = async {
            match image {
                Some(bytes) => self.provider.embed_image(bytes).await.map(Some),
                None => Ok(None),
            }
        };
        let (text_vec, image_vec) = tokio::try_join!(text_future, image_future)?;

        self.combiner
            .combine(text_vec.as_deref(), image_vec.as_deref())
    }
}
