use crate::embeddings::{ensure_dimension, EmbeddingProvider};
use crate::error::{Result, VectorStoreError};
use crate::onnx::{ImageEncoder, TextEncoder};
use crate::types::Modality;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::task::spawn_blocking;

pub const MANIFEST_FILE_NAME: &str = "manifest.json";
const MANIFEST_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Deserialize)]
struct ModelsManifest {
    schema_version: u32,
    models: Vec<ManifestModel>,
}

#[derive(Debug, Deserialize)]
struct ManifestModel {
    id: String,
    modality: Modality,
    dimension: usize,
    #[serde(default = "default_max_length")]
    max_length: usize,
    #[serde(default = "default_image_size")]
    image_size: u32,
    #[serde(default)]
    pooling: Pooling,
    #[serde(default)]
    assets: Vec<ManifestAsset>,
}

#[derive(Debug, Deserialize)]
struct ManifestAsset {
    path: String,
}

const fn default_max_length() -> usize {
    128
}

const fn default_image_size() -> u32 {
    224
}

/// How a `[batch, tokens, hidden]` output is reduced to one vector.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pooling {
    #[default]
    Cls,
    Mean,
}

#[derive(Clone, Debug)]
pub(crate) struct ModelSpec {
    pub id: String,
    pub dimension: usize,
    pub max_length: usize,
    pub image_size: u32,
    pub pooling: Pooling,
    pub onnx_path: PathBuf,
    pub tokenizer_path: Option<PathBuf>,
}

fn validate_relative_manifest_path(path: &Path) -> Result<()> {
    let mut has_component = false;
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => {
                return Err(VectorStoreError::EmbeddingError(
                    "models manifest asset path must be relative".to_string(),
                ));
            }
            Component::ParentDir => {
                return Err(VectorStoreError::EmbeddingError(
                    "models manifest asset path must not contain '..'".to_string(),
                ));
            }
            Component::CurDir => {}
            Component::Normal(_) => has_component = true,
        }
    }
    if !has_component {
        return Err(VectorStoreError::EmbeddingError(
            "models manifest asset path is empty".to_string(),
        ));
    }
    Ok(())
}

fn safe_asset_path(model_dir: &Path, model_id: &str, rel: &str) -> Result<PathBuf> {
    validate_relative_manifest_path(Path::new(rel)).map_err(|err| {
        VectorStoreError::EmbeddingError(format!(
            "Invalid models manifest asset path for model '{model_id}': '{rel}' ({err})"
        ))
    })?;
    Ok(model_dir.join(rel))
}

/// Read `manifest.json` under `model_dir` and return the text and image model specs.
pub(crate) fn load_manifest(model_dir: &Path) -> Result<(ModelSpec, ModelSpec)> {
    let manifest_path = model_dir.join(MANIFEST_FILE_NAME);
    let raw = std::fs::read_to_string(&manifest_path).map_err(|e| {
        VectorStoreError::EmbeddingError(format!(
            "Failed to read models manifest {}: {e}",
            manifest_path.display()
        ))
    })?;
    let manifest: ModelsManifest = serde_json::from_str(&raw).map_err(|e| {
        VectorStoreError::EmbeddingError(format!(
            "Invalid models manifest {}: {e}",
            manifest_path.display()
        ))
    })?;
    if manifest.schema_version != MANIFEST_SCHEMA_VERSION {
        return Err(VectorStoreError::EmbeddingError(format!(
            "Unsupported models manifest schema_version {} (expected {MANIFEST_SCHEMA_VERSION})",
            manifest.schema_version
        )));
    }

    let pick = |modality: Modality| -> Result<ModelSpec> {
        let model = manifest
            .models
            .iter()
            .find(|m| m.modality == modality)
            .ok_or_else(|| {
                VectorStoreError::EmbeddingError(format!(
                    "models manifest {} has no {} model",
                    manifest_path.display(),
                    modality.as_str()
                ))
            })?;
        spec_from_manifest(model_dir, model)
    };

    Ok((pick(Modality::Text)?, pick(Modality::Image)?))
}

fn spec_from_manifest(model_dir: &Path, model: &ManifestModel) -> Result<ModelSpec> {
    let mut onnx_path = None;
    let mut tokenizer_path = None;
    for asset in &model.assets {
        let path = Path::new(asset.path.as_str());
        if onnx_path.is_none()
            && path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("onnx"))
        {
            onnx_path = Some(safe_asset_path(model_dir, &model.id, &asset.path)?);
        }
        if tokenizer_path.is_none()
            && path
                .file_name()
                .is_some_and(|name| name.eq_ignore_ascii_case("tokenizer.json"))
        {
            tokenizer_path = Some(safe_asset_path(model_dir, &model.id, &asset.path)?);
        }
    }

    let onnx_path = match onnx_path {
        Some(path) => path,
        None => safe_asset_path(model_dir, &model.id, &format!("{}/model.onnx", model.id))?,
    };
    if model.modality == Modality::Text && tokenizer_path.is_none() {
        tokenizer_path = Some(safe_asset_path(
            model_dir,
            &model.id,
            &format!("{}/tokenizer.json", model.id),
        )?);
    }

    Ok(ModelSpec {
        id: model.id.clone(),
        dimension: model.dimension,
        max_length: model.max_length,
        image_size: model.image_size,
        pooling: model.pooling,
        onnx_path,
        tokenizer_path,
    })
}

pub(crate) struct OnnxEncoders {
    text: TextEncoder,
    image: ImageEncoder,
}

enum Engine {
    Onnx(Arc<OnnxEncoders>),
    Stub,
}

/// In-process embedding backend: ONNX Runtime models from a manifest, or a
/// deterministic hash-based stub for tests and offline runs.
pub struct LocalEmbedder {
    engine: Engine,
    fingerprint: String,
    text_dimension: usize,
    image_dimension: usize,
}

impl LocalEmbedder {
    /// Load both encoders from `model_dir/manifest.json`. Manifest dimensions must
    /// match the configured ones.
    pub fn onnx(model_dir: &Path, text_dimension: usize, image_dimension: usize) -> Result<Self> {
        let (text_spec, image_spec) = load_manifest(model_dir)?;
        if text_spec.dimension != text_dimension {
            return Err(VectorStoreError::dimension(
                format!("text model '{}'", text_spec.id),
                text_dimension,
                text_spec.dimension,
            ));
        }
        if image_spec.dimension != image_dimension {
            return Err(VectorStoreError::dimension(
                format!("image model '{}'", image_spec.id),
                image_dimension,
                image_spec.dimension,
            ));
        }

        let fingerprint = format!("local:onnx:{}+{}", text_spec.id, image_spec.id);
        let encoders = OnnxEncoders {
            text: TextEncoder::new(&text_spec)?,
            image: ImageEncoder::new(&image_spec)?,
        };
        Ok(Self {
            engine: Engine::Onnx(Arc::new(encoders)),
            fingerprint,
            text_dimension,
            image_dimension,
        })
    }

    #[must_use]
    pub fn stub(text_dimension: usize, image_dimension: usize) -> Self {
        Self {
            engine: Engine::Stub,
            fingerprint: format!("local:stub:{text_dimension}x{image_dimension}"),
            text_dimension,
            image_dimension,
        }
    }

    #[must_use]
    pub const fn is_stub(&self) -> bool {
        matches!(self.engine, Engine::Stub)
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbedder {
    fn fingerprint(&self) -> String {
        self.fingerprint.clone()
    }

    fn text_dimension(&self) -> usize {
        self.text_dimension
    }

    fn image_dimension(&self) -> usize {
        self.image_dimension
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let vector = match &self.engine {
            Engine::Stub => stub_embed(Modality::Text, text.as_bytes(), self.text_dimension),
            Engine::Onnx(encoders) => {
                let encoders = Arc::clone(encoders);
                let owned = text.to_string();
                spawn_blocking(move || encoders.text.embed_blocking(&owned))
                    .await
                    .map_err(|e| VectorStoreError::EmbeddingError(format!("Join error: {e}")))??
            }
        };
        ensure_dimension(&vector, Modality::Text, self.text_dimension)?;
        Ok(vector)
    }

    async fn embed_image(&self, image: &[u8]) -> Result<Vec<f32>> {
        let vector = match &self.engine {
            Engine::Stub => stub_embed(Modality::Image, image, self.image_dimension),
            Engine::Onnx(encoders) => {
                let encoders = Arc::clone(encoders);
                let owned = image.to_vec();
                spawn_blocking(move || encoders.image.embed_blocking(&owned))
                    .await
                    .map_err(|e| VectorStoreError::EmbeddingError(format!("Join error: {e}")))??
            }
        };
        ensure_dimension(&vector, Modality::Image, self.image_dimension)?;
        Ok(vector)
    }
}

fn stub_embed(modality: Modality, bytes: &[u8], dimension: usize) -> Vec<f32> {
    let salt = match modality {
        Modality::Text => 0x7465_7874_u64,
        Modality::Image => 0x696d_6167_u64,
    };
    let mut state = fnv1a_64(bytes)
        ^ (dimension as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ salt;
    let mut vec = Vec::with_capacity(dimension);
    for _ in 0..dimension {
        let bits = splitmix64(&mut state);
        let high = (bits >> 32) as u32;
        let mantissa = high >> 9;
        let unit = f32::from_bits(0x3f80_0000 | mantissa) - 1.0;
        vec.push(unit.mul_add(2.0, -1.0));
    }
    vec
}

pub(crate) fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

pub(crate) const fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
