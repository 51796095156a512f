use crate::embeddings::EmbeddingProvider;
use crate::error::Result;
use crate::types::Modality;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

const CACHE_MAGIC: &[u8; 4] = b"LE01";
const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// On-disk per-modality vector cache keyed by provider fingerprint and a digest of
/// the raw input. Entries older than the expiry are treated as misses.
#[derive(Clone, Debug)]
pub struct EmbeddingCache {
    base_dir: PathBuf,
    max_age: Option<Duration>,
}

impl EmbeddingCache {
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            max_age: None,
        }
    }

    /// `0` disables expiry.
    #[must_use]
    pub fn with_expiry_days(mut self, days: u64) -> Self {
        self.max_age = (days > 0).then(|| Duration::from_secs(days.saturating_mul(SECS_PER_DAY)));
        self
    }

    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[must_use]
    pub fn vector_path(&self, fingerprint: &str, modality: Modality, input: &[u8]) -> PathBuf {
        let key = hex_digest(input);
        let (shard_a, shard_b) = shard_dirs(&key);
        self.base_dir
            .join(safe_component(fingerprint))
            .join(modality.as_str())
            .join(shard_a)
            .join(shard_b)
            .join(format!("{key}.bin"))
    }

    pub async fn get_vector(
        &self,
        fingerprint: &str,
        modality: Modality,
        input: &[u8],
        dimension: usize,
    ) -> Option<Vec<f32>> {
        let path = self.vector_path(fingerprint, modality, input);
        if let Some(max_age) = self.max_age {
            let modified = tokio::fs::metadata(&path).await.ok()?.modified().ok()?;
            let age = SystemTime::now()
                .duration_since(modified)
                .unwrap_or_default();
            if age > max_age {
                log::debug!("Embedding cache entry {} expired", path.display());
                return None;
            }
        }
        let bytes = tokio::fs::read(&path).await.ok()?;
        decode_vector(&bytes, dimension)
    }

    pub async fn put_vector(
        &self,
        fingerprint: &str,
        modality: Modality,
        input: &[u8],
        vector: &[f32],
    ) -> Result<()> {
        let path = self.vector_path(fingerprint, modality, input);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = encode_vector(vector);
        let tmp = path.with_extension("bin.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        if tokio::fs::rename(&tmp, &path).await.is_err() {
            let _ = tokio::fs::remove_file(&tmp).await;
        }
        Ok(())
    }

    /// Delete oldest entries until the cache fits in `max_bytes`. `0` means unbounded.
    pub async fn prune(&self, max_bytes: u64) {
        if max_bytes == 0 {
            return;
        }
        let root = self.base_dir.clone();
        let _ = tokio::task::spawn_blocking(move || prune_dir(&root, max_bytes)).await;
    }
}

/// Provider decorator that consults an [`EmbeddingCache`] before delegating.
/// Cache faults never fail an embedding; they only cost a recomputation.
pub struct CachedEmbedder {
    inner: Arc<dyn EmbeddingProvider>,
    cache: EmbeddingCache,
}

impl CachedEmbedder {
    #[must_use]
    pub fn new(inner: Arc<dyn EmbeddingProvider>, cache: EmbeddingCache) -> Self {
        Self { inner, cache }
    }

    #[must_use]
    pub const fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    async fn lookup_or_compute<F>(
        &self,
        modality: Modality,
        input: &[u8],
        dimension: usize,
        compute: F,
    ) -> Result<Vec<f32>>
    where
        F: std::future::Future<Output = Result<Vec<f32>>> + Send,
    {
        let fingerprint = self.inner.fingerprint();
        if let Some(hit) = self
            .cache
            .get_vector(&fingerprint, modality, input, dimension)
            .await
        {
            return Ok(hit);
        }
        let vector = compute.await?;
        if let Err(err) = self
            .cache
            .put_vector(&fingerprint, modality, input, &vector)
            .await
        {
            log::warn!("Failed to write {} embedding cache entry: {err}", modality.as_str());
        }
        Ok(vector)
    }
}

#[async_trait]
impl EmbeddingProvider for CachedEmbedder {
    fn fingerprint(&self) -> String {
        self.inner.fingerprint()
    }

    fn text_dimension(&self) -> usize {
        self.inner.text_dimension()
    }

    fn image_dimension(&self) -> usize {
        self.inner.image_dimension()
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        self.lookup_or_compute(
            Modality::Text,
            text.as_bytes(),
            self.inner.text_dimension(),
            self.inner.embed_text(text),
        )
        .await
    }

    async fn embed_image(&self, image: &[u8]) -> Result<Vec<f32>> {
        self.lookup_or_compute(
            Modality::Image,
            image,
            self.inner.image_dimension(),
            self.inner.embed_image(image),
        )
        .await
    }
}

fn hex_digest(input: &[u8]) -> String {
    let digest = Sha256::digest(input);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn safe_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() {
        "_".to_string()
    } else {
        out
    }
}

fn shard_dirs(hex: &str) -> (String, String) {
    let a = hex.get(0..2).unwrap_or("00").to_string();
    let b = hex.get(2..4).unwrap_or("00").to_string();
    (a, b)
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + vector.len() * 4);
    out.extend_from_slice(CACHE_MAGIC);
    #[allow(clippy::cast_possible_truncation)]
    let dim = vector.len() as u32;
    out.extend_from_slice(&dim.to_le_bytes());
    for v in vector {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

fn decode_vector(bytes: &[u8], expected_dimension: usize) -> Option<Vec<f32>> {
    if bytes.len() < 8 || &bytes[0..4] != CACHE_MAGIC {
        return None;
    }
    let dim = u32::from_le_bytes(bytes[4..8].try_into().ok()?) as usize;
    if dim != expected_dimension || bytes.len() != 8 + dim * 4 {
        return None;
    }
    bytes[8..]
        .chunks_exact(4)
        .map(|chunk| chunk.try_into().ok().map(f32::from_le_bytes))
        .collect()
}

fn prune_dir(root: &Path, max_bytes: u64) {
    let mut files = Vec::new();
    let mut total = 0u64;
    collect_files(root, &mut files, &mut total);
    if total <= max_bytes {
        return;
    }
    files.sort_by(|a, b| a.modified.cmp(&b.modified));
    for file in files {
        if total <= max_bytes {
            break;
        }
        if std::fs::remove_file(&file.path).is_ok() {
            total = total.saturating_sub(file.len);
        }
    }
}

struct FileEntry {
    path: PathBuf,
    len: u64,
    modified: SystemTime,
}

fn collect_files(root: &Path, out: &mut Vec<FileEntry>, total: &mut u64) {
    let Ok(read_dir) = std::fs::read_dir(root) else {
        return;
    };
    for entry in read_dir.flatten() {
        let path = entry.path();
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if meta.is_dir() {
            collect_files(&path, out, total);
            continue;
        }
        let len = meta.len();
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        *total = total.saturating_add(len);
        out.push(FileEntry {
            path,
            len,
            modified,
        });
    }
}
