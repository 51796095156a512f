use crate::ann::{AnnIndex, ForestParams, Node};
use crate::error::{Result, VectorStoreError};
use crate::index_store::{IndexMeta, PublishedIndex};
use crate::mapping::OrdinalMap;
use crate::paths::{INDEX_FILE_NAME, MAPPING_FILE_NAME};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

pub const INDEX_FORMAT: &str = "lookalike-ann";
pub const INDEX_FORMAT_VERSION: u32 = 1;
pub const MAPPING_FORMAT_VERSION: u32 = 1;
pub const METRIC: &str = "angular";

/// Locations of the two artifacts that make up one persisted index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub index: PathBuf,
    pub mapping: PathBuf,
}

impl ArtifactPaths {
    #[must_use]
    pub fn new(index: impl Into<PathBuf>, mapping: impl Into<PathBuf>) -> Self {
        Self {
            index: index.into(),
            mapping: mapping.into(),
        }
    }

    #[must_use]
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(INDEX_FILE_NAME), dir.join(MAPPING_FILE_NAME))
    }

    /// Advisory lock guarding the rename pair against concurrent readers.
    #[must_use]
    pub fn publish_lock_path(&self) -> PathBuf {
        sibling_with_suffix(&self.index, "publish.lock")
    }

    /// Advisory lock serializing whole builds.
    #[must_use]
    pub fn build_lock_path(&self) -> PathBuf {
        sibling_with_suffix(&self.index, "build.lock")
    }

    #[must_use]
    pub fn exist(&self) -> bool {
        self.index.exists() && self.mapping.exists()
    }
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

/// Everything in the index artifact except the payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexHeader {
    pub format: String,
    pub format_version: u32,
    pub metric: String,
    pub dimension: usize,
    pub count: usize,
    pub params: ForestParams,
    pub meta: IndexMeta,
}

#[derive(Serialize)]
struct IndexArtifactRef<'a> {
    #[serde(flatten)]
    header: IndexHeader,
    vectors: &'a [f32],
    trees: &'a [Vec<Node>],
}

#[derive(Deserialize)]
struct IndexArtifact {
    #[serde(flatten)]
    header: IndexHeader,
    vectors: Vec<f32>,
    trees: Vec<Vec<Node>>,
}

#[derive(Serialize, Deserialize)]
struct MappingArtifact {
    format_version: u32,
    build_id: String,
    count: usize,
    identities: Vec<String>,
}

struct PublishLock {
    file: std::fs::File,
}

impl Drop for PublishLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

async fn acquire_publish_lock(path: PathBuf, exclusive: bool) -> Result<PublishLock> {
    tokio::task::spawn_blocking(move || -> Result<PublishLock> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        if exclusive {
            file.lock_exclusive()?;
        } else {
            file.lock_shared()?;
        }
        Ok(PublishLock { file })
    })
    .await
    .map_err(|err| VectorStoreError::Other(format!("join publish lock task: {err}")))?
}

async fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    Ok(())
}

/// Write both artifacts. Each is staged to a temporary file and fsynced; the two
/// renames then happen under an exclusive lock, mapping first.
pub async fn persist(index: &PublishedIndex, paths: &ArtifactPaths) -> Result<()> {
    let header = IndexHeader {
        format: INDEX_FORMAT.to_string(),
        format_version: INDEX_FORMAT_VERSION,
        metric: METRIC.to_string(),
        dimension: index.dimension(),
        count: index.len(),
        params: index.ann().params(),
        meta: index.meta().clone(),
    };
    let index_bytes = serde_json::to_vec(&IndexArtifactRef {
        header,
        vectors: index.ann().unit_vectors(),
        trees: index.ann().trees(),
    })?;
    let mapping_bytes = serde_json::to_vec_pretty(&MappingArtifact {
        format_version: MAPPING_FORMAT_VERSION,
        build_id: index.build_id().to_string(),
        count: index.len(),
        identities: index.mapping().identities().to_vec(),
    })?;

    for path in [&paths.index, &paths.mapping] {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
    }

    let index_tmp = sibling_with_suffix(&paths.index, "tmp");
    let mapping_tmp = sibling_with_suffix(&paths.mapping, "tmp");
    write_synced(&index_tmp, &index_bytes).await?;
    write_synced(&mapping_tmp, &mapping_bytes).await?;

    let lock = acquire_publish_lock(paths.publish_lock_path(), true).await?;
    tokio::fs::rename(&mapping_tmp, &paths.mapping).await?;
    tokio::fs::rename(&index_tmp, &paths.index).await?;
    drop(lock);

    log::info!(
        "Persisted index {} to {} and {}",
        index.build_id(),
        paths.index.display(),
        paths.mapping.display()
    );
    Ok(())
}

fn incompatible(path: &Path, reason: impl Into<String>) -> VectorStoreError {
    VectorStoreError::IncompatibleArtifact {
        path: path.display().to_string(),
        reason: reason.into(),
    }
}

fn check_header(path: &Path, header: &IndexHeader) -> Result<()> {
    if header.format != INDEX_FORMAT {
        return Err(incompatible(
            path,
            format!("format '{}' (expected '{INDEX_FORMAT}')", header.format),
        ));
    }
    if header.format_version != INDEX_FORMAT_VERSION {
        return Err(incompatible(
            path,
            format!(
                "format_version {} (expected {INDEX_FORMAT_VERSION})",
                header.format_version
            ),
        ));
    }
    if header.metric != METRIC {
        return Err(incompatible(
            path,
            format!("metric '{}' (expected '{METRIC}')", header.metric),
        ));
    }
    Ok(())
}

/// Read only the descriptive header of an index artifact.
pub async fn read_header(path: &Path) -> Result<IndexHeader> {
    let bytes = tokio::fs::read(path).await?;
    let header: IndexHeader = serde_json::from_slice(&bytes)?;
    check_header(path, &header)?;
    Ok(header)
}

/// Load and cross-check both artifacts. A pair written by different builds is
/// rejected rather than served.
pub async fn load(paths: &ArtifactPaths) -> Result<PublishedIndex> {
    let (index_bytes, mapping_bytes) = {
        let _lock = match acquire_publish_lock(paths.publish_lock_path(), false).await {
            Ok(lock) => Some(lock),
            Err(err) => {
                log::debug!("Reading artifacts without publish lock: {err}");
                None
            }
        };
        let index_bytes = tokio::fs::read(&paths.index).await?;
        let mapping_bytes = tokio::fs::read(&paths.mapping).await?;
        (index_bytes, mapping_bytes)
    };

    let artifact: IndexArtifact = serde_json::from_slice(&index_bytes)?;
    check_header(&paths.index, &artifact.header)?;
    let mapping: MappingArtifact = serde_json::from_slice(&mapping_bytes)?;
    if mapping.format_version != MAPPING_FORMAT_VERSION {
        return Err(incompatible(
            &paths.mapping,
            format!(
                "format_version {} (expected {MAPPING_FORMAT_VERSION})",
                mapping.format_version
            ),
        ));
    }

    let header = artifact.header;
    if mapping.build_id != header.meta.build_id {
        return Err(VectorStoreError::IndexCorruption(format!(
            "mapping {} belongs to build {} but index {} is build {}",
            paths.mapping.display(),
            mapping.build_id,
            paths.index.display(),
            header.meta.build_id
        )));
    }
    if mapping.count != header.count || mapping.identities.len() != header.count {
        return Err(VectorStoreError::IndexCorruption(format!(
            "index declares {} entries, mapping declares {} and lists {}",
            header.count,
            mapping.count,
            mapping.identities.len()
        )));
    }
    if artifact.vectors.len() != header.count * header.dimension {
        return Err(VectorStoreError::IndexCorruption(format!(
            "index payload has {} floats, expected {} x {}",
            artifact.vectors.len(),
            header.count,
            header.dimension
        )));
    }

    let ann = AnnIndex::from_parts(header.dimension, header.params, artifact.vectors, artifact.trees)?;
    let ordinals = OrdinalMap::from_identities(mapping.identities)?;
    let index = PublishedIndex::from_parts(ann, ordinals, header.meta)?;
    log::info!(
        "Loaded index {} ({} items, dim {}) from {}",
        index.build_id(),
        index.len(),
        index.dimension(),
        paths.index.display()
    );
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JointVector;
    use tempfile::TempDir;

    fn sample(ids: &[&str]) -> PublishedIndex {
        let vectors: Vec<JointVector> = (0..ids.len())
            .map(|i| JointVector::from_values(vec![1.0, i as f32, 0.5]))
            .collect();
        let ann = AnnIndex::build(3, &vectors, ForestParams::default()).unwrap();
        let mapping =
            OrdinalMap::from_identities(ids.iter().map(|s| (*s).to_string()).collect()).unwrap();
        PublishedIndex::new(ann, mapping, "local:stub:3").unwrap()
    }

    #[tokio::test]
    async fn persisted_pair_loads_back() {
        let dir = TempDir::new().unwrap();
        let paths = ArtifactPaths::in_dir(dir.path());
        let original = sample(&["10", "11", "12"]);
        persist(&original, &paths).await.unwrap();

        let loaded = load(&paths).await.unwrap();
        assert_eq!(loaded.build_id(), original.build_id());
        assert_eq!(loaded.mapping().identities(), original.mapping().identities());
        assert_eq!(loaded.ann().trees(), original.ann().trees());

        let hits = loaded.search(&[1.0, 2.0, 0.5], 1).unwrap();
        assert_eq!(loaded.identity(hits[0].ordinal), Some("12"));
        assert_eq!(hits[0].distance, 0.0);

        let header = read_header(&paths.index).await.unwrap();
        assert_eq!(header.count, 3);
        assert_eq!(header.metric, METRIC);
    }

    #[tokio::test]
    async fn mixed_builds_are_rejected() {
        let dir = TempDir::new().unwrap();
        let first = ArtifactPaths::in_dir(&dir.path().join("first"));
        let second = ArtifactPaths::in_dir(&dir.path().join("second"));
        persist(&sample(&["a", "b"]), &first).await.unwrap();
        persist(&sample(&["a", "c"]), &second).await.unwrap();

        let torn = ArtifactPaths::new(first.index.clone(), second.mapping.clone());
        let err = load(&torn).await.unwrap_err();
        assert!(matches!(err, VectorStoreError::IndexCorruption(_)), "{err}");
    }

    #[tokio::test]
    async fn unknown_format_version_is_incompatible() {
        let dir = TempDir::new().unwrap();
        let paths = ArtifactPaths::in_dir(dir.path());
        persist(&sample(&["a"]), &paths).await.unwrap();

        let raw = tokio::fs::read_to_string(&paths.index).await.unwrap();
        let bumped = raw.replacen("\"format_version\":1", "\"format_version\":99", 1);
        tokio::fs::write(&paths.index, bumped).await.unwrap();

        let err = load(&paths).await.unwrap_err();
        assert!(
            matches!(err, VectorStoreError::IncompatibleArtifact { .. }),
            "{err}"
        );
    }

    async fn rewrite_index(paths: &ArtifactPaths, edit: impl FnOnce(&mut serde_json::Value)) {
        let raw = tokio::fs::read(&paths.index).await.unwrap();
        let mut doc: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        edit(&mut doc);
        tokio::fs::write(&paths.index, serde_json::to_vec(&doc).unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn cyclic_tree_is_rejected_at_load() {
        let dir = TempDir::new().unwrap();
        let paths = ArtifactPaths::in_dir(dir.path());
        persist(&sample(&["a", "b", "c"]), &paths).await.unwrap();

        rewrite_index(&paths, |doc| {
            doc["trees"] = serde_json::json!([[
                {"kind": "even", "left": 1, "right": 1},
                {"kind": "even", "left": 1, "right": 1},
            ]]);
        })
        .await;

        let err = load(&paths).await.unwrap_err();
        assert!(matches!(err, VectorStoreError::IndexCorruption(_)), "{err}");
    }

    #[tokio::test]
    async fn edited_forest_no_longer_matches_its_build_id() {
        let dir = TempDir::new().unwrap();
        let paths = ArtifactPaths::in_dir(dir.path());
        persist(&sample(&["a", "b", "c"]), &paths).await.unwrap();

        // Structurally valid, but not the forest that was built.
        rewrite_index(&paths, |doc| {
            doc["trees"] = serde_json::json!([[{"kind": "leaf", "items": [2, 1, 0]}]]);
        })
        .await;

        let err = load(&paths).await.unwrap_err();
        assert!(matches!(err, VectorStoreError::IndexCorruption(_)), "{err}");
        assert!(err.to_string().contains("labelled"), "{err}");
    }

    #[test]
    fn lock_paths_sit_beside_the_index() {
        let paths = ArtifactPaths::in_dir(Path::new("/data/idx"));
        assert_eq!(
            paths.publish_lock_path(),
            PathBuf::from("/data/idx/index.json.publish.lock")
        );
        assert_eq!(
            paths.build_lock_path(),
            PathBuf::from("/data/idx/index.json.build.lock")
        );
    }
}
