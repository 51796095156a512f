use crate::ann::{AnnIndex, Node};
use crate::artifacts::{self, ArtifactPaths};
use crate::error::{Result, VectorStoreError};
use crate::mapping::OrdinalMap;
use crate::types::Neighbor;
use arc_swap::ArcSwapOption;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Provenance recorded with every published index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMeta {
    /// Content hash shared by the index and mapping artifacts of one build.
    pub build_id: String,
    /// Fingerprint of the embedding provider that produced the vectors.
    pub provider: String,
    pub built_at_unix_ms: u64,
}

/// An ANN index and its ordinal mapping, always published and read as one unit.
#[derive(Debug)]
pub struct PublishedIndex {
    ann: AnnIndex,
    mapping: OrdinalMap,
    meta: IndexMeta,
}

impl PublishedIndex {
    pub fn new(ann: AnnIndex, mapping: OrdinalMap, provider: impl Into<String>) -> Result<Self> {
        check_pairing(&ann, &mapping)?;
        let provider = provider.into();
        let build_id = compute_build_id(&ann, &mapping, &provider);
        let built_at_unix_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Ok(Self {
            ann,
            mapping,
            meta: IndexMeta {
                build_id,
                provider,
                built_at_unix_ms,
            },
        })
    }

    /// Reassemble a persisted index; the recorded build id must match the content.
    pub(crate) fn from_parts(ann: AnnIndex, mapping: OrdinalMap, meta: IndexMeta) -> Result<Self> {
        check_pairing(&ann, &mapping)?;
        let actual = compute_build_id(&ann, &mapping, &meta.provider);
        if actual != meta.build_id {
            return Err(VectorStoreError::IndexCorruption(format!(
                "content hashes to build {actual} but is labelled {}",
                meta.build_id
            )));
        }
        Ok(Self { ann, mapping, meta })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ann.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ann.is_empty()
    }

    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.ann.dimension()
    }

    #[must_use]
    pub const fn ann(&self) -> &AnnIndex {
        &self.ann
    }

    #[must_use]
    pub const fn mapping(&self) -> &OrdinalMap {
        &self.mapping
    }

    #[must_use]
    pub const fn meta(&self) -> &IndexMeta {
        &self.meta
    }

    #[must_use]
    pub fn build_id(&self) -> &str {
        &self.meta.build_id
    }

    #[must_use]
    pub fn identity(&self, ordinal: usize) -> Option<&str> {
        self.mapping.identity(ordinal)
    }

    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        self.ann.search(query, k)
    }
}

fn check_pairing(ann: &AnnIndex, mapping: &OrdinalMap) -> Result<()> {
    if ann.len() != mapping.len() {
        return Err(VectorStoreError::IndexCorruption(format!(
            "index holds {} vectors but mapping holds {} identities",
            ann.len(),
            mapping.len()
        )));
    }
    Ok(())
}

fn compute_build_id(ann: &AnnIndex, mapping: &OrdinalMap, provider: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(provider.as_bytes());
    hasher.update([0u8]);
    hasher.update((ann.dimension() as u64).to_le_bytes());
    hasher.update((ann.len() as u64).to_le_bytes());
    for identity in mapping.identities() {
        hasher.update(identity.as_bytes());
        hasher.update([0u8]);
    }
    for value in ann.unit_vectors() {
        hasher.update(value.to_le_bytes());
    }
    for nodes in ann.trees() {
        hasher.update((nodes.len() as u64).to_le_bytes());
        for node in nodes {
            match node {
                Node::Leaf { items } => {
                    hasher.update([0u8]);
                    hasher.update((items.len() as u64).to_le_bytes());
                    for item in items {
                        hasher.update(item.to_le_bytes());
                    }
                }
                Node::Split {
                    pivot_a,
                    pivot_b,
                    near_a,
                    near_b,
                } => {
                    hasher.update([1u8]);
                    for value in [pivot_a, pivot_b, near_a, near_b] {
                        hasher.update(value.to_le_bytes());
                    }
                }
                Node::Even { left, right } => {
                    hasher.update([2u8]);
                    hasher.update(left.to_le_bytes());
                    hasher.update(right.to_le_bytes());
                }
            }
        }
    }
    hasher
        .finalize()
        .iter()
        .take(16)
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Holder of the currently published index. Readers pin an immutable snapshot;
/// a rebuild swaps in a complete replacement, so a search never observes an index
/// from one build paired with a mapping from another.
pub struct IndexStore {
    current: ArcSwapOption<PublishedIndex>,
}

impl Default for IndexStore {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: ArcSwapOption::empty(),
        }
    }

    #[must_use]
    pub fn with_index(index: PublishedIndex) -> Self {
        Self {
            current: ArcSwapOption::from_pointee(index),
        }
    }

    /// Pin the current index, if any.
    #[must_use]
    pub fn snapshot(&self) -> Option<Arc<PublishedIndex>> {
        self.current.load_full()
    }

    pub fn current(&self) -> Result<Arc<PublishedIndex>> {
        self.snapshot().ok_or(VectorStoreError::IndexUnavailable)
    }

    /// Replace the served index. Snapshots already handed out stay valid.
    pub fn publish(&self, index: PublishedIndex) -> Arc<PublishedIndex> {
        let next = Arc::new(index);
        let previous = self.current.swap(Some(Arc::clone(&next)));
        log::info!(
            "Published index {} ({} items, dim {}){}",
            next.build_id(),
            next.len(),
            next.dimension(),
            previous
                .map(|p| format!(", replacing {}", p.build_id()))
                .unwrap_or_default()
        );
        next
    }

    #[must_use]
    pub fn size(&self) -> usize {
        (*self.current.load()).as_ref().map_or(0, |index| index.len())
    }

    #[must_use]
    pub fn dimension(&self) -> Option<usize> {
        (*self.current.load()).as_ref().map(|index| index.dimension())
    }

    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        self.current()?.search(query, k)
    }

    /// Load the artifact pair from disk and publish it.
    pub async fn load(&self, paths: &ArtifactPaths) -> Result<Arc<PublishedIndex>> {
        let index = artifacts::load(paths).await?;
        Ok(self.publish(index))
    }
}
