//! # Lookalike Vector Store
//!
//! Joint text+image embeddings and the approximate nearest-neighbor index they
//! are searched in.
//!
//! ## Architecture
//!
//! ```text
//! text ──> EmbeddingProvider::embed_text ──┐
//!                                          ├─> VectorCombiner ─> JointVector
//! image ─> EmbeddingProvider::embed_image ─┘          │
//!                                                     ▼
//!                         AnnIndex (random-projection forest, angular)
//!                               + OrdinalMap (ordinal <-> identity)
//!                                          │
//!                       PublishedIndex ──> IndexStore (atomic swap)
//!                                          │
//!                                  index.json + mapping.json
//! ```
//!
//! Providers are local (ONNX Runtime, or a deterministic stub) or remote (KServe
//! v2 inference over HTTP). [`JointEmbedder`] is the single path from raw inputs
//! to a [`JointVector`] for both indexing and querying.
//!
//! ## Example
//!
//! ```no_run
//! use lookalike_vector_store::{
//!     AnnIndex, ForestParams, IndexStore, JointEmbedder, LocalEmbedder, OrdinalMap,
//!     PublishedIndex, VectorCombiner,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> lookalike_vector_store::Result<()> {
//!     let provider = Arc::new(LocalEmbedder::stub(768, 768));
//!     let embedder = JointEmbedder::new(provider, VectorCombiner::new(768, 768))?;
//!
//!     let shirt = embedder.embed(Some("linen shirt"), Some(b"...jpeg...")).await?;
//!     let ann = AnnIndex::build(embedder.dimension(), &[shirt.clone()], ForestParams::default())?;
//!     let mapping = OrdinalMap::from_identities(vec!["sku-1".to_string()])?;
//!
//!     let store = IndexStore::new();
//!     store.publish(PublishedIndex::new(ann, mapping, "local:stub")?);
//!     let hits = store.search(shirt.as_slice(), 5)?;
//!     assert_eq!(hits[0].distance, 0.0);
//!     Ok(())
//! }
//! ```

mod ann;
mod artifacts;
mod combiner;
mod embedding_cache;
mod embeddings;
mod error;
mod index_store;
mod local;
mod mapping;
mod onnx;
mod paths;
mod remote;
mod types;

pub use ann::{angular_distance, AnnIndex, ForestParams, Node, DEFAULT_LEAF_SIZE, DEFAULT_TREES};
pub use artifacts::{
    load as load_artifacts, persist as persist_artifacts, read_header, ArtifactPaths, IndexHeader,
    INDEX_FORMAT, INDEX_FORMAT_VERSION, MAPPING_FORMAT_VERSION, METRIC,
};
pub use combiner::{normalize, Normalized, VectorCombiner};
pub use embedding_cache::{CachedEmbedder, EmbeddingCache};
pub use embeddings::{
    build_provider, with_cache, CacheConfig, EmbeddingBackend, EmbeddingConfig,
    EmbeddingProvider, JointEmbedder, LocalConfig, LocalEngine,
};
pub use error::{Result, VectorStoreError};
pub use index_store::{IndexMeta, IndexStore, PublishedIndex};
pub use local::{LocalEmbedder, Pooling, MANIFEST_FILE_NAME};
pub use mapping::OrdinalMap;
pub use paths::{
    data_dir_for_root, embedding_cache_dir, DATA_DIR_NAME, INDEX_FILE_NAME, MAPPING_FILE_NAME,
};
pub use remote::{RemoteConfig, RemoteEmbedder, MAX_REMOTE_RETRIES, MAX_RETRY_BACKOFF_MS};
pub use types::{JointVector, Modality, Neighbor};
