//! # Lookalike Indexer
//!
//! Builds the similarity index from a catalog snapshot.
//!
//! ## Pipeline
//!
//! ```text
//! CatalogStore::snapshot (capped to the sample size)
//!     │
//!     ├──> Worker pool (bounded)
//!     │      ├─> ImageResolver: image bytes
//!     │      └─> JointEmbedder: "{name} {category}" + image
//!     │
//!     ├──> Ordinals assigned in snapshot order (failures skipped)
//!     │
//!     ├──> AnnIndex forest (blocking thread)
//!     │
//!     └──> index.json + mapping.json, then IndexStore swap
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use lookalike_catalog::{DefaultImageResolver, JsonCatalogStore};
//! use lookalike_indexer::IndexBuilder;
//! use lookalike_vector_store::{
//!     ArtifactPaths, IndexStore, JointEmbedder, LocalEmbedder, VectorCombiner,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let catalog = Arc::new(JsonCatalogStore::open("catalog.json").await?);
//!     let images = Arc::new(DefaultImageResolver::new()?);
//!     let embedder = JointEmbedder::new(
//!         Arc::new(LocalEmbedder::stub(768, 768)),
//!         VectorCombiner::new(768, 768),
//!     )?;
//!
//!     let store = IndexStore::new();
//!     let report = IndexBuilder::new(catalog, embedder, images)
//!         .rebuild(&store, &ArtifactPaths::in_dir(".lookalike".as_ref()))
//!         .await?;
//!     println!("Indexed {} of {} items", report.indexed, report.attempted);
//!     Ok(())
//! }
//! ```

mod builder;
mod error;
mod index_lock;
mod limits;
mod stats;

pub use builder::{BuildOptions, BuildOutcome, IndexBuilder};
pub use error::{IndexerError, Result};
pub use limits::{
    clamp_build_concurrency, default_build_concurrency, parse_build_concurrency,
    MAX_BUILD_CONCURRENCY,
};
pub use stats::{BuildReport, BuildSkip};
