use crate::index_lock::acquire_build_lock;
use crate::limits::{clamp_build_concurrency, default_build_concurrency};
use crate::stats::{BuildReport, BuildSkip};
use crate::{IndexerError, Result};
use lookalike_catalog::{CatalogItem, CatalogStore, ImageResolver, ImageSource};
use lookalike_vector_store::{
    persist_artifacts, AnnIndex, ArtifactPaths, ForestParams, IndexStore, JointEmbedder,
    JointVector, OrdinalMap, PublishedIndex,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOptions {
    /// Index only the first `n` snapshot items.
    pub sample_size: Option<usize>,
    pub concurrency: usize,
    pub forest: ForestParams,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            sample_size: None,
            concurrency: default_build_concurrency(),
            forest: ForestParams::default(),
        }
    }
}

/// A freshly built, not yet published index.
pub struct BuildOutcome {
    pub index: PublishedIndex,
    pub report: BuildReport,
}

/// Turns a catalog snapshot into a [`PublishedIndex`].
///
/// Items whose image cannot be fetched or embedded are skipped and reported;
/// the build fails only if nothing could be indexed, or on dimension skew.
pub struct IndexBuilder {
    catalog: Arc<dyn CatalogStore>,
    embedder: JointEmbedder,
    images: Arc<dyn ImageResolver>,
    options: BuildOptions,
}

enum ItemOutcome {
    Embedded(JointVector),
    Failed(String),
}

impl IndexBuilder {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        embedder: JointEmbedder,
        images: Arc<dyn ImageResolver>,
    ) -> Self {
        Self {
            catalog,
            embedder,
            images,
            options: BuildOptions::default(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: BuildOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub const fn options(&self) -> &BuildOptions {
        &self.options
    }

    pub async fn build(&self) -> Result<BuildOutcome> {
        let start = Instant::now();
        if self.options.sample_size == Some(0) {
            return Err(IndexerError::InvalidConfig(
                "sample size must be at least 1".to_string(),
            ));
        }

        let mut items = self.catalog.snapshot().await?;
        if let Some(cap) = self.options.sample_size {
            items.truncate(cap);
        }
        let attempted = items.len();
        log::info!(
            "Building index over {attempted} catalog item(s) with {} worker(s)",
            clamp_build_concurrency(self.options.concurrency)
        );

        let mut skipped = Vec::new();
        let mut seen = HashSet::with_capacity(items.len());
        let mut unique = Vec::with_capacity(items.len());
        for item in items {
            if seen.insert(item.id.clone()) {
                unique.push(item);
            } else {
                log::warn!("Skipping duplicate catalog identity '{}'", item.id);
                skipped.push(BuildSkip {
                    identity: item.id,
                    reason: "duplicate identity in catalog snapshot".to_string(),
                });
            }
        }

        let outcomes = self.embed_all(&unique).await?;

        let mut vectors = Vec::with_capacity(unique.len());
        let mut identities = Vec::with_capacity(unique.len());
        for (item, outcome) in unique.into_iter().zip(outcomes) {
            match outcome {
                ItemOutcome::Embedded(vector) => {
                    vectors.push(vector);
                    identities.push(item.id);
                }
                ItemOutcome::Failed(reason) => {
                    log::warn!("Skipping catalog item '{}': {reason}", item.id);
                    skipped.push(BuildSkip {
                        identity: item.id,
                        reason,
                    });
                }
            }
        }

        if vectors.is_empty() {
            return Err(IndexerError::EmptyBuild {
                attempted,
                skipped: skipped.len(),
            });
        }

        let dimension = self.embedder.dimension();
        let forest = self.options.forest;
        let ann = tokio::task::spawn_blocking(move || AnnIndex::build(dimension, &vectors, forest))
            .await
            .map_err(|err| IndexerError::Other(format!("join forest build task: {err}")))??;
        let mapping = OrdinalMap::from_identities(identities)?;
        let provider = self.embedder.provider().fingerprint();
        let index = PublishedIndex::new(ann, mapping, provider.clone())?;

        let report = BuildReport {
            attempted,
            indexed: index.len(),
            skipped,
            dimension,
            trees: forest.trees,
            leaf_size: forest.leaf_size,
            build_id: index.build_id().to_string(),
            provider,
            elapsed_ms: start.elapsed().as_millis() as u64,
            lock_wait_ms: None,
        };
        log::info!(
            "Built index {}: {} indexed, {} skipped in {}ms",
            report.build_id,
            report.indexed,
            report.skipped.len(),
            report.elapsed_ms
        );
        Ok(BuildOutcome { index, report })
    }

    /// Build, persist both artifacts, then swap the result into `store`. On any
    /// failure the existing artifacts and `store` are left untouched.
    pub async fn rebuild(&self, store: &IndexStore, paths: &ArtifactPaths) -> Result<BuildReport> {
        let lock = acquire_build_lock(paths).await?;
        let BuildOutcome { index, mut report } = self.build().await?;
        persist_artifacts(&index, paths).await?;
        store.publish(index);
        report.lock_wait_ms = Some(lock.wait_ms());
        drop(lock);
        Ok(report)
    }

    /// Embed every item on a bounded pool. Outcomes come back in input order.
    async fn embed_all(&self, items: &[CatalogItem]) -> Result<Vec<ItemOutcome>> {
        let semaphore = Arc::new(Semaphore::new(clamp_build_concurrency(
            self.options.concurrency,
        )));
        let mut tasks = JoinSet::new();
        for (position, item) in items.iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let images = Arc::clone(&self.images);
            let embedder = self.embedder.clone();
            let text = item.embedding_text();
            let source = ImageSource::from_reference(&item.image_url);
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|err| IndexerError::Other(format!("worker pool closed: {err}")))?;
                let bytes = match images.resolve(&source).await {
                    Ok(bytes) => bytes,
                    Err(err) => return Ok((position, ItemOutcome::Failed(err.to_string()))),
                };
                match embedder.embed(Some(&text), Some(&bytes)).await {
                    Ok(vector) => Ok((position, ItemOutcome::Embedded(vector))),
                    Err(err) if err.is_fatal() => Err(IndexerError::from(err)),
                    Err(err) => Ok((position, ItemOutcome::Failed(err.to_string()))),
                }
            });
        }

        let mut slots: Vec<Option<ItemOutcome>> = Vec::with_capacity(items.len());
        slots.resize_with(items.len(), || None);
        while let Some(joined) = tasks.join_next().await {
            let (position, outcome) = joined
                .map_err(|err| IndexerError::Other(format!("embedding worker failed: {err}")))??;
            slots[position] = Some(outcome);
        }
        Ok(slots
            .into_iter()
            .map(|slot| slot.unwrap_or_else(|| ItemOutcome::Failed("no result".to_string())))
            .collect())
    }
}
