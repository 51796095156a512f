use crate::{Result, SearchError};
use lookalike_catalog::{CatalogItem, CatalogStore};
use lookalike_vector_store::{IndexStore, JointVector, PublishedIndex, VectorStoreError};
use serde::Serialize;
use std::sync::Arc;

/// One ranked hit, not yet joined with catalog data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub identity: String,
    pub distance: f32,
    pub rank: usize,
}

/// A hit joined with its catalog item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedResult {
    pub rank: usize,
    pub distance: f32,
    #[serde(flatten)]
    pub item: CatalogItem,
}

/// An indexed identity the catalog no longer knows about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartialResolution {
    pub identity: String,
    /// Rank the identity held before it was dropped.
    pub rank: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Resolved {
    pub results: Vec<ResolvedResult>,
    pub unresolved: Vec<PartialResolution>,
}

/// k-NN lookups against the published index, answered in catalog identities.
#[derive(Clone)]
pub struct QueryEngine {
    store: Arc<IndexStore>,
    catalog: Arc<dyn CatalogStore>,
}

impl QueryEngine {
    pub fn new(store: Arc<IndexStore>, catalog: Arc<dyn CatalogStore>) -> Self {
        Self { store, catalog }
    }

    #[must_use]
    pub const fn store(&self) -> &Arc<IndexStore> {
        &self.store
    }

    /// Top-`k` identities by ascending distance from one snapshot of the store.
    pub fn search(&self, query: &JointVector, k: usize) -> Result<Vec<SearchResult>> {
        validate_k(k)?;
        let snapshot = self.store.current()?;
        search_in(&snapshot, query, k)
    }

    /// Join results with the catalog. Identities the catalog cannot resolve are
    /// dropped and reported; ranks are renumbered from 0.
    pub async fn resolve(&self, results: Vec<SearchResult>) -> Result<Resolved> {
        if results.is_empty() {
            return Ok(Resolved::default());
        }
        let ids: Vec<String> = results.iter().map(|r| r.identity.clone()).collect();
        let mut items = self.catalog.get_by_ids(&ids).await?;

        let mut resolved = Resolved::default();
        for result in results {
            match items.remove(&result.identity) {
                Some(item) => resolved.results.push(ResolvedResult {
                    rank: resolved.results.len(),
                    distance: result.distance,
                    item,
                }),
                None => {
                    log::warn!(
                        "Indexed identity '{}' (rank {}) is missing from the catalog",
                        result.identity,
                        result.rank
                    );
                    resolved.unresolved.push(PartialResolution {
                        identity: result.identity,
                        rank: result.rank,
                    });
                }
            }
        }
        Ok(resolved)
    }
}

pub(crate) fn validate_k(k: usize) -> Result<()> {
    if k == 0 {
        return Err(SearchError::input("k must be at least 1"));
    }
    Ok(())
}

/// Search a pinned snapshot; every ordinal is resolved through the same
/// snapshot's mapping.
pub(crate) fn search_in(
    snapshot: &PublishedIndex,
    query: &JointVector,
    k: usize,
) -> Result<Vec<SearchResult>> {
    let neighbors = snapshot.search(query.as_slice(), k)?;
    log::debug!(
        "Index {} returned {} neighbor(s) for k={k}",
        snapshot.build_id(),
        neighbors.len()
    );
    neighbors
        .into_iter()
        .enumerate()
        .map(|(rank, neighbor)| {
            let identity = snapshot.identity(neighbor.ordinal).ok_or_else(|| {
                VectorStoreError::IndexCorruption(format!(
                    "ordinal {} has no identity in mapping of build {}",
                    neighbor.ordinal,
                    snapshot.build_id()
                ))
            })?;
            Ok(SearchResult {
                identity: identity.to_string(),
                distance: neighbor.distance,
                rank,
            })
        })
        .collect()
}
