use async_trait::async_trait;
use lookalike_catalog::{CatalogError, CatalogItem, CatalogStore, ImageResolver, ImageSource};
use lookalike_indexer::{BuildOptions, IndexBuilder, IndexerError};
use lookalike_vector_store::{
    ArtifactPaths, EmbeddingProvider, ForestParams, IndexStore, JointEmbedder, LocalEmbedder,
    VectorCombiner,
};
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;

struct FixedCatalog(Vec<CatalogItem>);

#[async_trait]
impl CatalogStore for FixedCatalog {
    async fn snapshot(&self) -> lookalike_catalog::Result<Vec<CatalogItem>> {
        Ok(self.0.clone())
    }

    async fn get_by_ids(
        &self,
        ids: &[String],
    ) -> lookalike_catalog::Result<HashMap<String, CatalogItem>> {
        Ok(self
            .0
            .iter()
            .filter(|item| ids.contains(&item.id))
            .map(|item| (item.id.clone(), item.clone()))
            .collect())
    }
}

/// Serves the reference itself as the image payload; references containing
/// "broken" fail like a dead link.
struct EchoImages;

#[async_trait]
impl ImageResolver for EchoImages {
    async fn resolve(&self, source: &ImageSource) -> lookalike_catalog::Result<Vec<u8>> {
        let reference = source.describe();
        if reference.contains("broken") {
            return Err(CatalogError::FetchError {
                reference,
                reason: "HTTP 404 Not Found".to_string(),
            });
        }
        Ok(reference.into_bytes())
    }
}

fn item(id: &str) -> CatalogItem {
    CatalogItem::new(id, format!("item {id}"), "tops", 10.0, format!("img/{id}.jpg"))
}

fn broken(id: &str) -> CatalogItem {
    CatalogItem::new(id, format!("item {id}"), "tops", 10.0, format!("img/broken-{id}.jpg"))
}

fn stub_embedder(text_dim: usize, image_dim: usize) -> JointEmbedder {
    JointEmbedder::new(
        Arc::new(LocalEmbedder::stub(text_dim, image_dim)),
        VectorCombiner::new(text_dim, image_dim),
    )
    .unwrap()
}

fn builder(items: Vec<CatalogItem>) -> IndexBuilder {
    IndexBuilder::new(
        Arc::new(FixedCatalog(items)),
        stub_embedder(16, 24),
        Arc::new(EchoImages),
    )
    .with_options(BuildOptions {
        sample_size: None,
        concurrency: 4,
        forest: ForestParams::default(),
    })
}

fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| (*v).to_string()).collect()
}

#[tokio::test]
async fn ordinals_follow_snapshot_order() {
    let items: Vec<_> = ["b", "a", "f", "c", "e", "d"].into_iter().map(item).collect();
    let outcome = builder(items).build().await.unwrap();

    assert_eq!(outcome.index.len(), 6);
    assert_eq!(
        outcome.index.mapping().identities(),
        ids(&["b", "a", "f", "c", "e", "d"]).as_slice()
    );
    for ordinal in 0..6 {
        assert!(outcome.index.identity(ordinal).is_some());
    }
    assert_eq!(outcome.report.attempted, 6);
    assert_eq!(outcome.report.indexed, 6);
    assert!(outcome.report.skipped.is_empty());
    assert_eq!(outcome.report.dimension, 40);
}

#[tokio::test]
async fn one_failing_item_is_skipped() {
    let items = vec![item("1"), item("2"), broken("3"), item("4"), item("5")];
    let outcome = builder(items).build().await.unwrap();

    assert_eq!(outcome.index.len(), 4);
    assert_eq!(
        outcome.index.mapping().identities(),
        ids(&["1", "2", "4", "5"]).as_slice()
    );
    assert_eq!(outcome.report.skipped.len(), 1);
    assert_eq!(outcome.report.skipped[0].identity, "3");
    assert!(outcome.report.skipped[0].reason.contains("404"));
}

#[tokio::test]
async fn duplicate_identities_keep_the_first() {
    let mut late = item("a");
    late.image_url = "img/other.jpg".to_string();
    let items = vec![item("a"), item("b"), late];
    let outcome = builder(items).build().await.unwrap();

    assert_eq!(outcome.index.mapping().identities(), ids(&["a", "b"]).as_slice());
    assert_eq!(outcome.report.skipped.len(), 1);
    assert_eq!(outcome.report.skipped[0].identity, "a");
}

#[tokio::test]
async fn sample_cap_takes_the_first_items() {
    let items: Vec<_> = (0..10).map(|i| item(&format!("sku-{i}"))).collect();
    let outcome = builder(items)
        .with_options(BuildOptions {
            sample_size: Some(1),
            concurrency: 2,
            forest: ForestParams::default(),
        })
        .build()
        .await
        .unwrap();

    assert_eq!(outcome.index.len(), 1);
    assert_eq!(outcome.index.identity(0), Some("sku-0"));
    assert_eq!(outcome.report.attempted, 1);
}

#[tokio::test]
async fn empty_snapshot_is_an_empty_build() {
    let err = builder(Vec::new()).build().await.err().expect("must fail");
    assert!(matches!(
        err,
        IndexerError::EmptyBuild {
            attempted: 0,
            skipped: 0
        }
    ));
}

#[tokio::test]
async fn total_failure_leaves_previous_artifacts_and_store_untouched() {
    let dir = TempDir::new().unwrap();
    let paths = ArtifactPaths::in_dir(dir.path());
    let store = IndexStore::new();

    let first = builder(vec![item("1"), item("2"), item("3")])
        .rebuild(&store, &paths)
        .await
        .unwrap();
    let index_before = std::fs::read(&paths.index).unwrap();
    let mapping_before = std::fs::read(&paths.mapping).unwrap();

    let err = builder(vec![broken("7"), broken("8")])
        .rebuild(&store, &paths)
        .await
        .err()
        .expect("all items fail");
    assert!(matches!(
        err,
        IndexerError::EmptyBuild {
            attempted: 2,
            skipped: 2
        }
    ));

    assert_eq!(std::fs::read(&paths.index).unwrap(), index_before);
    assert_eq!(std::fs::read(&paths.mapping).unwrap(), mapping_before);
    assert_eq!(store.current().unwrap().build_id(), first.build_id);
    assert_eq!(store.size(), 3);
}

#[tokio::test]
async fn rebuild_persists_a_loadable_pair() {
    let dir = TempDir::new().unwrap();
    let paths = ArtifactPaths::in_dir(&dir.path().join("nested"));
    let store = IndexStore::new();
    let report = builder(vec![item("x"), item("y")])
        .rebuild(&store, &paths)
        .await
        .unwrap();
    assert!(report.lock_wait_ms.is_some());

    let reloaded = IndexStore::new();
    let index = reloaded.load(&paths).await.unwrap();
    assert_eq!(index.build_id(), report.build_id);
    assert_eq!(index.mapping().identities(), ids(&["x", "y"]).as_slice());
}

#[tokio::test]
async fn self_retrieval_with_a_770_wide_joint_vector() {
    let embedder = stub_embedder(384, 386);
    let builder = IndexBuilder::new(
        Arc::new(FixedCatalog(vec![item("1"), item("2")])),
        embedder.clone(),
        Arc::new(EchoImages),
    );
    let dir = TempDir::new().unwrap();
    let store = IndexStore::new();
    builder
        .rebuild(&store, &ArtifactPaths::in_dir(dir.path()))
        .await
        .unwrap();
    assert_eq!(store.dimension(), Some(770));

    let first = item("1");
    let image = EchoImages
        .resolve(&ImageSource::from_reference(&first.image_url))
        .await
        .unwrap();
    let query = embedder
        .embed(Some(&first.embedding_text()), Some(&image))
        .await
        .unwrap();

    let snapshot = store.current().unwrap();
    let hits = snapshot.search(query.as_slice(), 2).unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(snapshot.identity(hits[0].ordinal), Some("1"));
    assert!(hits[0].distance < 1e-6);
    assert!(hits[1].distance >= hits[0].distance);
}

/// Claims 4+4 dimensions but returns 5 floats for images.
struct SkewedProvider;

#[async_trait]
impl EmbeddingProvider for SkewedProvider {
    fn fingerprint(&self) -> String {
        "skewed".to_string()
    }
    fn text_dimension(&self) -> usize {
        4
    }
    fn image_dimension(&self) -> usize {
        4
    }
    async fn embed_text(&self, _text: &str) -> lookalike_vector_store::Result<Vec<f32>> {
        Ok(vec![1.0; 4])
    }
    async fn embed_image(&self, _image: &[u8]) -> lookalike_vector_store::Result<Vec<f32>> {
        Ok(vec![1.0; 5])
    }
}

#[tokio::test]
async fn dimension_skew_aborts_the_build() {
    let embedder = JointEmbedder::new(Arc::new(SkewedProvider), VectorCombiner::new(4, 4)).unwrap();
    let builder = IndexBuilder::new(
        Arc::new(FixedCatalog(vec![item("1"), item("2")])),
        embedder,
        Arc::new(EchoImages),
    );
    let err = builder.build().await.err().expect("skew is fatal");
    assert!(err.is_fatal(), "{err}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rebuilds_never_expose_a_torn_pair_to_queries() {
    let dir = TempDir::new().unwrap();
    let paths = ArtifactPaths::in_dir(dir.path());
    let store = Arc::new(IndexStore::new());
    builder(vec![item("seed")]).rebuild(&store, &paths).await.unwrap();

    let probe = stub_embedder(16, 24)
        .embed(Some("item seed tops"), Some(&b"img/seed.jpg"[..]))
        .await
        .unwrap();

    let mut readers = Vec::new();
    for _ in 0..4 {
        let store = Arc::clone(&store);
        let probe = probe.clone();
        readers.push(tokio::spawn(async move {
            for _ in 0..500 {
                let snapshot = store.current().unwrap();
                assert_eq!(snapshot.ann().len(), snapshot.mapping().len());
                for hit in snapshot.search(probe.as_slice(), 8).unwrap() {
                    assert!(snapshot.identity(hit.ordinal).is_some());
                }
                tokio::task::yield_now().await;
            }
        }));
    }

    for size in [5usize, 2, 9, 3, 12] {
        let items = (0..size).map(|i| item(&format!("r{size}-{i}"))).collect();
        builder(items).rebuild(&store, &paths).await.unwrap();
    }
    for reader in readers {
        reader.await.unwrap();
    }
    assert_eq!(store.size(), 12);
}
