use async_trait::async_trait;
use lookalike_catalog::{
    CatalogError, CatalogItem, ImageResolver, ImageSource, JsonCatalogStore,
};
use lookalike_search::{ProductSearch, QueryEngine, SearchError, SearchRequest};
use lookalike_vector_store::{
    AnnIndex, EmbeddingProvider, ForestParams, IndexStore, JointEmbedder, LocalEmbedder,
    OrdinalMap, PublishedIndex, VectorCombiner,
};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const TEXT_DIM: usize = 12;
const IMAGE_DIM: usize = 20;

/// Stub provider that counts how often it is asked for vectors.
struct Counting {
    inner: LocalEmbedder,
    calls: AtomicUsize,
}

#[async_trait]
impl EmbeddingProvider for Counting {
    fn fingerprint(&self) -> String {
        self.inner.fingerprint()
    }
    fn text_dimension(&self) -> usize {
        self.inner.text_dimension()
    }
    fn image_dimension(&self) -> usize {
        self.inner.image_dimension()
    }
    async fn embed_text(&self, text: &str) -> lookalike_vector_store::Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.embed_text(text).await
    }
    async fn embed_image(&self, image: &[u8]) -> lookalike_vector_store::Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.embed_image(image).await
    }
}

#[derive(Default)]
struct EchoImages {
    calls: AtomicUsize,
}

#[async_trait]
impl ImageResolver for EchoImages {
    async fn resolve(&self, source: &ImageSource) -> lookalike_catalog::Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reference = source.describe();
        if reference.contains("missing") {
            return Err(CatalogError::FetchError {
                reference,
                reason: "not found".to_string(),
            });
        }
        Ok(reference.into_bytes())
    }
}

struct Fixture {
    search: ProductSearch,
    provider: Arc<Counting>,
    images: Arc<EchoImages>,
}

fn catalog() -> Vec<CatalogItem> {
    ["1", "2", "3", "4", "5", "6"]
        .into_iter()
        .map(|id| {
            CatalogItem::new(
                id,
                format!("dress {id}"),
                "dresses",
                30.0,
                format!("img/{id}.jpg"),
            )
        })
        .collect()
}

async fn fixture(published: bool) -> Fixture {
    let provider = Arc::new(Counting {
        inner: LocalEmbedder::stub(TEXT_DIM, IMAGE_DIM),
        calls: AtomicUsize::new(0),
    });
    let embedder = JointEmbedder::new(
        provider.clone(),
        VectorCombiner::new(TEXT_DIM, IMAGE_DIM),
    )
    .unwrap();
    let items = catalog();

    let store = if published {
        let mut vectors = Vec::new();
        for item in &items {
            let vector = embedder
                .embed(Some(&item.embedding_text()), Some(item.image_url.as_bytes()))
                .await
                .unwrap();
            vectors.push(vector);
        }
        let ann = AnnIndex::build(embedder.dimension(), &vectors, ForestParams::default()).unwrap();
        let mapping =
            OrdinalMap::from_identities(items.iter().map(|i| i.id.clone()).collect()).unwrap();
        IndexStore::with_index(PublishedIndex::new(ann, mapping, "stub").unwrap())
    } else {
        IndexStore::new()
    };
    provider.calls.store(0, Ordering::SeqCst);

    let catalog = JsonCatalogStore::from_items(items).unwrap();
    let engine = QueryEngine::new(Arc::new(store), Arc::new(catalog));
    let images = Arc::new(EchoImages::default());
    Fixture {
        search: ProductSearch::new(engine, embedder, images.clone()),
        provider,
        images,
    }
}

#[tokio::test]
async fn indexed_item_is_found_by_its_own_inputs() {
    let fx = fixture(true).await;
    let request = SearchRequest::new(ImageSource::from_reference("img/4.jpg"))
        .with_text("dress 4 dresses")
        .with_k(3);

    let response = fx.search.search(&request).await.unwrap();
    assert_eq!(response.results.len(), 3);
    assert_eq!(response.results[0].item.id, "4");
    assert_eq!(response.results[0].rank, 0);
    assert!(response.results[0].distance < 1e-6);
    assert!(response.warnings.is_empty());
    assert!(!response.build_id.is_empty());
    assert_eq!(fx.provider.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn text_is_optional() {
    let fx = fixture(true).await;
    let request = SearchRequest::new(ImageSource::from_reference("img/2.jpg")).with_k(6);

    let response = fx.search.search(&request).await.unwrap();
    assert_eq!(response.results.len(), 6);
    let ranks: Vec<_> = response.results.iter().map(|r| r.rank).collect();
    assert_eq!(ranks, vec![0, 1, 2, 3, 4, 5]);
    for pair in response.results.windows(2) {
        assert!(pair[0].distance <= pair[1].distance);
    }
    assert_eq!(fx.provider.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn empty_request_fails_before_any_work() {
    let fx = fixture(true).await;
    let err = fx.search.search(&SearchRequest::default()).await.unwrap_err();

    assert!(matches!(err, SearchError::InputError(_)), "{err}");
    assert_eq!(fx.provider.calls.load(Ordering::SeqCst), 0);
    assert_eq!(fx.images.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn text_only_request_is_an_input_error() {
    let fx = fixture(true).await;
    let request = SearchRequest::default().with_text("summer dress");
    let err = fx.search.search(&request).await.unwrap_err();

    assert!(err.is_input_error());
    assert_eq!(fx.provider.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unpublished_index_is_retryable_and_skips_embedding() {
    let fx = fixture(false).await;
    let request = SearchRequest::new(ImageSource::from_reference("img/1.jpg"));
    let err = fx.search.search(&request).await.unwrap_err();

    assert!(err.is_retryable(), "{err}");
    assert_eq!(fx.provider.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unfetchable_query_image_is_reported() {
    let fx = fixture(true).await;
    let request = SearchRequest::new(ImageSource::from_reference("img/missing.jpg"));
    let err = fx.search.search(&request).await.unwrap_err();

    assert!(matches!(err, SearchError::ImageFetch(_)), "{err}");
    assert_eq!(fx.provider.calls.load(Ordering::SeqCst), 0);
}
