use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use lookalike_vector_store::{EmbeddingProvider, RemoteConfig, RemoteEmbedder, VectorStoreError};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Default)]
struct Hits {
    flaky: Arc<AtomicUsize>,
    down: Arc<AtomicUsize>,
    rejected: Arc<AtomicUsize>,
}

fn embedding(data: Vec<f32>) -> Json<Value> {
    Json(json!({
        "model_name": "mock",
        "outputs": [
            {"name": "other", "datatype": "FP32", "shape": [1, 1], "data": [9.0]},
            {"name": "embedding", "datatype": "FP32", "shape": [1, data.len()], "data": data}
        ]
    }))
}

async fn text_ok(Json(body): Json<Value>) -> Json<Value> {
    let text = body["inputs"][0]["data"][0].as_str().unwrap_or_default();
    assert_eq!(body["inputs"][0]["datatype"], "BYTES");
    embedding(vec![text.len() as f32, 1.0, 0.0, 0.0])
}

async fn image_echo(Json(body): Json<Value>) -> Json<Value> {
    let encoded = body["inputs"][0]["data"][0].as_str().unwrap_or_default();
    let bytes = BASE64.decode(encoded).unwrap_or_default();
    embedding(vec![bytes.len() as f32, 0.0, 0.0, 1.0])
}

async fn flaky(State(hits): State<Hits>) -> Result<Json<Value>, StatusCode> {
    if hits.flaky.fetch_add(1, Ordering::SeqCst) < 2 {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    Ok(embedding(vec![0.5; 4]))
}

async fn down(State(hits): State<Hits>) -> StatusCode {
    hits.down.fetch_add(1, Ordering::SeqCst);
    StatusCode::BAD_GATEWAY
}

async fn rejected(State(hits): State<Hits>) -> StatusCode {
    hits.rejected.fetch_add(1, Ordering::SeqCst);
    StatusCode::BAD_REQUEST
}

async fn short() -> Json<Value> {
    embedding(vec![1.0, 2.0, 3.0])
}

async fn slow() -> Json<Value> {
    tokio::time::sleep(Duration::from_millis(500)).await;
    embedding(vec![1.0; 4])
}

async fn spawn_triton(hits: Hits) -> SocketAddr {
    let app = Router::new()
        .route("/v2/models/text_ok/infer", post(text_ok))
        .route("/v2/models/image_echo/infer", post(image_echo))
        .route("/v2/models/flaky/infer", post(flaky))
        .route("/v2/models/down/infer", post(down))
        .route("/v2/models/rejected/infer", post(rejected))
        .route("/v2/models/short/infer", post(short))
        .route("/v2/models/slow/infer", post(slow))
        .with_state(hits);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    addr
}

fn embedder(addr: SocketAddr, text_model: &str, image_model: &str) -> RemoteEmbedder {
    let config = RemoteConfig {
        url: format!("http://{addr}"),
        text_model: text_model.to_string(),
        image_model: image_model.to_string(),
        model_version: None,
        timeout_ms: 200,
        max_retries: 2,
        retry_backoff_ms: 1,
    };
    RemoteEmbedder::new(&config, 4, 4).expect("remote embedder")
}

#[tokio::test]
async fn text_and_image_round_trip_through_the_protocol() {
    let addr = spawn_triton(Hits::default()).await;
    let remote = embedder(addr, "text_ok", "image_echo");

    let text = remote.embed_text("wool scarf").await.unwrap();
    assert_eq!(text, vec![10.0, 1.0, 0.0, 0.0]);

    let image = remote.embed_image(&[0xff, 0xd8, 0xff, 0xe0, 0x00]).await.unwrap();
    assert_eq!(image, vec![5.0, 0.0, 0.0, 1.0]);
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let hits = Hits::default();
    let addr = spawn_triton(hits.clone()).await;
    let remote = embedder(addr, "flaky", "image_echo");

    let vector = remote.embed_text("boots").await.unwrap();
    assert_eq!(vector, vec![0.5; 4]);
    assert_eq!(hits.flaky.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn exhausted_retries_report_unavailable() {
    let hits = Hits::default();
    let addr = spawn_triton(hits.clone()).await;
    let remote = embedder(addr, "down", "image_echo");

    let err = remote.embed_text("boots").await.unwrap_err();
    assert!(err.is_retryable());
    match err {
        VectorStoreError::EmbeddingUnavailable {
            attempts,
            last_error,
        } => {
            assert_eq!(attempts, 3);
            assert!(last_error.contains("502"), "{last_error}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(hits.down.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let hits = Hits::default();
    let addr = spawn_triton(hits.clone()).await;
    let remote = embedder(addr, "rejected", "image_echo");

    let err = remote.embed_text("boots").await.unwrap_err();
    assert!(matches!(err, VectorStoreError::EmbeddingError(_)), "{err}");
    assert_eq!(hits.rejected.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn wrong_output_length_is_a_dimension_mismatch() {
    let addr = spawn_triton(Hits::default()).await;
    let remote = embedder(addr, "short", "image_echo");

    let err = remote.embed_text("boots").await.unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(
        err,
        VectorStoreError::InvalidDimension {
            expected: 4,
            actual: 3,
            ..
        }
    ));
}

#[tokio::test]
async fn timeouts_count_as_transient() {
    let addr = spawn_triton(Hits::default()).await;
    let remote = embedder(addr, "slow", "image_echo");

    let err = remote.embed_text("boots").await.unwrap_err();
    assert!(
        matches!(err, VectorStoreError::EmbeddingUnavailable { attempts: 3, .. }),
        "{err}"
    );
}

#[tokio::test]
async fn unreachable_service_is_unavailable() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let remote = embedder(addr, "text_ok", "image_echo");

    let err = remote.embed_image(b"png").await.unwrap_err();
    assert!(err.is_retryable(), "{err}");
}
