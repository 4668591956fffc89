use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use chunk_assembly_backend::config::UploadConfig;
use chunk_assembly_backend::services::storage::FilesystemStore;
use chunk_assembly_backend::services::upload_service::UploadService;
use chunk_assembly_backend::{AppState, create_app};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id};
use tracing::Subscriber;
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

async fn test_app(config: UploadConfig) -> Router {
    let store = FilesystemStore::new(&config.staging_dir, &config.upload_dir)
        .await
        .unwrap();
    let state = AppState {
        uploads: Arc::new(UploadService::new(Arc::new(store), &config)),
        config,
    };
    create_app(state)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, body.to_vec())
}

async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, body) = send(app, request).await;
    let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, value)
}

fn put_chunk(fingerprint: &str, index: u64, data: &[u8]) -> Request<Body> {
    Request::builder()
        .method("PUT")
        .uri(format!("/upload/{}/chunks/{}", fingerprint, index))
        .header("Content-Type", "application/octet-stream")
        .body(Body::from(data.to_vec()))
        .unwrap()
}

fn status_request(fingerprint: &str, name: &str) -> Request<Body> {
    Request::builder()
        .uri(format!("/upload/status?fingerprint={}&name={}", fingerprint, name))
        .body(Body::empty())
        .unwrap()
}

fn merge_request(fingerprint: &str, name: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/upload/merge")
        .header("Content-Type", "application/json")
        .body(Body::from(
            json!({"fingerprint": fingerprint, "name": name}).to_string(),
        ))
        .unwrap()
}

#[tokio::test]
async fn test_upload_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let config = UploadConfig::with_roots(dir.path().join("tmp"), dir.path().join("upload"));
    let app = test_app(config).await;

    // 1. Nothing staged yet
    let (status, body) = send_json(&app, status_request("abc123", "movie.mp4")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"already_complete": false, "present_indices": []}));

    // 2. Upload part of the file, out of order
    for (index, data) in [(2u64, &b"cc"[..]), (0, &b"aa"[..])] {
        let (status, body) = send_json(&app, put_chunk("abc123", index, data)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["index"], index);
        assert_eq!(body["size"], 2);
    }

    // 3. Merging now reports the gap
    let (status, body) = send_json(&app, merge_request("abc123", "movie.mp4")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("[1]"));

    // 4. Resume: status lists what is there, upload the rest
    let (_, body) = send_json(&app, status_request("abc123", "movie.mp4")).await;
    assert_eq!(body["present_indices"], json!([0, 2]));
    let (status, _) = send_json(&app, put_chunk("abc123", 1, b"bb")).await;
    assert_eq!(status, StatusCode::OK);

    // 5. Merge and fetch
    let (status, body) = send_json(&app, merge_request("abc123", "movie.mp4")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["url"], "http://localhost:3000/files/movie.mp4");
    assert_eq!(body["size"], 6);
    assert_eq!(body["chunk_count"], 3);

    let (status, bytes) = send(
        &app,
        Request::builder()
            .uri("/files/movie.mp4")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bytes, b"aabbcc");

    // 6. A later check short-circuits on the name
    let (_, body) = send_json(&app, status_request("abc123", "movie.mp4")).await;
    assert_eq!(
        body,
        json!({"already_complete": true, "url": "http://localhost:3000/files/movie.mp4"})
    );
}

#[tokio::test]
async fn test_multipart_chunk_upload() {
    let dir = tempfile::tempdir().unwrap();
    let config = UploadConfig::with_roots(dir.path().join("tmp"), dir.path().join("upload"));
    let app = test_app(config).await;

    let boundary = "chunkboundary";
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"d41d8cd9-3\"\r\nContent-Type: application/octet-stream\r\n\r\nhello\r\n--{b}--\r\n",
        b = boundary
    );
    let request = Request::builder()
        .method("POST")
        .uri("/upload/single")
        .header(
            "Content-Type",
            format!("multipart/form-data; boundary={}", boundary),
        )
        .body(Body::from(body))
        .unwrap();

    let (status, body) = send_json(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"fingerprint": "d41d8cd9", "index": 3, "size": 5}));

    let staged = dir.path().join("tmp").join("d41d8cd9").join("3");
    assert_eq!(std::fs::read(staged).unwrap(), b"hello");
}

#[tokio::test]
async fn test_rejects_bad_input() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = UploadConfig::with_roots(dir.path().join("tmp"), dir.path().join("upload"));
    config.max_chunk_size = Some(4);
    let app = test_app(config).await;

    // Path traversal in the fingerprint
    let (status, body) = send_json(&app, status_request("..", "a.bin")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    // Non-numeric index
    let request = Request::builder()
        .method("PUT")
        .uri("/upload/abc/chunks/first")
        .body(Body::from("x"))
        .unwrap();
    let (status, _) = send_json(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Over the chunk limit
    let (status, _) = send_json(&app, put_chunk("abc", 0, b"too large")).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    let staged = dir.path().join("tmp").join("abc");
    assert_eq!(std::fs::read_dir(staged).unwrap().count(), 0);

    // Nothing staged under this fingerprint
    let (status, _) = send_json(&app, merge_request("nothing", "a.bin")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_and_request_id() {
    let dir = tempfile::tempdir().unwrap();
    let config = UploadConfig::with_roots(dir.path().join("tmp"), dir.path().join("upload"));
    let app = test_app(config).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("x-request-id", "req-7")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-request-id").unwrap(), "req-7");

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["backend"], "filesystem");
    assert_eq!(body["staged_sessions"], 0);
}

/// Collects the `request_id` recorded on every `http_request` span.
#[derive(Clone, Default)]
struct RequestSpanRecorder {
    ids: Arc<Mutex<Vec<String>>>,
}

struct RequestIdVisitor(Option<String>);

impl Visit for RequestIdVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "request_id" {
            self.0 = Some(format!("{:?}", value));
        }
    }
}

impl<S: Subscriber> Layer<S> for RequestSpanRecorder {
    fn on_new_span(&self, attrs: &Attributes<'_>, _id: &Id, _ctx: Context<'_, S>) {
        if attrs.metadata().name() != "http_request" {
            return;
        }
        let mut visitor = RequestIdVisitor(None);
        attrs.record(&mut visitor);
        if let Some(id) = visitor.0 {
            self.ids.lock().unwrap().push(id);
        }
    }
}

#[tokio::test]
async fn test_request_span_carries_generated_request_id() {
    let recorder = RequestSpanRecorder::default();
    let subscriber = tracing_subscriber::registry().with(recorder.clone());
    let _default = tracing::subscriber::set_default(subscriber);

    let dir = tempfile::tempdir().unwrap();
    let config = UploadConfig::with_roots(dir.path().join("tmp"), dir.path().join("upload"));
    let app = test_app(config).await;

    // No x-request-id from the client: the server mints one
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let minted = response
        .headers()
        .get("x-request-id")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    let ids = recorder.ids.lock().unwrap().clone();
    assert_eq!(ids, vec![minted]);
}

#[tokio::test]
async fn test_abort_upload_discards_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let config = UploadConfig::with_roots(dir.path().join("tmp"), dir.path().join("upload"));
    let app = test_app(config).await;

    for index in 0..3u64 {
        let (status, _) = send_json(&app, put_chunk("abandoned", index, b"xx")).await;
        assert_eq!(status, StatusCode::OK);
    }

    let delete = || {
        Request::builder()
            .method("DELETE")
            .uri("/upload/abandoned")
            .body(Body::empty())
            .unwrap()
    };
    let (status, _) = send(&app, delete()).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(!dir.path().join("tmp").join("abandoned").exists());

    let (_, body) = send_json(&app, status_request("abandoned", "a.bin")).await;
    assert_eq!(body["present_indices"], json!([]));

    // Aborting twice is harmless
    let (status, _) = send(&app, delete()).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}
