//! HTTP integration tests for the media API
//!
//! Drives the full router over in-memory gateways.
//!
//! Run with: `cargo test --test api_test -- --nocapture`

use axum::body::Body;
use axum::http::{Method, Request, Response, StatusCode};
use axum::Router;
use chrono::Utc;
use http_body_util::BodyExt;
use image::{DynamicImage, ImageFormat, RgbImage};
use media_service::config::ApiConfig;
use media_service::object_store::image_key;
use media_service::{
    create_router, AppState, InMemoryMetadataStore, InMemoryObjectStore, MetadataRecord,
    MetadataStore, ObjectStore,
};
use serde_json::{json, Value};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use uuid::Uuid;

const BUCKET: &str = "media-bucket";

struct TestApp {
    router: Router,
    metadata: Arc<InMemoryMetadataStore>,
    objects: Arc<InMemoryObjectStore>,
}

impl TestApp {
    fn new() -> Self {
        // Small pages so full-table queries follow cursors
        let metadata = Arc::new(InMemoryMetadataStore::with_page_size(2));
        let objects = Arc::new(InMemoryObjectStore::new());
        let state = AppState::new(
            metadata.clone(),
            objects.clone(),
            BUCKET,
            Duration::from_secs(3600),
            32,
        );

        Self {
            router: create_router(state, &ApiConfig::default()),
            metadata,
            objects,
        }
    }

    async fn oneshot(&self, req: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(req).await.unwrap()
    }

    async fn post_json(&self, uri: &str, body: Value) -> Response<Body> {
        let req = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.oneshot(req).await
    }

    async fn get(&self, uri: &str) -> Response<Body> {
        let req = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        self.oneshot(req).await
    }

    async fn put(&self, uri: &str, body: impl Into<Body>) -> Response<Body> {
        let req = Request::builder()
            .method(Method::PUT)
            .uri(uri)
            .header("Content-Type", "application/json")
            .body(body.into())
            .unwrap();
        self.oneshot(req).await
    }

    async fn seed(&self, filename: &str, uploaded: bool) -> MetadataRecord {
        let mut record = MetadataRecord::new(Uuid::new_v4().to_string(), filename, Utc::now());
        record.is_uploaded = uploaded;
        self.metadata.put(&record).await.unwrap();
        record
    }

    /// Upload a PNG the way a client would with its presigned URL
    async fn upload(&self, id: &str, filename: &str, width: u32, height: u32) -> String {
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(RgbImage::new(width, height))
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();

        let key = image_key(id, filename);
        self.objects
            .put(BUCKET, &key, buf.into_inner(), "image/png")
            .await
            .unwrap();
        key
    }
}

async fn body_to_json(resp: Response<Body>) -> Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn notification(key: &str, size: u64) -> Value {
    let event = json!({
        "Records": [{
            "s3": {
                "bucket": { "name": BUCKET },
                "object": { "key": key, "size": size }
            }
        }]
    });
    json!({ "Records": [{ "Sns": { "Message": event.to_string() } }] })
}

// ============================================================================
// Upload intake
// ============================================================================

#[tokio::test]
async fn test_create_metadata_issues_put_url() {
    let app = TestApp::new();

    let resp = app.post_json("/metadata", json!({ "filename": "dog.png" })).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "application/json"
    );

    let body = body_to_json(resp).await;
    let id = body["metadata"]["id"].as_str().unwrap().to_string();
    assert!(Uuid::parse_str(&id).is_ok());
    assert_eq!(body["metadata"]["filename"], "dog.png");
    assert_eq!(body["metadata"]["isUploaded"], false);
    assert!(body["metadata"]["createdAt"].is_i64());

    let url = &body["preSignedUrl"];
    assert_eq!(url["id"], id.as_str());
    assert_eq!(url["method"], "PUT");
    assert_eq!(url["expiresIn"], 3600);
    assert!(url["url"]
        .as_str()
        .unwrap()
        .contains(&format!("images/{id}/dog.png")));

    let stored = app.metadata.get(&id).await.unwrap().unwrap();
    assert_eq!(stored.filename, "dog.png");
    assert!(!stored.is_uploaded);
}

#[tokio::test]
async fn test_create_metadata_requires_json_content_type() {
    let app = TestApp::new();

    let req = Request::builder()
        .method(Method::POST)
        .uri("/metadata")
        .header("Content-Type", "text/plain")
        .body(Body::from(r#"{"filename":"dog.png"}"#))
        .unwrap();
    let resp = app.oneshot(req).await;

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_to_json(resp).await,
        json!({ "message": "ContentType of body is not \"application/json\"." })
    );
}

#[tokio::test]
async fn test_create_metadata_validation_messages() {
    let app = TestApp::new();

    let req = Request::builder()
        .method(Method::POST)
        .uri("/metadata")
        .header("Content-Type", "application/json")
        .body(Body::from("hoge"))
        .unwrap();
    let resp = app.oneshot(req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_to_json(resp).await["message"],
        "Request body is not json format."
    );

    for body in [json!({}), json!({ "filename": 42 }), json!(["dog.png"])] {
        let resp = app.post_json("/metadata", body).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_to_json(resp).await["message"], "filename is not string.");
    }

    let resp = app.post_json("/metadata", json!({ "filename": "画像.png" })).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_to_json(resp).await["message"],
        "filename can use next chars. regex [a-zA-Z0-9_\\-.]"
    );

    assert!(app.metadata.scan_all().await.unwrap().is_empty());
}

// ============================================================================
// Query
// ============================================================================

#[tokio::test]
async fn test_get_unknown_record_is_not_found() {
    let app = TestApp::new();

    let resp = app.get(&format!("/metadata/{}", Uuid::new_v4())).await;

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_to_json(resp).await, json!({ "message": "not found" }));
}

#[tokio::test]
async fn test_get_with_invalid_id_is_bad_request() {
    let app = TestApp::new();

    let resp = app.get("/metadata/test_id").await;

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_to_json(resp).await, json!({ "message": "id is invalid." }));
}

#[tokio::test]
async fn test_get_attaches_url_only_when_uploaded() {
    let app = TestApp::new();
    let pending = app.seed("pending.png", false).await;
    let uploaded = app.seed("done.png", true).await;

    let body = body_to_json(app.get(&format!("/metadata/{}", pending.id)).await).await;
    assert_eq!(body["metadata"]["filename"], "pending.png");
    assert!(body["preSignedUrl"].is_null());

    let body = body_to_json(app.get(&format!("/metadata/{}", uploaded.id)).await).await;
    assert_eq!(body["preSignedUrl"]["method"], "GET");
    assert!(body["preSignedUrl"]["url"]
        .as_str()
        .unwrap()
        .contains(&format!("images/{}/done.png", uploaded.id)));
}

#[tokio::test]
async fn test_list_returns_urls_for_uploaded_records_only() {
    let app = TestApp::new();
    let mut uploaded_ids = Vec::new();
    for i in 0..5 {
        let record = app.seed(&format!("img{i}.png"), i % 2 == 0).await;
        if record.is_uploaded {
            uploaded_ids.push(record.id);
        }
    }

    let resp = app.get("/metadata").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_to_json(resp).await;

    let metadata = body["metadata"].as_array().unwrap();
    assert_eq!(metadata.len(), 5);

    let urls = body["preSignedUrls"].as_array().unwrap();
    assert_eq!(urls.len(), 3);

    // Same relative order as the metadata list
    let expected: Vec<&Value> = metadata
        .iter()
        .filter(|m| m["isUploaded"] == true)
        .map(|m| &m["id"])
        .collect();
    let actual: Vec<&Value> = urls.iter().map(|u| &u["id"]).collect();
    assert_eq!(actual, expected);

    for url in urls {
        assert_eq!(url["method"], "GET");
        assert!(uploaded_ids.iter().any(|id| url["id"] == id.as_str()));
    }
}

#[tokio::test]
async fn test_list_empty_table() {
    let app = TestApp::new();

    let body = body_to_json(app.get("/metadata").await).await;

    assert_eq!(body, json!({ "metadata": [], "preSignedUrls": [] }));
}

// ============================================================================
// Replace
// ============================================================================

#[tokio::test]
async fn test_replace_with_new_filename_resets_upload() {
    let app = TestApp::new();
    let record = app.seed("dog.png", true).await;

    let resp = app
        .put(
            &format!("/metadata/{}", record.id),
            json!({ "filename": "cat.png" }).to_string(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body_to_json(resp).await;
    assert_eq!(body["metadata"]["filename"], "cat.png");
    assert_eq!(body["metadata"]["isUploaded"], false);
    assert!(body["metadata"]["updatedAt"].is_i64());
    assert_eq!(body["preSignedUrl"]["method"], "PUT");
    assert!(body["preSignedUrl"]["url"]
        .as_str()
        .unwrap()
        .contains(&format!("images/{}/cat.png", record.id)));

    let stored = app.metadata.get(&record.id).await.unwrap().unwrap();
    assert_eq!(stored.filename, "cat.png");
    assert!(!stored.is_uploaded);
}

#[tokio::test]
async fn test_replace_without_filename_keeps_record() {
    let app = TestApp::new();
    let record = app.seed("dog.png", true).await;

    for body in ["", "not json", "null", "[]", r#"{"filename": null}"#, "{}"] {
        let resp = app.put(&format!("/metadata/{}", record.id), body).await;
        assert_eq!(resp.status(), StatusCode::OK, "body {body:?}");

        let json = body_to_json(resp).await;
        assert_eq!(json["metadata"]["filename"], "dog.png");
        assert_eq!(json["metadata"]["isUploaded"], true);
        assert!(json["preSignedUrl"]["url"]
            .as_str()
            .unwrap()
            .contains(&format!("images/{}/dog.png", record.id)));
    }

    let stored = app.metadata.get(&record.id).await.unwrap().unwrap();
    assert_eq!(stored, record);
}

#[tokio::test]
async fn test_replace_errors() {
    let app = TestApp::new();
    let record = app.seed("dog.png", false).await;

    let resp = app.put("/metadata/nope", "{}").await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_to_json(resp).await["message"], "id is invalid.");

    let resp = app
        .put(&format!("/metadata/{}", Uuid::new_v4()), r#"{"filename":"a.png"}"#)
        .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = app
        .put(&format!("/metadata/{}", record.id), r#"{"filename":"a b.png"}"#)
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_to_json(resp).await["message"],
        "filename can use next chars. regex [a-zA-Z0-9_\\-.]"
    );

    let resp = app
        .put(&format!("/metadata/{}", record.id), r#"{"filename":1}"#)
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_to_json(resp).await["message"], "filename is not string.");
}

// ============================================================================
// Storage notifications
// ============================================================================

#[tokio::test]
async fn test_upload_lifecycle() {
    let app = TestApp::new();

    let body = body_to_json(app.post_json("/metadata", json!({ "filename": "dog.png" })).await).await;
    let id = body["metadata"]["id"].as_str().unwrap().to_string();
    let key = app.upload(&id, "dog.png", 200, 100).await;

    let resp = app.post_json("/events/analysis", notification(&key, 12345)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_to_json(resp).await;
    assert_eq!(body["metadata"]["isUploaded"], true);
    assert_eq!(body["metadata"]["size"], 12345);
    assert_eq!(body["metadata"]["width"], 200);
    assert_eq!(body["metadata"]["height"], 100);

    let resp = app.post_json("/events/thumbnail", notification(&key, 12345)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_to_json(resp).await["metadata"]["hasThumbnail"], true);

    let thumbnail = app
        .objects
        .object(BUCKET, &format!("thumbnails/{id}/dog.png"))
        .expect("thumbnail stored");
    assert_eq!(thumbnail.content_type, "image/png");
    let decoded = image::load_from_memory(&thumbnail.data).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (32, 32));

    let body = body_to_json(app.get(&format!("/metadata/{id}")).await).await;
    assert_eq!(body["preSignedUrl"]["method"], "GET");
}

#[tokio::test]
async fn test_notification_for_unknown_record_fails() {
    let app = TestApp::new();
    let id = Uuid::new_v4().to_string();
    let key = app.upload(&id, "dog.png", 10, 10).await;

    let resp = app.post_json("/events/analysis", notification(&key, 1)).await;

    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body_to_json(resp).await,
        json!({ "message": "InternalServerError" })
    );
    assert!(app.metadata.get(&id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_malformed_notification_fails() {
    let app = TestApp::new();

    let resp = app
        .post_json("/events/thumbnail", json!({ "Records": [] }))
        .await;

    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_health_and_readiness() {
    let app = TestApp::new();

    let body = body_to_json(app.get("/health").await).await;
    assert_eq!(body["status"], "healthy");

    let resp = app.get("/ready").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_to_json(resp).await["status"], "ready");
}
