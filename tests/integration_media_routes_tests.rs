//! HTTP-level tests driving the axum router directly.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use mediashelf::{
    config::{BackendDescriptor, BackendName},
    create_app,
    test_helpers::{
        create_test_app_state, create_test_app_state_with_config, jpeg_bytes, multipart_body, png_bytes,
        svg_bytes, test_config, FormPart, MULTIPART_BOUNDARY,
    },
    AppState,
};

const BASE_URL: &str = "http://localhost:8000";

struct TestApp {
    _dir: TempDir,
    state: Arc<AppState>,
    app: Router,
}

impl TestApp {
    async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let state = create_test_app_state(dir.path()).await;
        Self::from_state(dir, state)
    }

    fn from_state(dir: TempDir, state: Arc<AppState>) -> Self {
        let app = create_app(state.clone());
        Self { _dir: dir, state, app }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.into_body().collect().await.unwrap().to_bytes().to_vec();
        (status, headers, body)
    }

    async fn json(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let (status, _, bytes) = self.send(builder.body(body).unwrap()).await;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    async fn get(&self, uri: &str) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap()).await
    }

    async fn create_collection(&self, name: &str) -> String {
        let (status, body) = self
            .json(Method::POST, "/api/collections", Some(json!({ "name": name })))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body["id"].as_str().unwrap().to_string()
    }

    async fn upload(&self, uri: &str, parts: &[FormPart<'_>]) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", MULTIPART_BOUNDARY),
            )
            .body(Body::from(multipart_body(parts)))
            .unwrap();
        let (status, _, bytes) = self.send(request).await;
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }
}

/// Path and query of an absolute URL handed out by the API.
fn local_uri(url: &str) -> &str {
    url.strip_prefix(BASE_URL).unwrap_or(url)
}

#[tokio::test]
async fn test_health_and_openapi() {
    let app = TestApp::new().await;

    let (status, body) = app.json(Method::GET, "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = app.json(Method::GET, "/api/openapi.json", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/api/collections/{id}/assets"].is_object());
}

#[tokio::test]
async fn test_collection_lifecycle() {
    let app = TestApp::new().await;

    let (status, _) = app
        .json(Method::POST, "/api/collections", Some(json!({ "name": "   " })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let id = app.create_collection("Summer Trip").await;
    let (status, _) = app
        .json(Method::POST, "/api/collections", Some(json!({ "name": "Summer Trip" })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = app.json(Method::GET, &format!("/api/collections/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["slug"], "summer-trip");
    assert_eq!(body["assets"], json!([]));
    assert!(body["cover"].is_null());

    let (status, body) = app
        .json(
            Method::PUT,
            &format!("/api/collections/{}", id),
            Some(json!({ "layout": "masonry", "columns": 4 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["layout"], "masonry");
    assert_eq!(body["columns"], 4);
    assert_eq!(body["name"], "Summer Trip");

    let (status, body) = app.json(Method::GET, "/api/collections", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, _) = app.json(Method::DELETE, &format!("/api/collections/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.json(Method::GET, &format!("/api/collections/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_multi_file_upload_reports_per_file_results() {
    let app = TestApp::new().await;
    let id = app.create_collection("Mixed").await;
    let jpeg = jpeg_bytes(2000, 1000);

    let (status, body) = app
        .upload(
            &format!("/api/collections/{}/assets", id),
            &[
                FormPart::file("beach.jpg", "image/jpeg", &jpeg),
                FormPart::file("notes.txt", "text/plain", b"hello there"),
                FormPart::file("logo.svg", "image/svg+xml", &svg_bytes()),
            ],
        )
        .await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["success_count"], 2);
    assert_eq!(body["error_count"], 1);
    assert_eq!(body["errors"][0]["filename"], "notes.txt");
    assert_eq!(body["errors"][0]["category"], "content");

    let beach = &body["uploaded"][0];
    assert_eq!(beach["mime_type"], "image/jpeg");
    assert_eq!(beach["width"], 2000);
    assert!(beach["derivatives"]["thumb"].as_str().unwrap().contains("/media/file?path="));
    assert_eq!(beach["thumbnail_url"], beach["derivatives"]["thumb"]);

    let logo = &body["uploaded"][1];
    assert_eq!(logo["derivatives"], json!({}));
    assert_eq!(logo["thumbnail_url"], logo["url"]);
}

#[tokio::test]
async fn test_upload_edge_cases() {
    let app = TestApp::new().await;

    let missing = uuid::Uuid::new_v4();
    let (status, body) = app
        .upload(
            &format!("/api/collections/{}/assets", missing),
            &[FormPart::file("a.png", "image/png", &png_bytes(10, 10))],
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let id = app.create_collection("Empty form").await;
    let (status, _) = app
        .upload(
            &format!("/api/collections/{}/assets", id),
            &[FormPart::text("title", "nothing attached")],
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_upload_to_misconfigured_backend() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.backends.insert(
        BackendName::Media,
        BackendDescriptor {
            driver: "ftp".to_string(),
            ..Default::default()
        },
    );
    let state = create_test_app_state_with_config(config).await;
    let app = TestApp::from_state(dir, state);
    let id = app.create_collection("Broken backend").await;
    let png = png_bytes(10, 10);

    let (status, body) = app
        .upload(
            &format!("/api/collections/{}/assets", id),
            &[
                FormPart::text("backend", "media"),
                FormPart::file("a.png", "image/png", &png),
                FormPart::file("b.png", "image/png", &png),
            ],
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success_count"], 0);
    assert_eq!(body["error_count"], 2);
    for error in body["errors"].as_array().unwrap() {
        assert_eq!(error["error"], "Storage unavailable");
        assert_eq!(error["category"], "configuration");
    }

    // An unrecognized selector falls back to the default backend
    let (status, body) = app
        .upload(
            &format!("/api/collections/{}/assets?backend=dropbox", id),
            &[FormPart::file("c.png", "image/png", &png)],
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success_count"], 1);
    assert_eq!(body["uploaded"][0]["backend"], "local");
}

#[tokio::test]
async fn test_public_reads_and_conditional_requests() {
    let app = TestApp::new().await;
    let id = app.create_collection("Public").await;
    let png = png_bytes(400, 300);

    let (_, body) = app
        .upload(
            &format!("/api/collections/{}/assets", id),
            &[FormPart::file("map.png", "image/png", &png)],
        )
        .await;
    let asset = &body["uploaded"][0];
    let url = asset["url"].as_str().unwrap();

    let (status, headers, bytes) = app.get(local_uri(url)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bytes, png);
    assert_eq!(headers[header::CONTENT_TYPE], "image/png");
    assert_eq!(headers[header::CONTENT_LENGTH], png.len().to_string().as_str());
    assert_eq!(headers[header::CACHE_CONTROL], "public, max-age=31536000, immutable");
    assert_eq!(headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
    let etag = headers[header::ETAG].to_str().unwrap().to_string();
    assert_eq!(etag, format!("\"{}\"", asset["file_hash"].as_str().unwrap()));

    let request = Request::builder()
        .uri(local_uri(url))
        .header(header::IF_NONE_MATCH, etag.as_str())
        .body(Body::empty())
        .unwrap();
    let (status, _, bytes) = app.send(request).await;
    assert_eq!(status, StatusCode::NOT_MODIFIED);
    assert!(bytes.is_empty());

    let thumb_url = asset["derivatives"]["thumb"].as_str().unwrap();
    let (status, headers, bytes) = app.get(local_uri(thumb_url)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "image/png");
    let thumb = image::load_from_memory(&bytes).unwrap();
    assert_eq!((thumb.width(), thumb.height()), (150, 112));

    let (status, _, _) = app.get("/media/AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _, _) = app.get("/media/short").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _, _) = app.get("/media/file?path=../../etc/passwd").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let token = asset["public_token"].as_str().unwrap();
    let (status, _, _) = app
        .get(&format!("/media/file?path=secret%2Fother.png&token={}", token))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_svg_served_with_restrictive_policy() {
    let app = TestApp::new().await;
    let id = app.create_collection("Vectors").await;

    let (_, body) = app
        .upload(
            &format!("/api/collections/{}/assets", id),
            &[FormPart::file("logo.svg", "image/svg+xml", &svg_bytes())],
        )
        .await;
    let url = body["uploaded"][0]["url"].as_str().unwrap().to_string();

    let (status, headers, _) = app.get(local_uri(&url)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "image/svg+xml");
    assert!(headers[header::CONTENT_SECURITY_POLICY]
        .to_str()
        .unwrap()
        .contains("sandbox"));
}

#[tokio::test]
async fn test_reorder_validation() {
    let app = TestApp::new().await;
    let id = app.create_collection("Ordered").await;
    let png = png_bytes(10, 10);

    let (_, body) = app
        .upload(
            &format!("/api/collections/{}/assets", id),
            &[
                FormPart::file("a.png", "image/png", &png),
                FormPart::file("b.png", "image/png", &png),
            ],
        )
        .await;
    let a = body["uploaded"][0]["id"].as_str().unwrap().to_string();
    let b = body["uploaded"][1]["id"].as_str().unwrap().to_string();
    let uri = format!("/api/collections/{}/reorder", id);

    let (status, _) = app.json(Method::POST, &uri, Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.json(Method::POST, &uri, Some(json!({ "order": "a,b" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .json(Method::POST, &uri, Some(json!({ "order": [uuid::Uuid::new_v4().to_string()] })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app.json(Method::POST, &uri, Some(json!({ "order": [b, a] }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reordered"], 2);

    let (_, detail) = app.json(Method::GET, &format!("/api/collections/{}", id), None).await;
    assert_eq!(detail["assets"][0]["id"], json!(b));
    assert_eq!(detail["assets"][1]["id"], json!(a));

    let missing = format!("/api/collections/{}/reorder", uuid::Uuid::new_v4());
    let (status, _) = app.json(Method::POST, &missing, Some(json!({ "order": [] }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_asset_management_endpoints() {
    let app = TestApp::new().await;
    let id = app.create_collection("Managed").await;

    let (_, body) = app
        .upload(
            &format!("/api/collections/{}/assets", id),
            &[
                FormPart::file("first.jpg", "image/jpeg", &jpeg_bytes(800, 600)),
                FormPart::file("second.jpg", "image/jpeg", &jpeg_bytes(640, 480)),
            ],
        )
        .await;
    let first = body["uploaded"][0].clone();
    let second = body["uploaded"][1].clone();
    let first_id = first["id"].as_str().unwrap();
    let second_id = second["id"].as_str().unwrap();

    let (status, updated) = app
        .json(
            Method::PATCH,
            &format!("/api/assets/{}", first_id),
            Some(json!({ "title": "Harbour", "alt_text": "Boats at dusk" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["title"], "Harbour");
    assert_eq!(updated["alt_text"], "Boats at dusk");

    let (status, body) = app
        .json(Method::POST, &format!("/api/assets/{}/cover", second_id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["cover_url"], second["thumbnail_url"]);

    let (_, detail) = app.json(Method::GET, &format!("/api/collections/{}", id), None).await;
    assert_eq!(detail["cover"]["id"], second["id"]);

    // A collection with assets cannot be deleted
    let (status, _) = app.json(Method::DELETE, &format!("/api/collections/{}", id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = app.json(Method::DELETE, &format!("/api/assets/{}", second_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (status, _, _) = app.get(local_uri(second["url"].as_str().unwrap())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _, _) = app.get(local_uri(second["thumbnail_url"].as_str().unwrap())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // The cover moved to the remaining asset
    let collection = app
        .state
        .db
        .get_collection(uuid::Uuid::parse_str(&id).unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(collection.cover_asset_id.map(|c| c.to_string()), Some(first_id.to_string()));

    let (status, _) = app.json(Method::DELETE, &format!("/api/assets/{}", second_id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
