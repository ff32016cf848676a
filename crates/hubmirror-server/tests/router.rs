//! Router tests against a wiremock upstream, driven with `oneshot`.

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use hubmirror_core::{Dispatcher, MirrorConfig};
use hubmirror_server::{router, AppState, X_CACHE};
use tempfile::TempDir;
use tower::ServiceExt;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn create_test_router(mock_server: &MockServer) -> (Router, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let config = MirrorConfig::default()
        .with_cache_dir(temp_dir.path())
        .with_upstream_url(mock_server.uri());
    let dispatcher = Dispatcher::from_config(&config).await.unwrap();
    (router(AppState::new(dispatcher)), temp_dir)
}

fn request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn header_str<'a>(response: &'a axum::response::Response, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

#[tokio::test]
async fn test_liveness() {
    let mock_server = MockServer::start().await;
    let (app, _temp_dir) = create_test_router(&mock_server).await;

    let response = app.oneshot(request(Method::GET, "/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");

    assert!(mock_server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_liveness_head() {
    let mock_server = MockServer::start().await;
    let (app, _temp_dir) = create_test_router(&mock_server).await;

    let response = app.oneshot(request(Method::HEAD, "/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(X_CACHE).is_none());

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(body.is_empty());

    assert!(mock_server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_get_miss_then_hit() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/org/model/resolve/main/config.json"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("{\"a\":1}", "application/json"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (app, temp_dir) = create_test_router(&mock_server).await;
    let uri = "/org/model/resolve/main/config.json";

    let first = app.clone().oneshot(request(Method::GET, uri)).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(header_str(&first, X_CACHE), Some("MISS"));
    assert_eq!(header_str(&first, "content-type"), Some("application/json"));
    assert_eq!(header_str(&first, "content-length"), Some("7"));
    let body = to_bytes(first.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"{\"a\":1}");

    let second = app.oneshot(request(Method::GET, uri)).await.unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(header_str(&second, X_CACHE), Some("HIT"));
    assert_eq!(header_str(&second, "content-type"), Some("application/json"));
    let body = to_bytes(second.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"{\"a\":1}");

    assert!(temp_dir
        .path()
        .join("org/model/resolve/main/config.json")
        .is_file());
}

#[tokio::test]
async fn test_trailing_slash_is_not_found() {
    let mock_server = MockServer::start().await;
    let (app, _temp_dir) = create_test_router(&mock_server).await;

    let response = app.oneshot(request(Method::GET, "/foo/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(json["error"].is_string());

    assert!(mock_server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_upstream_status_propagated() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/org/gated/config.json"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&mock_server)
        .await;

    let (app, temp_dir) = create_test_router(&mock_server).await;

    let response = app
        .oneshot(request(Method::GET, "/org/gated/config.json"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(!temp_dir.path().join("org/gated/config.json").exists());
}

#[tokio::test]
async fn test_head_probe_does_not_write() {
    let mock_server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/org/model/weights.bin"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (app, temp_dir) = create_test_router(&mock_server).await;

    let response = app
        .oneshot(request(Method::HEAD, "/org/model/weights.bin"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, X_CACHE), Some("MISS"));

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(body.is_empty());
    assert!(!temp_dir.path().join("org/model/weights.bin").exists());
}

#[tokio::test]
async fn test_api_passthrough() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/models/org/model"))
        .and(query_param("revision", "main"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("{\"id\":\"org/model\"}", "application/json")
                .insert_header("x-repo-commit", "abc123"),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let (app, temp_dir) = create_test_router(&mock_server).await;

    let response = app
        .oneshot(request(Method::GET, "/api/models/org/model?revision=main"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "x-repo-commit"), Some("abc123"));
    assert_eq!(
        header_str(&response, header::CONTENT_TYPE.as_str()),
        Some("application/json")
    );
    assert!(response.headers().get(X_CACHE).is_none());

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"{\"id\":\"org/model\"}");

    // Passthrough never populates the cache.
    assert!(!temp_dir.path().join("api").exists());
}

#[tokio::test]
async fn test_api_passthrough_status() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/models/org/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not here"))
        .mount(&mock_server)
        .await;

    let (app, _temp_dir) = create_test_router(&mock_server).await;

    let response = app
        .oneshot(request(Method::GET, "/api/models/org/missing"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"not here");
}

#[tokio::test]
async fn test_api_root_is_passthrough() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("{}", "application/json"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (app, temp_dir) = create_test_router(&mock_server).await;

    let response = app.oneshot(request(Method::GET, "/api")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(X_CACHE).is_none());

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"{}");
    assert!(!temp_dir.path().join("api").exists());
}
