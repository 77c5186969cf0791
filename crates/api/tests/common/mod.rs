#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use giftreg_api::auth::jwt::{generate_access_token, JwtConfig};
use giftreg_api::config::{ReservationConfig, ServerConfig};
use giftreg_api::router::build_app_router;
use giftreg_api::state::AppState;
use giftreg_core::crypto::PiiCipher;
use giftreg_core::engine::ReservationEngine;
use giftreg_core::memory::{MemoryBackend, RecordingNotifier};
use giftreg_core::types::DbId;

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
        jwt: JwtConfig {
            secret: "test-secret-that-is-long-enough-for-hmac".to_string(),
            access_token_expiry_mins: 15,
        },
        reservations: ReservationConfig::default(),
        pii_master_key: None,
    }
}

/// A fully wired application over the in-process backend, with one owner,
/// one wish list holding two items, and one other registered user.
pub struct TestApp {
    pub app: Router,
    pub backend: Arc<MemoryBackend>,
    pub notifier: Arc<RecordingNotifier>,
    pub owner_id: DbId,
    pub friend_id: DbId,
    pub wish_list_id: DbId,
    pub teapot_id: DbId,
    pub kettle_id: DbId,
}

pub fn build_test_app() -> TestApp {
    let config = test_config();
    let backend = Arc::new(MemoryBackend::new());
    let notifier = Arc::new(RecordingNotifier::new());

    let owner_id = backend.add_user("Olive", Some("olive@example.com"));
    let friend_id = backend.add_user("Frank", Some("frank@example.com"));
    let wish_list_id = backend.add_wish_list(owner_id, "Birthday");
    let teapot_id = backend.add_item(wish_list_id, "Teapot");
    let kettle_id = backend.add_item(wish_list_id, "Kettle");

    let engine = ReservationEngine::new(
        backend.clone(),
        backend.clone(),
        backend.clone(),
        notifier.clone(),
        PiiCipher::disabled(),
        config.reservations.settings(),
    );

    let state = AppState {
        engine,
        pool: None,
        config: Arc::new(config.clone()),
    };

    TestApp {
        app: build_app_router(state, &config),
        backend,
        notifier,
        owner_id,
        friend_id,
        wish_list_id,
        teapot_id,
        kettle_id,
    }
}

/// `Authorization` header value for `user_id`.
pub fn bearer(user_id: DbId) -> String {
    let token = generate_access_token(user_id, &test_config().jwt).unwrap();
    format!("Bearer {token}")
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn send(app: Router, request: Request<Body>) -> Response<Body> {
    app.oneshot(request).await.unwrap()
}

pub async fn get(app: Router, uri: &str, headers: &[(&str, &str)]) -> Response<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    send(app, builder.body(Body::empty()).unwrap()).await
}

pub async fn post_json(
    app: Router,
    uri: &str,
    body: serde_json::Value,
    headers: &[(&str, &str)],
) -> Response<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    send(app, builder.body(Body::from(body.to_string())).unwrap()).await
}

/// POST with an arbitrary (possibly empty) body and no implied content type.
pub async fn post_raw(
    app: Router,
    uri: &str,
    body: &'static str,
    headers: &[(&str, &str)],
) -> Response<Body> {
    let mut builder = Request::builder().method("POST").uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    send(app, builder.body(Body::from(body)).unwrap()).await
}

pub async fn delete(app: Router, uri: &str, headers: &[(&str, &str)]) -> Response<Body> {
    let mut builder = Request::builder().method("DELETE").uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    send(app, builder.body(Body::empty()).unwrap()).await
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
