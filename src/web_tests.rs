#![cfg(test)]

use super::web::*;
use crate::config::Config;
use crate::controls::OperatingMode;
use crate::driver::{LiveSnapshot, SharedState};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use std::sync::Arc;
use tower::ServiceExt;

fn test_state(mode: OperatingMode) -> AppState {
    AppState {
        shared: SharedState::new(mode),
        config: Arc::new(Config::default()),
    }
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_mode(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/mode")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_ok() {
    let router = build_router(test_state(OperatingMode::PvSurplus));
    let response = router.oneshot(get_request("/api/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], crate::APP_VERSION);
}

#[tokio::test]
async fn status_returns_latest_snapshot() {
    let state = test_state(OperatingMode::PvSurplus);
    let mut snapshot = LiveSnapshot::initial(OperatingMode::PvSurplus);
    snapshot.pv_watts = 5200.0;
    snapshot.grid_watts = 1800.0;
    snapshot.wallbox_watts = 0.0;
    snapshot.total_ticks = 7;
    state.shared.publish(snapshot);

    let router = build_router(state);
    let response = router.oneshot(get_request("/api/status")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["pv_watts"], 5200.0);
    assert_eq!(body["grid_watts"], 1800.0);
    assert_eq!(body["total_ticks"], 7);
    assert_eq!(body["mode"], "pv_surplus");
}

#[tokio::test]
async fn get_mode_reports_current_mode() {
    let router = build_router(test_state(OperatingMode::MonitorOnly));
    let response = router.oneshot(get_request("/api/mode")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["mode"], "monitor_only");
}

#[tokio::test]
async fn set_mode_updates_shared_state() {
    let state = test_state(OperatingMode::PvSurplus);
    let mut mode_rx = state.shared.subscribe_mode();
    let router = build_router(state.clone());

    let response = router
        .oneshot(post_mode(r#"{"mode":"monitor_only"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["mode"], "monitor_only");

    assert_eq!(state.shared.mode(), OperatingMode::MonitorOnly);
    assert!(mode_rx.has_changed().unwrap());
}

#[tokio::test]
async fn set_mode_rejects_unknown_mode() {
    let state = test_state(OperatingMode::PvSurplus);
    let router = build_router(state.clone());
    let response = router
        .oneshot(post_mode(r#"{"mode":"turbo"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(response).await["error"].is_string());
    assert_eq!(state.shared.mode(), OperatingMode::PvSurplus);
}

#[tokio::test]
async fn set_mode_rejects_missing_field_and_bad_json() {
    let state = test_state(OperatingMode::PvSurplus);

    let response = build_router(state.clone())
        .oneshot(post_mode(r#"{"other":1}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = build_router(state.clone())
        .oneshot(post_mode("not json"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(state.shared.mode(), OperatingMode::PvSurplus);
}

#[tokio::test]
async fn config_is_exposed() {
    let router = build_router(test_state(OperatingMode::PvSurplus));
    let response = router.oneshot(get_request("/api/config")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["controls"]["voltage"], 230.0);
    assert_eq!(body["web"]["port"], 8080);
}

#[tokio::test]
async fn status_stream_is_event_stream() {
    let router = build_router(test_state(OperatingMode::PvSurplus));
    let response = router
        .oneshot(get_request("/api/status/stream"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    assert!(content_type.starts_with("text/event-stream"));

    // The first frame carries the current snapshot
    let mut body = response.into_body();
    let frame = body.frame().await.unwrap().unwrap();
    let data = frame.into_data().unwrap();
    let text = String::from_utf8_lossy(&data);
    assert!(text.contains("event: status"));
    assert!(text.contains("\"mode\":\"pv_surplus\""));
}
