//! Axum-based HTTP query surface
//!
//! Handlers only ever touch `SharedState`: they read the latest snapshot and
//! write the operating mode. Nothing here blocks the control loop.

use crate::config::Config;
use crate::controls::OperatingMode;
use crate::driver::SharedState;
use crate::logging::get_logger;
use axum::body::Bytes;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::WatchStream;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

#[derive(Clone)]
pub struct AppState {
    pub shared: SharedState,
    pub config: Arc<Config>,
}

fn bad_request(message: String) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": message })),
    )
}

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": crate::APP_VERSION,
    }))
}

pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.shared.snapshot();
    Json(serde_json::to_value(&*snapshot).unwrap_or(serde_json::json!({"error":"serialization"})))
}

pub async fn status_stream(State(state): State<AppState>) -> impl IntoResponse {
    let stream = WatchStream::new(state.shared.subscribe_snapshot())
        .map(|snapshot| Event::default().event("status").json_data(&*snapshot));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub async fn get_mode(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({ "mode": state.shared.mode() }))
}

pub async fn set_mode(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    let value: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => return bad_request(format!("invalid JSON body: {}", e)),
    };
    let Some(raw) = value.get("mode").and_then(|m| m.as_str()) else {
        return bad_request("missing 'mode' (pv_surplus or monitor_only)".to_string());
    };
    let mode: OperatingMode = match raw.parse() {
        Ok(m) => m,
        Err(e) => return bad_request(e.to_string()),
    };

    let previous = state.shared.set_mode(mode);
    if previous != mode {
        get_logger("web").info(&format!("Mode set to {} (was {})", mode, previous));
    }
    (
        StatusCode::OK,
        Json(serde_json::json!({ "status": "ok", "mode": mode })),
    )
}

pub async fn get_config(State(state): State<AppState>) -> impl IntoResponse {
    Json(
        serde_json::to_value(state.config.as_ref())
            .unwrap_or(serde_json::json!({"error":"serialization"})),
    )
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/status", get(status))
        .route("/api/status/stream", get(status_stream))
        .route("/api/mode", get(get_mode).post(set_mode))
        .route("/api/config", get(get_config))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Bind and serve until `shutdown` resolves
pub async fn serve<F>(state: AppState, host: &str, port: u16, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = build_router(state);
    let logger = get_logger("web");

    let addr = match host.parse::<IpAddr>() {
        Ok(ip) => SocketAddr::new(ip, port),
        Err(_) => {
            logger.warn(&format!("Invalid host '{}'; falling back to 127.0.0.1", host));
            SocketAddr::from(([127, 0, 0, 1], port))
        }
    };

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    logger.info(&format!(
        "Web server listening at http://{}:{} (API /api)",
        local_addr.ip(),
        local_addr.port()
    ));

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    logger.info("Web server stopped");
    Ok(())
}
