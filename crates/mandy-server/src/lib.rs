//! Mandy control-plane server library logic.

pub mod api;
pub mod api_sse;
pub mod config;
pub mod registry;

use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::{get, post},
    Extension, Json, Router,
};
use registry::AgentRegistry;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Per-room agent controllers and their last snapshots.
    pub registry: Arc<AgentRegistry>,
    /// Allowed CORS origins. Empty allows any origin.
    pub cors_origins: Vec<String>,
}

impl AppState {
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        Self {
            registry,
            cors_origins: Vec::new(),
        }
    }

    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = origins;
        self
    }
}

/// Maximum request body size (64 KiB). Control payloads are small JSON documents.
const MAX_REQUEST_BODY_BYTES: usize = 64 * 1024;

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

/// Builds the application router with all routes.
///
/// The control routes are served both at the root and under `/api`.
pub fn app(state: AppState) -> Router {
    let control_routes = Router::new()
        .route("/start", post(api::start_handler))
        .route("/control", post(api::control_handler))
        .route("/state", get(api::get_state_handler));

    let cors = cors_layer(&state.cors_origins);

    Router::new()
        .route("/healthz", get(health))
        .route("/events/state", get(api_sse::get_state_stream_handler))
        .merge(control_routes.clone())
        .nest("/api", control_routes)
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(Extension(Arc::new(state)))
}
