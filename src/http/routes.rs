//! HTTP route definitions

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::app::AppState;
use crate::server::ServerStats;
use crate::util::time::uptime_secs;
use crate::world::{ElementId, ElementType, Vector3};

/// Build the status router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/elements/:id", get(element_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    clients: usize,
    elements: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        clients: state.server.clients().connected_count(),
        elements: state.server.repository().len(),
    })
}

// ============================================================================
// Stats endpoint
// ============================================================================

async fn stats_handler(State(state): State<AppState>) -> Json<ServerStats> {
    Json(state.server.stats())
}

// ============================================================================
// Element lookup
// ============================================================================

#[derive(Serialize)]
struct ElementResponse {
    id: ElementId,
    element_type: ElementType,
    parent: Option<ElementId>,
    position: Vector3,
    rotation: Vector3,
}

async fn element_handler(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> Result<Json<ElementResponse>, AppError> {
    state
        .server
        .repository()
        .with_element(ElementId(id), |element| ElementResponse {
            id: element.id(),
            element_type: element.element_type(),
            parent: element.parent(),
            position: element.position,
            rotation: element.rotation,
        })
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("element {id}")))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
