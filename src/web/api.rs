//! Defines the Axum API routes and handlers.

use crate::control::{ControlError, ControlHandle};
use crate::hub::HubHandle;
use crate::web::models::{TargetQuery, TargetResponse};
use crate::web::socket::serve_subscriber;
use axum::{
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use std::sync::Arc;

/// Helper to create a JSON error response with a message and status code
fn json_error(message: &str, status: StatusCode) -> axum::response::Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

pub struct AppStateInner {
    pub control: ControlHandle,
    pub hub: HubHandle,
    /// Outbound queue size for each WebSocket subscriber.
    pub queue_capacity: usize,
}
pub type AppState = Arc<AppStateInner>;

/// Creates the Axum router with all the API endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(get_frame).post(set_target))
        .route("/status", get(get_status))
        .route("/ws", get(telemetry_socket))
        .with_state(state)
}

/// GET / - the most recent control window.
async fn get_frame(State(state): State<AppState>) -> axum::response::Response {
    match state.control.latest_frame() {
        Some(frame) => (StatusCode::OK, Json(frame)).into_response(),
        None => json_error(
            "No control window has completed yet",
            StatusCode::SERVICE_UNAVAILABLE,
        ),
    }
}

/// POST /?target=<temperature>
async fn set_target(
    State(state): State<AppState>,
    Query(query): Query<TargetQuery>,
) -> axum::response::Response {
    let Some(raw) = query.target else {
        return json_error("Missing target query parameter", StatusCode::BAD_REQUEST);
    };
    let target = match raw.trim().parse::<f64>() {
        Ok(target) => target,
        Err(e) => {
            tracing::warn!("Error while parsing target {:?}: {}", raw, e);
            return json_error("Target must be a number", StatusCode::BAD_REQUEST);
        }
    };
    match state.control.set_target(target).await {
        Ok(()) => (StatusCode::OK, Json(TargetResponse { result: "ok", target })).into_response(),
        Err(e @ ControlError::InvalidTarget(_)) => {
            json_error(&e.to_string(), StatusCode::BAD_REQUEST)
        }
        Err(e) => json_error(&e.to_string(), StatusCode::CONFLICT),
    }
}

/// GET /status - the control loop state snapshot.
async fn get_status(State(state): State<AppState>) -> axum::response::Response {
    (StatusCode::OK, Json(state.control.status())).into_response()
}

/// GET /ws - upgrade to a live frame feed.
async fn telemetry_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> axum::response::Response {
    ws.on_upgrade(move |socket| serve_subscriber(socket, state))
}
