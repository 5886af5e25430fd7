// HTTP request handlers
use crate::presentation::app_state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;

/// Health check endpoint with the publishing status
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.store.status())
}

/// Latest cycle report for every POD
pub async fn list_pods(State(state): State<Arc<AppState>>) -> Response {
    match state.store.latest() {
        Some(report) => Json(report.as_ref().clone()).into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "no poll cycle has completed yet" })),
        )
            .into_response(),
    }
}

/// Latest values for one POD by stable id
pub async fn get_pod(Path(pod_id): Path<String>, State(state): State<Arc<AppState>>) -> Response {
    let snapshot = state
        .store
        .latest()
        .and_then(|report| report.pods.get(&pod_id).cloned());

    match snapshot {
        Some(pod) => Json(pod).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("POD not found: {}", pod_id) })),
        )
            .into_response(),
    }
}

/// Ask the scheduler for an immediate cycle
pub async fn refresh(State(state): State<Arc<AppState>>) -> StatusCode {
    tracing::info!("Manual refresh requested");
    state.scheduler.request_refresh();
    StatusCode::ACCEPTED
}
