//! Operational HTTP endpoints.
//!
//! - `/healthz`         : liveness
//! - `/readyz`          : readiness (503 once shutdown started)
//! - `/v1/connections`  : snapshot of the live registry

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

use crate::app_state::AppState;

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    if state.is_draining() {
        (StatusCode::SERVICE_UNAVAILABLE, "draining")
    } else {
        (StatusCode::OK, "ready")
    }
}

pub async fn connections(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registry().list(None))
}
