use crate::AppState;
use axum::{Json, extract::State, response::IntoResponse};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub storage: String,
    pub backend: String,
    pub staged_sessions: usize,
    pub version: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "System health status", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let store = state.uploads.store();

    // Listing the staging root doubles as a readability probe.
    let (storage_status, staged_sessions) = match store.list_sessions().await {
        Ok(sessions) => ("connected", sessions.len()),
        Err(e) => {
            tracing::warn!("Health check could not read staging root: {}", e);
            ("unavailable", 0)
        }
    };

    Json(HealthResponse {
        status: if storage_status == "connected" { "ok" } else { "degraded" }.to_string(),
        storage: storage_status.to_string(),
        backend: store.backend_name().to_string(),
        staged_sessions,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
