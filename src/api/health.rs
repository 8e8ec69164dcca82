//! Health endpoint

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::AppState;

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        active_servers: state.client.active_count(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub active_servers: usize,
    pub version: String,
}
