//! REST surface over the MCP client and the invocation history.

pub mod error;
pub mod health;
pub mod logs;
pub mod servers;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::invocation_log::InvocationLogger;
use crate::mcp_client::McpClient;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub client: Arc<McpClient>,
    pub logger: Arc<dyn InvocationLogger>,
}

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Servers
        .route("/servers", get(servers::list_servers))
        .route("/servers/{name}/tools", get(servers::list_tools))
        .route("/servers/{name}/invoke", post(servers::invoke))
        .route("/servers/{name}/shutdown", post(servers::shutdown))
        // Invocation history
        .route("/logs", get(logs::recent))
        .route("/logs/stats", get(logs::stats))
        .route("/logs/patterns", get(logs::patterns))
        // Health
        .route("/health", get(health::health_check))
        .with_state(state)
}
