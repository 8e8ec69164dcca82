//! Server endpoints: status, tool listing, invocation, shutdown.

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::ApiError;
use super::AppState;
use crate::mcp_client::{InvokeResult, McpToolDefinition, ServerInfo};

/// Body of `POST /servers/{name}/invoke`.
#[derive(Debug, Deserialize)]
pub struct InvokeRequest {
    pub tool: String,
    #[serde(default, alias = "arguments")]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

/// GET /servers
pub async fn list_servers(State(state): State<AppState>) -> Json<Vec<ServerInfo>> {
    Json(state.client.list_server_info())
}

/// GET /servers/{name}/tools
pub async fn list_tools(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<McpToolDefinition>>, ApiError> {
    if !state.client.server_exists(&name) {
        return Err(ApiError::server_not_found(&name));
    }
    let tools = state
        .client
        .list_tools(&name)
        .await
        .map_err(|e| ApiError::BadGateway(e.to_string()))?;
    Ok(Json(tools))
}

/// POST /servers/{name}/invoke
pub async fn invoke(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<InvokeRequest>,
) -> Result<Json<InvokeResult>, ApiError> {
    if !state.client.server_exists(&name) {
        return Err(ApiError::server_not_found(&name));
    }
    let result = state
        .client
        .invoke(&name, &request.tool, request.params)
        .await;
    Ok(Json(result))
}

/// POST /servers/{name}/shutdown
pub async fn shutdown(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    if !state.client.server_exists(&name) {
        return Err(ApiError::server_not_found(&name));
    }
    state.client.shutdown(&name).await;
    Ok(Json(MessageResponse {
        message: format!("Server '{name}' shutdown"),
    }))
}
