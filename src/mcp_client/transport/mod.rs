//! Transport contract and the protocol pieces shared by both variants.
//!
//! A transport owns one live session with one backend. Two variants exist:
//! - [`StdioTransport`]: child process, line-delimited JSON over stdin/stdout
//! - [`SseTransport`]: HTTP endpoint, JSON-RPC replies carried as SSE `data:` lines

pub mod sse;
pub mod stdio;

use std::sync::atomic::{AtomicU8, Ordering};

use async_trait::async_trait;
use serde_json::Value;

use super::errors::McpError;
use super::types::{CallToolResult, JsonRpcResponse, McpToolDefinition, ToolsListResult};

pub use sse::SseTransport;
pub use stdio::StdioTransport;

// ─── Protocol Constants ──────────────────────────────────────────────────────

/// MCP protocol revision announced in the handshake.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Client identity announced in the handshake.
pub const CLIENT_NAME: &str = "mcp-bridge";
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
pub const METHOD_TOOLS_LIST: &str = "tools/list";
pub const METHOD_TOOLS_CALL: &str = "tools/call";

// ─── Contract ────────────────────────────────────────────────────────────────

/// Lifecycle state of a transport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Uninitialized,
    Ready,
    Disposed,
}

/// One session with one MCP backend.
///
/// `initialize` must complete before `list_tools`/`call_tool`; both fail with
/// [`McpError::NotInitialized`] otherwise. `dispose` is idempotent and never
/// fails.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Name of the backend this transport talks to.
    fn server_name(&self) -> &str;

    fn state(&self) -> TransportState;

    /// Connect and perform the `initialize`/`initialized` handshake.
    /// A second call on a ready session is a no-op.
    async fn initialize(&self) -> Result<(), McpError>;

    /// `tools/list`. Empty when the backend returns none or never replies.
    async fn list_tools(&self) -> Result<Vec<McpToolDefinition>, McpError>;

    /// `tools/call`. A missing reply yields [`CallToolResult::no_response`].
    async fn call_tool(
        &self,
        tool_name: &str,
        arguments: Option<Value>,
    ) -> Result<CallToolResult, McpError>;

    /// Release every connection resource.
    async fn dispose(&self);
}

// ─── State Cell ──────────────────────────────────────────────────────────────

/// Lock-free holder for a [`TransportState`], readable from sync code.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(0))
    }

    pub(crate) fn get(&self) -> TransportState {
        match self.0.load(Ordering::Acquire) {
            0 => TransportState::Uninitialized,
            1 => TransportState::Ready,
            _ => TransportState::Disposed,
        }
    }

    pub(crate) fn set(&self, state: TransportState) {
        let raw = match state {
            TransportState::Uninitialized => 0,
            TransportState::Ready => 1,
            TransportState::Disposed => 2,
        };
        self.0.store(raw, Ordering::Release);
    }
}

// ─── Message Builders ────────────────────────────────────────────────────────

/// Params of the `initialize` request.
pub fn initialize_params() -> Value {
    serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": CLIENT_NAME,
            "version": CLIENT_VERSION,
        },
    })
}

/// Params of a `tools/call` request. Missing arguments become `{}`.
pub fn call_params(tool_name: &str, arguments: Option<Value>) -> Value {
    serde_json::json!({
        "name": tool_name,
        "arguments": arguments.unwrap_or_else(|| Value::Object(serde_json::Map::new())),
    })
}

// ─── Response Correlation ────────────────────────────────────────────────────

/// Cheap textual check that `text` carries request id `id`, in either compact
/// (`"id":3`) or space-separated (`"id": 3`) form.
pub fn mentions_id(text: &str, id: u64) -> bool {
    [format!("\"id\":{id}"), format!("\"id\": {id}")]
        .iter()
        .any(|needle| {
            text.match_indices(needle.as_str()).any(|(pos, m)| {
                !text[pos + m.len()..]
                    .chars()
                    .next()
                    .is_some_and(|c| c.is_ascii_digit())
            })
        })
}

/// Accept `text` as the reply to request `id`, or `None` if it is anything
/// else (log output, notifications, replies to other ids).
pub fn match_response(text: &str, id: u64) -> Option<JsonRpcResponse> {
    if !mentions_id(text, id) {
        return None;
    }
    serde_json::from_str::<JsonRpcResponse>(text)
        .ok()
        .filter(|resp| resp.id == id)
}

/// Extract the result from a JSON-RPC response, converting errors to `McpError`.
pub fn extract_result(response: JsonRpcResponse) -> Result<Option<Value>, McpError> {
    if let Some(err) = response.error {
        return Err(McpError::ServerError {
            code: err.code,
            message: err.message,
            data: err.data,
        });
    }
    Ok(response.result)
}

/// Decode a `tools/list` result. No result means no tools.
pub(crate) fn tools_from_result(
    server: &str,
    result: Option<Value>,
) -> Result<Vec<McpToolDefinition>, McpError> {
    let Some(value) = result else {
        return Ok(Vec::new());
    };
    if value.is_null() {
        return Ok(Vec::new());
    }
    serde_json::from_value::<ToolsListResult>(value)
        .map(|list| list.tools)
        .map_err(|e| McpError::TransportError {
            server: server.to_string(),
            reason: format!("malformed tools/list result: {e}"),
        })
}

/// Decode a `tools/call` result. No result means "No response".
pub(crate) fn call_result_from(
    server: &str,
    result: Option<Value>,
) -> Result<CallToolResult, McpError> {
    match result {
        None | Some(Value::Null) => Ok(CallToolResult::no_response()),
        Some(value) => serde_json::from_value(value).map_err(|e| McpError::TransportError {
            server: server.to_string(),
            reason: format!("malformed tools/call result: {e}"),
        }),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
