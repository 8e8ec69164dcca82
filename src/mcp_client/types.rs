//! Shared types for the MCP client.
//!
//! JSON-RPC 2.0 message types, MCP protocol structures, server descriptors
//! and the transport-independent invocation result.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ─── JSON-RPC 2.0 ───────────────────────────────────────────────────────────

/// JSON-RPC 2.0 request message.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(id: u64, method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 notification (a request without an `id`).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcNotification {
    pub fn new(method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response message (success or error).
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[allow(dead_code)]
    #[serde(default)]
    pub jsonrpc: String,
    pub id: u64,
    pub result: Option<serde_json::Value>,
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

// ─── MCP Protocol Types ──────────────────────────────────────────────────────

/// MCP tool definition as returned by `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpToolDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, rename = "inputSchema", skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<serde_json::Value>,
}

impl McpToolDefinition {
    /// A tool definition carrying only a name.
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            description: None,
            input_schema: None,
        }
    }
}

/// `tools/list` result payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolsListResult {
    #[serde(default)]
    pub tools: Vec<McpToolDefinition>,
}

/// One item of a `tools/call` result. Fields other than `type` and `text`
/// (images, resources) are carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    #[serde(rename = "type", default = "default_content_type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_content_type() -> String {
    "text".to_string()
}

impl ContentItem {
    /// A plain text content item.
    pub fn text(text: &str) -> Self {
        Self {
            kind: default_content_type(),
            text: Some(text.to_string()),
            extra: serde_json::Map::new(),
        }
    }
}

/// `tools/call` result payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ContentItem>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

impl CallToolResult {
    /// Synthetic result for a call whose reply never arrived.
    pub fn no_response() -> Self {
        Self {
            content: vec![ContentItem::text("No response")],
            is_error: true,
        }
    }

    /// Text of the first content item, if any.
    pub fn first_text(&self) -> Option<&str> {
        self.content.first().and_then(|item| item.text.as_deref())
    }
}

// ─── Server Descriptors ──────────────────────────────────────────────────────

/// How a backend server is reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Local child process, line-delimited JSON over stdin/stdout.
    #[default]
    Stdio,
    /// Remote HTTP endpoint, JSON-RPC carried over Server-Sent Events.
    Sse,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Stdio => f.write_str("stdio"),
            TransportKind::Sse => f.write_str("sse"),
        }
    }
}

/// Server configuration (one catalog entry).
///
/// Stdio servers use `command`, `args`, `env` and `cwd`; SSE servers use
/// `url`, `headers` and `api_key_env_var`. Required fields are checked when
/// a transport is built, not at parse time.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Catalog key. Filled in from the map key when the catalog is built.
    #[serde(default, skip_serializing)]
    pub name: String,
    #[serde(default)]
    pub transport: TransportKind,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, alias = "environment")]
    pub env: HashMap<String, String>,
    #[serde(default, alias = "workingDirectory", alias = "working_directory")]
    pub cwd: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default, alias = "apiKeyEnvVar")]
    pub api_key_env_var: Option<String>,
}

impl ServerConfig {
    /// A stdio descriptor for `command`.
    pub fn stdio(name: &str, command: &str, args: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            transport: TransportKind::Stdio,
            command: Some(command.to_string()),
            args: args.iter().map(|a| a.to_string()).collect(),
            ..Self::default()
        }
    }

    /// An SSE descriptor for `url`.
    pub fn sse(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            transport: TransportKind::Sse,
            url: Some(url.to_string()),
            ..Self::default()
        }
    }

    /// Human-readable connection summary (command line or URL).
    pub fn connection_summary(&self) -> String {
        match self.transport {
            TransportKind::Stdio => {
                let mut parts = vec![self.command.clone().unwrap_or_default()];
                parts.extend(self.args.iter().cloned());
                parts.join(" ").trim().to_string()
            }
            TransportKind::Sse => self.url.clone().unwrap_or_default(),
        }
    }
}

/// Status row for one configured server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub transport: TransportKind,
    pub connection: String,
    pub is_running: bool,
}

// ─── Invocation Result ───────────────────────────────────────────────────────

/// Transport-independent outcome of a tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeResult {
    pub success: bool,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl InvokeResult {
    /// A failed invocation carrying only an error message.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(message.into()),
        }
    }

    /// Normalize a `tools/call` result.
    ///
    /// The content list becomes `result`; when the backend flags an error the
    /// first text item becomes `error`.
    pub fn from_call_result(call: &CallToolResult) -> Self {
        let result = serde_json::to_value(&call.content).ok();
        if call.is_error {
            let message = call
                .first_text()
                .unwrap_or("tool reported an error without a message")
                .to_string();
            Self {
                success: false,
                result,
                error: Some(message),
            }
        } else {
            Self {
                success: true,
                result,
                error: None,
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
