//! JSON-RPC over HTTP + Server-Sent Events transport.
//!
//! Session discovery: a GET on the configured URL opens an event stream whose
//! `event: endpoint` / `data: <url>` pair names the endpoint that accepts
//! POSTed JSON-RPC messages. Every reply arrives as a `data: <json>` line in
//! the body of the POST that carried its request.

use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Client as HttpClient, Url};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;

use super::{
    call_params, call_result_from, extract_result, initialize_params, match_response,
    tools_from_result, McpTransport, StateCell, TransportState, METHOD_INITIALIZE,
    METHOD_INITIALIZED, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST,
};
use crate::mcp_client::errors::McpError;
use crate::mcp_client::types::{
    CallToolResult, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, McpToolDefinition,
    ServerConfig,
};
use crate::text::truncate_with_ellipsis;

// ─── Constants ───────────────────────────────────────────────────────────────

const SSE_MEDIA_TYPE: &str = "text/event-stream";

/// Accept header sent with POSTed messages.
const POST_ACCEPT: &str = "application/json, text/event-stream";

/// Cap on an HTTP error body kept in `McpError::HttpError`.
const ERROR_BODY_CHARS: usize = 500;

// ─── Transport ───────────────────────────────────────────────────────────────

/// MCP session with a remote server over HTTP/SSE.
pub struct SseTransport {
    server_name: String,
    url: Url,
    http: HttpClient,
    headers: HeaderMap,
    next_id: AtomicU64,
    state: StateCell,
    init_lock: Mutex<()>,
    session_endpoint: RwLock<Option<String>>,
}

impl SseTransport {
    /// Build an unconnected transport from an SSE descriptor.
    ///
    /// The HTTP client is shared and owned by the caller. Configured headers
    /// and the optional bearer token are resolved here, once.
    pub fn new(config: &ServerConfig, http: HttpClient) -> Result<Self, McpError> {
        let raw_url = config
            .url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| McpError::ConfigError {
                reason: format!("sse server '{}' requires a url", config.name),
            })?;

        let url = Url::parse(raw_url).map_err(|e| McpError::ConfigError {
            reason: format!("sse server '{}' has an invalid url '{raw_url}': {e}", config.name),
        })?;

        Ok(Self {
            server_name: config.name.clone(),
            url,
            http,
            headers: build_headers(config)?,
            next_id: AtomicU64::new(1),
            state: StateCell::new(),
            init_lock: Mutex::new(()),
            session_endpoint: RwLock::new(None),
        })
    }

    /// The endpoint announced by the server, exactly as announced.
    pub fn session_endpoint(&self) -> Option<String> {
        self.session_endpoint
            .read()
            .ok()
            .and_then(|endpoint| endpoint.clone())
    }

    /// Headers attached to every request.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Where messages are POSTed: the announced endpoint resolved against the
    /// configured URL, or the configured URL before discovery.
    pub fn post_url(&self) -> Result<Url, McpError> {
        match self.session_endpoint() {
            Some(endpoint) => self.url.join(&endpoint).map_err(|e| McpError::TransportError {
                server: self.server_name.clone(),
                reason: format!("invalid session endpoint '{endpoint}': {e}"),
            }),
            None => Ok(self.url.clone()),
        }
    }

    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn transport_error(&self, reason: impl Display) -> McpError {
        McpError::TransportError {
            server: self.server_name.clone(),
            reason: reason.to_string(),
        }
    }

    fn init_error(&self, reason: impl Display) -> McpError {
        McpError::InitFailed {
            name: self.server_name.clone(),
            reason: reason.to_string(),
        }
    }

    /// GET the event stream and wait for the endpoint announcement.
    async fn connect(&self) -> Result<String, McpError> {
        let response = self
            .http
            .get(self.url.clone())
            .headers(self.headers.clone())
            .header(ACCEPT, SSE_MEDIA_TYPE)
            .send()
            .await
            .map_err(|e| self.init_error(format!("connection to {} failed: {e}", self.url)))?;

        let response = self.ensure_success(response).await?;
        let mut lines = SseLineReader::new(Box::pin(response.bytes_stream()));

        match discover_endpoint(&mut lines).await {
            Ok(Some(endpoint)) => Ok(endpoint),
            Ok(None) => Err(self.init_error("no endpoint discovered on event stream")),
            Err(e) => Err(self.init_error(format!("event stream failed: {e}"))),
        }
    }

    /// Perform the MCP initialization handshake over the session endpoint.
    async fn handshake(&self) -> Result<(), McpError> {
        let id = self.next_request_id();
        let response = self
            .exchange(id, METHOD_INITIALIZE, Some(initialize_params()))
            .await?
            .ok_or_else(|| self.init_error("no response to initialize"))?;

        extract_result(response).map_err(|e| self.init_error(e))?;

        self.post(&JsonRpcNotification::new(METHOD_INITIALIZED, None))
            .await
            .map(drop)
    }

    async fn ensure_success(
        &self,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, McpError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(McpError::HttpError {
            server: self.server_name.clone(),
            status: status.as_u16(),
            body: truncate_with_ellipsis(&body, ERROR_BODY_CHARS),
        })
    }

    async fn post<T: Serialize + Sync>(&self, message: &T) -> Result<reqwest::Response, McpError> {
        let response = self
            .http
            .post(self.post_url()?)
            .headers(self.headers.clone())
            .header(ACCEPT, POST_ACCEPT)
            .json(message)
            .send()
            .await
            .map_err(|e| self.transport_error(format!("POST failed: {e}")))?;
        self.ensure_success(response).await
    }

    /// POST a request and scan the reply body for the line answering it.
    /// `Ok(None)` when the body ends without one.
    async fn exchange(
        &self,
        id: u64,
        method: &str,
        params: Option<Value>,
    ) -> Result<Option<JsonRpcResponse>, McpError> {
        let response = self.post(&JsonRpcRequest::new(id, method, params)).await?;
        let mut lines = SseLineReader::new(Box::pin(response.bytes_stream()));
        let reply = find_reply(&mut lines, id)
            .await
            .map_err(|e| self.transport_error(format!("reply stream failed: {e}")))?;
        if reply.is_none() {
            tracing::warn!(server = %self.server_name, method, id, "reply stream ended without a response");
        }
        Ok(reply)
    }

    async fn call(&self, method: &str, params: Option<Value>) -> Result<Option<Value>, McpError> {
        if self.state.get() != TransportState::Ready {
            return Err(McpError::NotInitialized {
                name: self.server_name.clone(),
            });
        }
        let id = self.next_request_id();
        match self.exchange(id, method, params).await? {
            Some(response) => extract_result(response),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl McpTransport for SseTransport {
    fn server_name(&self) -> &str {
        &self.server_name
    }

    fn state(&self) -> TransportState {
        self.state.get()
    }

    async fn initialize(&self) -> Result<(), McpError> {
        let _guard = self.init_lock.lock().await;
        match self.state.get() {
            TransportState::Ready => return Ok(()),
            TransportState::Disposed => {
                return Err(McpError::NotInitialized {
                    name: self.server_name.clone(),
                })
            }
            TransportState::Uninitialized => {}
        }

        let endpoint = self.connect().await?;
        tracing::debug!(server = %self.server_name, endpoint = %endpoint, "discovered session endpoint");
        if let Ok(mut slot) = self.session_endpoint.write() {
            *slot = Some(endpoint);
        }

        self.handshake().await?;
        self.state.set(TransportState::Ready);
        tracing::info!(server = %self.server_name, url = %self.url, "sse transport ready");
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<McpToolDefinition>, McpError> {
        let result = self.call(METHOD_TOOLS_LIST, None).await?;
        tools_from_result(&self.server_name, result)
    }

    async fn call_tool(
        &self,
        tool_name: &str,
        arguments: Option<Value>,
    ) -> Result<CallToolResult, McpError> {
        let params = call_params(tool_name, arguments);
        let result = self.call(METHOD_TOOLS_CALL, Some(params)).await?;
        call_result_from(&self.server_name, result)
    }

    async fn dispose(&self) {
        // The HTTP client is shared; there is nothing of ours to close.
        self.state.set(TransportState::Disposed);
    }
}

// ─── Headers ─────────────────────────────────────────────────────────────────

/// Configured headers plus `Authorization: Bearer <key>` when the configured
/// API-key variable resolves to a non-empty value.
fn build_headers(config: &ServerConfig) -> Result<HeaderMap, McpError> {
    let mut headers = HeaderMap::new();
    for (key, value) in &config.headers {
        let name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| McpError::ConfigError {
            reason: format!("server '{}': invalid header name '{key}': {e}", config.name),
        })?;
        let value = HeaderValue::from_str(value).map_err(|e| McpError::ConfigError {
            reason: format!("server '{}': invalid value for header '{key}': {e}", config.name),
        })?;
        headers.insert(name, value);
    }

    if let Some(var) = config.api_key_env_var.as_deref().filter(|v| !v.is_empty()) {
        match std::env::var(var).ok().filter(|key| !key.is_empty()) {
            Some(key) => {
                let mut value =
                    HeaderValue::from_str(&format!("Bearer {key}")).map_err(|e| {
                        McpError::ConfigError {
                            reason: format!("server '{}': API key in '{var}' is not a valid header value: {e}", config.name),
                        }
                    })?;
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            }
            None => {
                tracing::warn!(
                    server = %config.name,
                    env_var = %var,
                    "API key variable is unset or empty, connecting without bearer token"
                );
            }
        }
    }

    Ok(headers)
}

// ─── SSE Line Reader ─────────────────────────────────────────────────────────

/// Splits an HTTP body byte stream into lines.
///
/// Bytes are buffered until a `\n` arrives, so lines (and multi-byte
/// characters) split across chunks are reassembled. A trailing `\r` is
/// dropped.
pub struct SseLineReader<S> {
    stream: S,
    buffer: Vec<u8>,
    finished: bool,
}

impl<S, B, E> SseLineReader<S>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Display,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: Vec::new(),
            finished: false,
        }
    }

    /// Next line, or `None` once the stream is exhausted.
    pub async fn next_line(&mut self) -> Result<Option<String>, String> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
                let rest = self.buffer.split_off(pos + 1);
                let line = std::mem::replace(&mut self.buffer, rest);
                return Ok(Some(decode_line(&line)));
            }

            if self.finished {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                let line = std::mem::take(&mut self.buffer);
                return Ok(Some(decode_line(&line)));
            }

            match self.stream.next().await {
                Some(Ok(chunk)) => self.buffer.extend_from_slice(chunk.as_ref()),
                Some(Err(e)) => return Err(format!("stream read error: {e}")),
                None => self.finished = true,
            }
        }
    }
}

fn decode_line(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    text.trim_end_matches(['\n', '\r']).to_string()
}

/// Payload of a `data:` line (`data: x` or `data:x`).
fn data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data: ")
        .or_else(|| line.strip_prefix("data:"))
}

fn is_endpoint_event(line: &str) -> bool {
    line.strip_prefix("event:")
        .is_some_and(|event| event.trim() == "endpoint")
}

/// Scan an event stream for `event: endpoint` followed by `data: <value>`.
pub async fn discover_endpoint<S, B, E>(
    lines: &mut SseLineReader<S>,
) -> Result<Option<String>, String>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Display,
{
    while let Some(line) = lines.next_line().await? {
        if !is_endpoint_event(&line) {
            continue;
        }
        let Some(next) = lines.next_line().await? else {
            break;
        };
        if let Some(endpoint) = data_payload(&next) {
            let endpoint = endpoint.trim();
            if !endpoint.is_empty() {
                return Ok(Some(endpoint.to_string()));
            }
        }
    }
    Ok(None)
}

/// Scan an SSE reply body for the `data:` line answering request `id`.
pub async fn find_reply<S, B, E>(
    lines: &mut SseLineReader<S>,
    id: u64,
) -> Result<Option<JsonRpcResponse>, String>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Display,
{
    while let Some(line) = lines.next_line().await? {
        let Some(payload) = data_payload(&line) else {
            continue;
        };
        if let Some(response) = match_response(payload.trim(), id) {
            return Ok(Some(response));
        }
    }
    Ok(None)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
