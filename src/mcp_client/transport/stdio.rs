//! JSON-RPC over stdio transport.
//!
//! Handles communication with an MCP server child process:
//! - Spawning the process (no shell) with piped stdio
//! - Writing JSON-RPC requests to stdin, one JSON object per line, from a
//!   writer task that owns the pipe
//! - Reading JSON-RPC responses from stdout and correlating them by id
//! - Terminating the process on dispose
//!
//! Only one request is outstanding per session: the exchange lock is held
//! from the moment a request is written until its reply is read (or the
//! deadline passes), so concurrent callers never consume each other's
//! replies. The deadline covers the whole cycle, including waiting for the
//! lock and for stdin to accept the line.
//!
//! Lines are queued to the writer task whole. A caller that stops waiting
//! never leaves a partial line on stdin.

use std::collections::{HashMap, VecDeque};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

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

/// How long a request waits for its correlated reply.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Stderr lines kept for diagnostics on a failed handshake.
const STDERR_TAIL_LINES: usize = 20;

/// Cap on the stderr excerpt attached to error messages.
const STDERR_EXCERPT_CHARS: usize = 2000;

/// Lines waiting for the writer task before senders wait.
const WRITE_QUEUE_DEPTH: usize = 32;

// ─── Transport ───────────────────────────────────────────────────────────────

/// MCP session with a local child process.
pub struct StdioTransport {
    server_name: String,
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    cwd: Option<String>,
    response_timeout: Duration,
    next_id: AtomicU64,
    state: StateCell,
    /// Live session. Held across the whole of `initialize` so concurrent
    /// initializers spawn at most one process.
    session: Mutex<Option<Arc<StdioSession>>>,
}

impl StdioTransport {
    /// Build an unstarted transport from a stdio descriptor.
    ///
    /// Fails with `ConfigError` when the descriptor has no command.
    pub fn new(config: &ServerConfig) -> Result<Self, McpError> {
        let command = config
            .command
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| McpError::ConfigError {
                reason: format!("stdio server '{}' requires a command", config.name),
            })?;

        Ok(Self {
            server_name: config.name.clone(),
            command: command.to_string(),
            args: config.args.clone(),
            env: config.env.clone(),
            cwd: config.cwd.clone(),
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            next_id: AtomicU64::new(1),
            state: StateCell::new(),
            session: Mutex::new(None),
        })
    }

    /// Override the per-request reply deadline.
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// OS process id of the running child, if any.
    pub async fn process_id(&self) -> Option<u32> {
        let session = self.session.lock().await.clone()?;
        let child = session.child.lock().await;
        child.id()
    }

    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn spawn(&self) -> Result<StdioSession, McpError> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args);
        cmd.envs(&self.env);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }

        // Windows: prevent console window from appearing for child processes
        #[cfg(target_os = "windows")]
        {
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
            name: self.server_name.clone(),
            reason: format!("{e}"),
        })?;

        let stdin = child.stdin.take().ok_or(McpError::SpawnFailed {
            name: self.server_name.clone(),
            reason: "failed to capture stdin".into(),
        })?;

        let stdout = child.stdout.take().ok_or(McpError::SpawnFailed {
            name: self.server_name.clone(),
            reason: "failed to capture stdout".into(),
        })?;

        let (outbox, writer_task) = spawn_stdin_writer(self.server_name.clone(), stdin);

        let stderr_tail = Arc::new(std::sync::Mutex::new(VecDeque::new()));
        if let Some(stderr) = child.stderr.take() {
            drain_stderr(self.server_name.clone(), stderr, Arc::clone(&stderr_tail));
        }

        tracing::info!(
            server = %self.server_name,
            command = %self.command,
            pid = ?child.id(),
            "spawned MCP server process"
        );

        Ok(StdioSession {
            server_name: self.server_name.clone(),
            child: Mutex::new(child),
            outbox,
            writer_task,
            reader: Mutex::new(LineReader::new(stdout)),
            stderr_tail,
            response_timeout: self.response_timeout,
        })
    }

    /// Perform the MCP initialization handshake.
    async fn handshake(&self, session: &StdioSession) -> Result<(), McpError> {
        let id = self.next_request_id();
        let response = session
            .request(id, METHOD_INITIALIZE, Some(initialize_params()))
            .await?
            .ok_or_else(|| McpError::InitFailed {
                name: self.server_name.clone(),
                reason: format!(
                    "no response to initialize within {}ms",
                    self.response_timeout.as_millis()
                ),
            })?;

        extract_result(response).map_err(|e| McpError::InitFailed {
            name: self.server_name.clone(),
            reason: e.to_string(),
        })?;

        session
            .notify(&JsonRpcNotification::new(METHOD_INITIALIZED, None))
            .await
    }

    async fn ready_session(&self) -> Result<Arc<StdioSession>, McpError> {
        if self.state.get() != TransportState::Ready {
            return Err(McpError::NotInitialized {
                name: self.server_name.clone(),
            });
        }
        self.session
            .lock()
            .await
            .clone()
            .ok_or_else(|| McpError::NotInitialized {
                name: self.server_name.clone(),
            })
    }

    /// Send a request and return its result, `None` when no reply arrived.
    async fn call(&self, method: &str, params: Option<Value>) -> Result<Option<Value>, McpError> {
        let session = self.ready_session().await?;
        let id = self.next_request_id();
        match session.request(id, method, params).await? {
            Some(response) => extract_result(response),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    fn server_name(&self) -> &str {
        &self.server_name
    }

    fn state(&self) -> TransportState {
        self.state.get()
    }

    async fn initialize(&self) -> Result<(), McpError> {
        let mut slot = self.session.lock().await;
        match self.state.get() {
            TransportState::Ready => return Ok(()),
            TransportState::Disposed => {
                return Err(McpError::NotInitialized {
                    name: self.server_name.clone(),
                })
            }
            TransportState::Uninitialized => {}
        }

        let session = self.spawn()?;

        if let Err(e) = self.handshake(&session).await {
            let stderr_ctx = session.stderr_excerpt();
            if !stderr_ctx.is_empty() {
                tracing::warn!(
                    server = %self.server_name,
                    stderr = %stderr_ctx,
                    "server stderr captured on failure"
                );
            }
            session.terminate().await;
            return Err(match e {
                McpError::InitFailed { name, reason } => McpError::InitFailed {
                    name,
                    reason: format!("{reason}{}", format_stderr_suffix(&stderr_ctx)),
                },
                other => McpError::InitFailed {
                    name: self.server_name.clone(),
                    reason: format!("{other}{}", format_stderr_suffix(&stderr_ctx)),
                },
            });
        }

        *slot = Some(Arc::new(session));
        self.state.set(TransportState::Ready);
        tracing::info!(server = %self.server_name, "stdio transport ready");
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<McpToolDefinition>, McpError> {
        let result = self.call(METHOD_TOOLS_LIST, None).await?;
        if result.is_none() {
            tracing::warn!(server = %self.server_name, "tools/list produced no result");
        }
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
        let session = {
            let mut slot = self.session.lock().await;
            self.state.set(TransportState::Disposed);
            slot.take()
        };
        if let Some(session) = session {
            session.terminate().await;
            tracing::info!(server = %self.server_name, "stdio transport disposed");
        }
    }
}

// ─── Session ─────────────────────────────────────────────────────────────────

/// The resources of one running child process.
struct StdioSession {
    server_name: String,
    child: Mutex<Child>,
    /// Queue to the task that owns stdin. Lines are written in queue order.
    outbox: mpsc::Sender<WriteJob>,
    writer_task: JoinHandle<()>,
    /// Exchange lock: held for a whole request/reply cycle.
    reader: Mutex<LineReader>,
    stderr_tail: Arc<std::sync::Mutex<VecDeque<String>>>,
    response_timeout: Duration,
}

impl StdioSession {
    /// Write a request and wait for the line answering it.
    ///
    /// Returns `Ok(None)` when the deadline passes first. The deadline
    /// starts before the exchange lock is taken.
    async fn request(
        &self,
        id: u64,
        method: &str,
        params: Option<Value>,
    ) -> Result<Option<JsonRpcResponse>, McpError> {
        let line = self.encode(&JsonRpcRequest::new(id, method, params))?;

        let exchange = async {
            let mut reader = self.reader.lock().await;
            let written = self.enqueue(line).await?;

            let reply = self.read_response(&mut reader, id);
            tokio::pin!(reply);
            tokio::select! {
                response = &mut reply => response,
                outcome = written => {
                    self.check_written(outcome)?;
                    reply.await
                }
            }
        };

        match tokio::time::timeout(self.response_timeout, exchange).await {
            Ok(result) => result.map(Some),
            Err(_) => {
                tracing::warn!(
                    server = %self.server_name,
                    method,
                    id,
                    timeout_ms = self.response_timeout.as_millis() as u64,
                    "no response before deadline"
                );
                Ok(None)
            }
        }
    }

    /// Send a JSON-RPC notification (no response expected) and wait until it
    /// has been written.
    async fn notify(&self, notification: &JsonRpcNotification) -> Result<(), McpError> {
        let line = self.encode(notification)?;
        let delivery = async {
            let written = self.enqueue(line).await?;
            self.check_written(written.await)
        };
        tokio::time::timeout(self.response_timeout, delivery)
            .await
            .map_err(|_| McpError::TransportError {
                server: self.server_name.clone(),
                reason: format!(
                    "stdin not writable within {}ms",
                    self.response_timeout.as_millis()
                ),
            })?
    }

    fn encode<T: Serialize>(&self, message: &T) -> Result<Vec<u8>, McpError> {
        let mut line = serde_json::to_vec(message).map_err(|e| McpError::TransportError {
            server: self.server_name.clone(),
            reason: format!("failed to serialize message: {e}"),
        })?;
        line.push(b'\n');
        Ok(line)
    }

    /// Queue one whole line. The returned receiver resolves once the line
    /// is flushed to the child.
    async fn enqueue(
        &self,
        line: Vec<u8>,
    ) -> Result<oneshot::Receiver<std::io::Result<()>>, McpError> {
        let (done, written) = oneshot::channel();
        self.outbox
            .send(WriteJob { line, done })
            .await
            .map_err(|_| self.writer_stopped())?;
        Ok(written)
    }

    fn check_written(
        &self,
        outcome: Result<std::io::Result<()>, oneshot::error::RecvError>,
    ) -> Result<(), McpError> {
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(McpError::TransportError {
                server: self.server_name.clone(),
                reason: format!("failed to write to stdin: {e}"),
            }),
            Err(_) => Err(self.writer_stopped()),
        }
    }

    fn writer_stopped(&self) -> McpError {
        McpError::TransportError {
            server: self.server_name.clone(),
            reason: "stdin writer stopped (process may have exited)".into(),
        }
    }

    /// Read lines until one answers request `id`.
    async fn read_response(
        &self,
        reader: &mut LineReader,
        id: u64,
    ) -> Result<JsonRpcResponse, McpError> {
        loop {
            let line = reader
                .next_line()
                .await
                .map_err(|e| McpError::TransportError {
                    server: self.server_name.clone(),
                    reason: format!("failed to read from stdout: {e}"),
                })?
                .ok_or_else(|| McpError::TransportError {
                    server: self.server_name.clone(),
                    reason: "server stdout closed (process may have exited)".into(),
                })?;

            if line.is_empty() {
                continue;
            }

            match match_response(&line, id) {
                Some(response) => return Ok(response),
                None => {
                    tracing::trace!(server = %self.server_name, id, line = %line, "discarded line");
                }
            }
        }
    }

    /// Kill the child if it is still running and wait for it to exit.
    async fn terminate(&self) {
        self.writer_task.abort();
        let mut child = self.child.lock().await;
        match child.try_wait() {
            Ok(Some(status)) => {
                tracing::debug!(server = %self.server_name, %status, "server already exited");
            }
            Ok(None) => {
                if let Err(e) = child.kill().await {
                    tracing::warn!(
                        server = %self.server_name,
                        error = %e,
                        "failed to kill server process"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    server = %self.server_name,
                    error = %e,
                    "failed to query server process status"
                );
            }
        }
    }

    fn stderr_excerpt(&self) -> String {
        let Ok(tail) = self.stderr_tail.lock() else {
            return String::new();
        };
        let joined = tail.iter().cloned().collect::<Vec<_>>().join("\n");
        truncate_with_ellipsis(&joined, STDERR_EXCERPT_CHARS)
    }
}

// ─── Line Reader ─────────────────────────────────────────────────────────────

/// Line reader over the child's stdout.
///
/// Partial line bytes live in `partial` rather than a per-call buffer, so a
/// read abandoned by a deadline loses nothing.
struct LineReader {
    stdout: BufReader<ChildStdout>,
    partial: Vec<u8>,
}

impl LineReader {
    fn new(stdout: ChildStdout) -> Self {
        Self {
            stdout: BufReader::new(stdout),
            partial: Vec::new(),
        }
    }

    /// Next trimmed line, or `None` at end of stream.
    async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        let read = self.stdout.read_until(b'\n', &mut self.partial).await?;
        if read == 0 && self.partial.is_empty() {
            return Ok(None);
        }
        let line = String::from_utf8_lossy(&self.partial).trim().to_string();
        self.partial.clear();
        Ok(Some(line))
    }
}

// ─── Stdin Writer ────────────────────────────────────────────────────────────

/// One outbound line and the channel that reports its write.
struct WriteJob {
    line: Vec<u8>,
    done: oneshot::Sender<std::io::Result<()>>,
}

/// Own the child's stdin and write each queued line whole.
///
/// The task stops at the first write error; later sends then fail.
fn spawn_stdin_writer(
    server_name: String,
    mut stdin: ChildStdin,
) -> (mpsc::Sender<WriteJob>, JoinHandle<()>) {
    let (outbox, mut queue) = mpsc::channel::<WriteJob>(WRITE_QUEUE_DEPTH);
    let task = tokio::spawn(async move {
        while let Some(job) = queue.recv().await {
            let result = write_line(&mut stdin, &job.line).await;
            let failed = result.is_err();
            if let Err(e) = &result {
                tracing::warn!(server = %server_name, error = %e, "failed to write to stdin");
            }
            // The requester may have stopped waiting.
            let _ = job.done.send(result);
            if failed {
                break;
            }
        }
    });
    (outbox, task)
}

async fn write_line(stdin: &mut ChildStdin, line: &[u8]) -> std::io::Result<()> {
    stdin.write_all(line).await?;
    stdin.flush().await
}

// ─── Stderr ──────────────────────────────────────────────────────────────────

/// Forward the child's stderr to tracing and keep the last few lines.
///
/// Draining also keeps the child from blocking on a full stderr pipe.
fn drain_stderr(
    server_name: String,
    stderr: ChildStderr,
    tail: Arc<std::sync::Mutex<VecDeque<String>>>,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(server = %server_name, "stderr: {line}");
            if let Ok(mut tail) = tail.lock() {
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
        }
    });
}

/// Format a stderr suffix for error messages (empty string if no stderr).
fn format_stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(" | stderr: {}", stderr.trim())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_requires_command() {
        let mut config = ServerConfig::stdio("broken", "", &[]);
        assert!(matches!(
            StdioTransport::new(&config),
            Err(McpError::ConfigError { .. })
        ));

        config.command = None;
        assert!(matches!(
            StdioTransport::new(&config),
            Err(McpError::ConfigError { .. })
        ));
    }

    #[test]
    fn test_format_stderr_suffix() {
        assert_eq!(format_stderr_suffix(""), "");
        assert_eq!(format_stderr_suffix("boom\n"), " | stderr: boom");
    }

    #[tokio::test]
    async fn test_operations_before_initialize_fail() {
        let transport = StdioTransport::new(&ServerConfig::stdio("idle", "cat", &[])).unwrap();
        assert_eq!(transport.state(), TransportState::Uninitialized);
        assert!(matches!(
            transport.list_tools().await,
            Err(McpError::NotInitialized { .. })
        ));
        assert!(matches!(
            transport.call_tool("echo", None).await,
            Err(McpError::NotInitialized { .. })
        ));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_init_error() {
        let transport = StdioTransport::new(&ServerConfig::stdio(
            "ghost",
            "/nonexistent/mcp-bridge-test-binary",
            &[],
        ))
        .unwrap();
        let err = transport.initialize().await.unwrap_err();
        assert!(matches!(err, McpError::SpawnFailed { .. }));
        assert!(err.is_init_failure());
        assert_eq!(transport.state(), TransportState::Uninitialized);
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent_without_session() {
        let transport = StdioTransport::new(&ServerConfig::stdio("idle", "cat", &[])).unwrap();
        transport.dispose().await;
        transport.dispose().await;
        assert_eq!(transport.state(), TransportState::Disposed);
        assert!(matches!(
            transport.initialize().await,
            Err(McpError::NotInitialized { .. })
        ));
    }

    /// Fake MCP server in POSIX sh: answers by method, echoing the request id.
    #[cfg(unix)]
    mod fake_server {
        use super::*;

        const RESPOND_ALL: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/^{"jsonrpc":"2.0","id":\([0-9][0-9]*\).*/\1/p')
  [ -z "$id" ] && continue
  case "$line" in
    *'"method":"initialize"'*)
      echo "booting" >&2
      printf 'log line that is not json\n'
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{}}}\n' "$id" ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc": "2.0", "id": %s, "result": {"tools": [{"name": "echo"}, {"name": "add", "description": "sum"}]}}\n' "$id" ;;
    *'"name":"fail"'*)
      printf '{"jsonrpc":"2.0","id":%s,"error":{"code":-32602,"message":"bad arguments"}}\n' "$id" ;;
    *'"method":"tools/call"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"ok"}],"isError":false}}\n' "$id" ;;
  esac
done
"#;

        /// Answers the handshake, then never answers anything else.
        const SILENT_AFTER_INIT: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/^{"jsonrpc":"2.0","id":\([0-9][0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{}}\n' "$id" ;;
  esac
done
"#;

        /// Answers the handshake, then stops reading stdin.
        const DEAF_AFTER_INIT: &str = r#"
IFS= read -r line
printf '{"jsonrpc":"2.0","id":1,"result":{}}\n'
sleep 30
"#;

        /// Answers the handshake, leaves stdin undrained for a second, then
        /// serves like `RESPOND_ALL`.
        const PAUSE_AFTER_INIT: &str = r#"
IFS= read -r line
printf '{"jsonrpc":"2.0","id":1,"result":{}}\n'
sleep 1
"#;

        /// Arguments large enough to fill the stdin pipe.
        fn bulky_arguments() -> Value {
            serde_json::json!({"text": "x".repeat(256 * 1024)})
        }

        fn transport(script: &str) -> StdioTransport {
            StdioTransport::new(&ServerConfig::stdio("fake", "sh", &["-c", script])).unwrap()
        }

        #[tokio::test]
        async fn test_handshake_list_and_call() {
            let transport = transport(RESPOND_ALL);
            transport.initialize().await.unwrap();
            assert_eq!(transport.state(), TransportState::Ready);

            let tools = transport.list_tools().await.unwrap();
            let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
            assert_eq!(names, vec!["echo", "add"]);
            assert_eq!(tools[1].description.as_deref(), Some("sum"));

            let result = transport
                .call_tool("echo", Some(serde_json::json!({"text": "hi"})))
                .await
                .unwrap();
            assert!(!result.is_error);
            assert_eq!(result.first_text(), Some("ok"));

            transport.dispose().await;
        }

        #[tokio::test]
        async fn test_initialize_twice_spawns_once() {
            let transport = transport(RESPOND_ALL);
            transport.initialize().await.unwrap();
            let pid = transport.process_id().await;
            transport.initialize().await.unwrap();
            assert_eq!(transport.process_id().await, pid);
            transport.dispose().await;
        }

        #[tokio::test]
        async fn test_error_reply_is_server_error() {
            let transport = transport(RESPOND_ALL);
            transport.initialize().await.unwrap();
            let err = transport.call_tool("fail", None).await.unwrap_err();
            match err {
                McpError::ServerError { message, .. } => assert_eq!(message, "bad arguments"),
                other => panic!("expected ServerError, got {other:?}"),
            }
            transport.dispose().await;
        }

        #[tokio::test]
        async fn test_concurrent_calls_each_get_their_reply() {
            let transport = Arc::new(transport(RESPOND_ALL));
            transport.initialize().await.unwrap();

            let calls = (0..8).map(|i| {
                let transport = Arc::clone(&transport);
                tokio::spawn(async move {
                    if i % 2 == 0 {
                        transport.list_tools().await.map(|t| t.len())
                    } else {
                        transport.call_tool("echo", None).await.map(|r| r.content.len())
                    }
                })
            });
            for (i, handle) in calls.enumerate() {
                let n = handle.await.unwrap().unwrap();
                assert_eq!(n, if i % 2 == 0 { 2 } else { 1 });
            }
            transport.dispose().await;
        }

        #[tokio::test]
        async fn test_silent_backend_resolves_within_deadline() {
            let transport =
                transport(SILENT_AFTER_INIT).with_response_timeout(Duration::from_millis(300));
            transport.initialize().await.unwrap();

            let started = std::time::Instant::now();
            let result = transport.call_tool("echo", None).await.unwrap();
            assert!(started.elapsed() < Duration::from_secs(5));
            assert!(result.is_error);
            assert_eq!(result.first_text(), Some("No response"));

            assert!(transport.list_tools().await.unwrap().is_empty());
            transport.dispose().await;
        }

        #[tokio::test]
        async fn test_blocked_stdin_resolves_within_deadline() {
            let transport =
                transport(DEAF_AFTER_INIT).with_response_timeout(Duration::from_millis(300));
            transport.initialize().await.unwrap();

            let result = tokio::time::timeout(
                Duration::from_secs(5),
                transport.call_tool("echo", Some(bulky_arguments())),
            )
            .await
            .expect("call blocked on a full stdin pipe")
            .unwrap();
            assert!(result.is_error);
            assert_eq!(result.first_text(), Some("No response"));

            // The stuck write must not hold later callers past their deadline.
            let next = tokio::time::timeout(Duration::from_secs(5), transport.call_tool("echo", None))
                .await
                .expect("second call queued forever")
                .unwrap();
            assert_eq!(next.first_text(), Some("No response"));
            transport.dispose().await;
        }

        #[tokio::test]
        async fn test_abandoned_call_leaves_whole_lines_on_stdin() {
            let script = format!("{PAUSE_AFTER_INIT}{RESPOND_ALL}");
            let transport = transport(&script).with_response_timeout(Duration::from_secs(10));
            transport.initialize().await.unwrap();

            let abandoned = tokio::time::timeout(
                Duration::from_millis(100),
                transport.call_tool("echo", Some(bulky_arguments())),
            )
            .await;
            assert!(abandoned.is_err());

            let result = transport.call_tool("echo", None).await.unwrap();
            assert!(!result.is_error);
            assert_eq!(result.first_text(), Some("ok"));
            transport.dispose().await;
        }

        #[tokio::test]
        async fn test_handshake_timeout_fails_initialize() {
            let transport = StdioTransport::new(&ServerConfig::stdio(
                "mute",
                "sh",
                &["-c", "echo 'missing config' >&2; cat > /dev/null"],
            ))
            .unwrap()
            .with_response_timeout(Duration::from_millis(300));

            let err = transport.initialize().await.unwrap_err();
            match err {
                McpError::InitFailed { reason, .. } => {
                    assert!(reason.contains("no response to initialize"));
                }
                other => panic!("expected InitFailed, got {other:?}"),
            }
            assert_eq!(transport.state(), TransportState::Uninitialized);
        }

        #[tokio::test]
        async fn test_exited_process_is_transport_error() {
            let transport = StdioTransport::new(&ServerConfig::stdio(
                "quitter",
                "sh",
                &["-c", "read -r line; printf '{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\\n'; read -r note"],
            ))
            .unwrap();
            transport.initialize().await.unwrap();

            let err = transport.call_tool("echo", None).await.unwrap_err();
            assert!(matches!(err, McpError::TransportError { .. }));
            transport.dispose().await;
        }

        #[tokio::test]
        async fn test_env_and_cwd_reach_child() {
            let dir = tempfile::TempDir::new().unwrap();
            let mut config = ServerConfig::stdio(
                "envcheck",
                "sh",
                &["-c", r#"read -r line; printf '{"jsonrpc":"2.0","id":1,"result":{}}\n'; read -r note; read -r call; printf '{"jsonrpc":"2.0","id":2,"result":{"content":[{"type":"text","text":"%s|%s"}],"isError":false}}\n' "$BRIDGE_TEST_VAR" "$(basename "$PWD")"; cat > /dev/null"#],
            );
            config
                .env
                .insert("BRIDGE_TEST_VAR".to_string(), "marker".to_string());
            config.cwd = Some(dir.path().to_string_lossy().into_owned());
            let expected_dir = dir.path().file_name().unwrap().to_string_lossy().into_owned();

            let transport = StdioTransport::new(&config).unwrap();
            transport.initialize().await.unwrap();
            let result = transport.call_tool("env", None).await.unwrap();
            assert_eq!(
                result.first_text().unwrap(),
                format!("marker|{expected_dir}")
            );
            transport.dispose().await;
        }

        #[tokio::test]
        async fn test_dispose_kills_process() {
            let transport = transport(RESPOND_ALL);
            transport.initialize().await.unwrap();
            assert!(transport.process_id().await.is_some());

            transport.dispose().await;
            assert_eq!(transport.state(), TransportState::Disposed);
            assert!(transport.process_id().await.is_none());
            assert!(matches!(
                transport.list_tools().await,
                Err(McpError::NotInitialized { .. })
            ));
            transport.dispose().await;
        }
    }
}
