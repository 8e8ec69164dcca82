//! MCP Client: routes tool traffic to named backend servers.
//!
//! Sessions are created lazily: the first request for a server builds its
//! transport through the factory and runs the handshake; later requests
//! reuse the live session until it is shut down. This is the primary API
//! used by the REST surface.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use serde_json::Value;
use tokio::sync::OnceCell;

use super::catalog::ServerCatalog;
use super::errors::McpError;
use super::factory::TransportFactory;
use super::transport::McpTransport;
use super::types::{CallToolResult, InvokeResult, McpToolDefinition, ServerInfo};
use crate::invocation_log::{InvocationLog, InvocationLogger};

/// A registry slot: empty while the session is being set up.
type SessionSlot = Arc<OnceCell<Arc<dyn McpTransport>>>;

// ─── McpClient ───────────────────────────────────────────────────────────────

/// Orchestrates one lazily created session per configured server.
pub struct McpClient {
    catalog: Arc<ServerCatalog>,
    factory: Arc<dyn TransportFactory>,
    logger: Option<Arc<dyn InvocationLogger>>,
    /// Live and in-progress sessions by server name.
    sessions: Mutex<HashMap<String, SessionSlot>>,
}

impl McpClient {
    pub fn new(catalog: Arc<ServerCatalog>, factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            catalog,
            factory,
            logger: None,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Record every invocation to `logger`.
    pub fn with_logger(mut self, logger: Arc<dyn InvocationLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn catalog(&self) -> &ServerCatalog {
        &self.catalog
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, SessionSlot>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ─── Status ──────────────────────────────────────────────────────────

    pub fn server_exists(&self, name: &str) -> bool {
        self.catalog.exists(name)
    }

    /// Status of every configured server, sorted by name.
    pub fn list_server_info(&self) -> Vec<ServerInfo> {
        let sessions = self.sessions();
        self.catalog
            .iter()
            .map(|(name, config)| ServerInfo {
                name: name.clone(),
                transport: config.transport,
                connection: config.connection_summary(),
                is_running: sessions
                    .get(name)
                    .is_some_and(|slot| slot.initialized()),
            })
            .collect()
    }

    /// Number of live (initialized) sessions.
    pub fn active_count(&self) -> usize {
        self.sessions()
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    // ─── Sessions ────────────────────────────────────────────────────────

    /// The live session for `name`, created and initialized on first use.
    ///
    /// Concurrent first callers share a single construction. Setup for one
    /// server never waits on another. A failed setup leaves nothing behind,
    /// so the next call retries.
    pub async fn resolve_transport(&self, name: &str) -> Result<Arc<dyn McpTransport>, McpError> {
        let config = self.catalog.get(name).ok_or_else(|| McpError::NotFound {
            name: name.to_string(),
        })?;

        let slot = {
            let mut sessions = self.sessions();
            Arc::clone(sessions.entry(name.to_string()).or_default())
        };

        let result = slot
            .get_or_try_init(|| async {
                let transport = self.factory.create(config)?;
                tracing::info!(
                    server = %name,
                    transport = %config.transport,
                    connection = %config.connection_summary(),
                    "starting MCP session"
                );
                if let Err(e) = transport.initialize().await {
                    transport.dispose().await;
                    return Err(e);
                }
                Ok::<_, McpError>(transport)
            })
            .await;

        match result {
            Ok(transport) => Ok(Arc::clone(transport)),
            Err(e) => {
                self.discard_empty_slot(name, &slot);
                tracing::warn!(server = %name, error = %e, "MCP session setup failed");
                Err(e)
            }
        }
    }

    /// Drop `slot` from the registry if it is still the registered one and
    /// never got a session.
    fn discard_empty_slot(&self, name: &str, slot: &SessionSlot) {
        let mut sessions = self.sessions();
        let stale = sessions
            .get(name)
            .is_some_and(|current| Arc::ptr_eq(current, slot) && !current.initialized());
        if stale {
            sessions.remove(name);
        }
    }

    // ─── Tool Execution ──────────────────────────────────────────────────

    /// Tools exposed by `name`.
    pub async fn list_tools(&self, name: &str) -> Result<Vec<McpToolDefinition>, McpError> {
        let transport = self.resolve_transport(name).await?;
        transport.list_tools().await
    }

    /// Call `tool` on `name` and return the raw MCP result.
    pub async fn call_tool(
        &self,
        name: &str,
        tool: &str,
        params: Option<Value>,
    ) -> Result<CallToolResult, McpError> {
        let transport = self.resolve_transport(name).await?;
        transport.call_tool(tool, params).await
    }

    /// Call `tool` on `name`. Never fails: every error is folded into an
    /// unsuccessful [`InvokeResult`]. The outcome is recorded to the
    /// invocation log in the background.
    pub async fn invoke(&self, name: &str, tool: &str, params: Option<Value>) -> InvokeResult {
        let started = Instant::now();

        let outcome = match self.call_tool(name, tool, params.clone()).await {
            Ok(result) => InvokeResult::from_call_result(&result),
            Err(e) => {
                tracing::warn!(server = %name, tool = %tool, error = %e, "tool invocation failed");
                InvokeResult::failure(e.to_string())
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::debug!(server = %name, tool = %tool, success = outcome.success, duration_ms, "tool invoked");
        self.record(name, tool, params.as_ref(), &outcome, duration_ms);
        outcome
    }

    fn record(
        &self,
        name: &str,
        tool: &str,
        params: Option<&Value>,
        outcome: &InvokeResult,
        duration_ms: u64,
    ) {
        let Some(logger) = self.logger.clone() else {
            return;
        };
        let entry = InvocationLog::record(name, tool, params, outcome, duration_ms);
        tokio::task::spawn_blocking(move || {
            if let Err(e) = logger.log(&entry) {
                tracing::warn!(
                    server = %entry.server_name,
                    tool = %entry.tool_name,
                    error = %e,
                    "failed to record invocation"
                );
            }
        });
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Close the session for `name`, if any. The next request starts a new one.
    pub async fn shutdown(&self, name: &str) {
        let slot = self.sessions().remove(name);
        if let Some(transport) = slot.as_ref().and_then(|slot| slot.get()) {
            tracing::info!(server = %name, "shutting down MCP session");
            transport.dispose().await;
        }
    }

    /// Close every live session.
    pub async fn shutdown_all(&self) {
        let slots: Vec<(String, SessionSlot)> = self.sessions().drain().collect();
        for (name, slot) in slots {
            if let Some(transport) = slot.get() {
                tracing::info!(server = %name, "shutting down MCP session");
                transport.dispose().await;
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
