//! Transport factory: turns a descriptor into an unconnected transport.

use std::sync::Arc;
use std::time::Duration;

use super::errors::McpError;
use super::transport::{McpTransport, SseTransport, StdioTransport};
use super::types::{ServerConfig, TransportKind};

/// Connect timeout of the shared HTTP client.
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Whole-request timeout of the shared HTTP client.
const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Builds transports from descriptors. Construction does not connect.
pub trait TransportFactory: Send + Sync {
    fn create(&self, config: &ServerConfig) -> Result<Arc<dyn McpTransport>, McpError>;
}

/// Factory producing [`StdioTransport`] and [`SseTransport`] sessions.
///
/// Owns the HTTP client shared by every SSE transport it builds.
pub struct DefaultTransportFactory {
    http: reqwest::Client,
    response_timeout: Option<Duration>,
}

impl DefaultTransportFactory {
    pub fn new() -> Result<Self, McpError> {
        let http = reqwest::Client::builder()
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .timeout(HTTP_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| McpError::ConfigError {
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self::with_http_client(http))
    }

    /// Use a caller-supplied HTTP client for SSE transports.
    pub fn with_http_client(http: reqwest::Client) -> Self {
        Self {
            http,
            response_timeout: None,
        }
    }

    /// Override the per-request response timeout of stdio transports.
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = Some(timeout);
        self
    }
}

impl TransportFactory for DefaultTransportFactory {
    fn create(&self, config: &ServerConfig) -> Result<Arc<dyn McpTransport>, McpError> {
        match config.transport {
            TransportKind::Stdio => {
                let mut transport = StdioTransport::new(config)?;
                if let Some(timeout) = self.response_timeout {
                    transport = transport.with_response_timeout(timeout);
                }
                Ok(Arc::new(transport))
            }
            TransportKind::Sse => Ok(Arc::new(SseTransport::new(config, self.http.clone())?)),
        }
    }
}
