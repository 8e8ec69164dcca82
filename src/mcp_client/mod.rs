//! MCP Client: uniform tool access across stdio and SSE MCP servers.
//!
//! This module handles:
//! - The catalog of configured servers
//! - JSON-RPC 2.0 sessions over child-process stdio or HTTP/SSE
//! - Building transports from descriptors
//! - Lazy, shared session setup and tool call routing by server name

pub mod catalog;
pub mod client;
pub mod errors;
pub mod factory;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use catalog::ServerCatalog;
pub use client::McpClient;
pub use errors::McpError;
pub use factory::{DefaultTransportFactory, TransportFactory};
pub use transport::{McpTransport, SseTransport, StdioTransport, TransportState};
pub use types::{
    CallToolResult, InvokeResult, McpToolDefinition, ServerConfig, ServerInfo, TransportKind,
};
