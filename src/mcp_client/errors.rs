//! MCP Client error types.

use thiserror::Error;

/// Errors that can occur during MCP client operations.
///
/// A request that receives no correlated reply within its deadline is not an
/// error: transports report it as "no result" and callers decide what that
/// means (an empty tool list, or a synthetic "No response" call result).
#[derive(Debug, Error)]
pub enum McpError {
    /// The server name is not present in the catalog.
    #[error("server '{name}' not found in configuration")]
    NotFound {
        name: String,
    },

    /// A server process failed to start.
    #[error("failed to spawn server '{name}': {reason}")]
    SpawnFailed {
        name: String,
        reason: String,
    },

    /// The initialization handshake or endpoint discovery failed.
    #[error("server '{name}' initialization failed: {reason}")]
    InitFailed {
        name: String,
        reason: String,
    },

    /// Non-2xx HTTP response from a remote server.
    #[error("HTTP {status} from server '{server}': {body}")]
    HttpError {
        server: String,
        status: u16,
        body: String,
    },

    /// JSON-RPC communication error (malformed message, I/O error, EOF).
    #[error("transport error for server '{server}': {reason}")]
    TransportError {
        server: String,
        reason: String,
    },

    /// Server returned a JSON-RPC error response.
    #[error("MCP error: {message}")]
    ServerError {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// An operation was attempted on a transport that is not ready.
    #[error("transport for server '{name}' is not initialized")]
    NotInitialized {
        name: String,
    },

    /// Invalid server descriptor (missing command/url, bad header).
    #[error("config error: {reason}")]
    ConfigError {
        reason: String,
    },
}

impl McpError {
    /// Whether this error belongs to the transport-initialization class
    /// (spawn failure, failed handshake, non-success HTTP status).
    pub fn is_init_failure(&self) -> bool {
        matches!(
            self,
            McpError::SpawnFailed { .. } | McpError::InitFailed { .. } | McpError::HttpError { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_error_message_is_backend_message() {
        let err = McpError::ServerError {
            code: -32601,
            message: "Method not found".into(),
            data: None,
        };
        assert_eq!(err.to_string(), "MCP error: Method not found");
    }

    #[test]
    fn test_init_failure_class() {
        let spawn = McpError::SpawnFailed {
            name: "fs".into(),
            reason: "No such file or directory".into(),
        };
        let http = McpError::HttpError {
            server: "remote".into(),
            status: 401,
            body: String::new(),
        };
        let not_found = McpError::NotFound { name: "x".into() };

        assert!(spawn.is_init_failure());
        assert!(http.is_init_failure());
        assert!(!not_found.is_init_failure());
    }

    #[test]
    fn test_not_found_display() {
        let err = McpError::NotFound {
            name: "missing".into(),
        };
        assert_eq!(err.to_string(), "server 'missing' not found in configuration");
    }
}
