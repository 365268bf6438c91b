//! Error types for MCP operations.

use thiserror::Error;

/// Result type for MCP operations.
pub type Result<T> = std::result::Result<T, McpError>;

/// Error type for MCP operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// The SSE stream could not be opened.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The POST path failed, or answered outside the acknowledgement set.
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed response or handshake-level error payload.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A bounded wait (session-id poll or response wait) elapsed.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The server reported a failure for a specific tool invocation.
    #[error("tool error: {message}")]
    ToolError {
        /// Error message from the server.
        message: String,
        /// Optional additional data.
        data: Option<serde_json::Value>,
    },

    /// Operation attempted before a session was established.
    #[error("not connected - call connect() first")]
    NotConnected,

    /// Operation attempted before the initialize handshake succeeded.
    #[error("session not initialized - call connect() first")]
    NotInitialized,

    /// The event stream reader has exited; no response will ever arrive.
    #[error("event stream closed")]
    ConnectionClosed,

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl McpError {
    /// Create a connection failure error.
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    /// Create a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a timeout error.
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a tool error from a server error payload.
    pub fn tool_error(message: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Self::ToolError {
            message: message.into(),
            data,
        }
    }
}
