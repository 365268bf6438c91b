//! MCP client for the todops todo service.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;

use crate::error::{McpError, Result};
use crate::protocol::{
    CallToolParams, CallToolResult, InitializeParams, InitializeResult, JsonRpcRequest,
    ListToolsResult, ServerInfo, ToolInfo,
};
use crate::transport::{SseTransport, SseTransportConfig};

/// Configuration for an MCP server connection.
#[derive(Debug, Clone)]
pub struct McpClientConfig {
    /// Base URL of the todo-mcp server (e.g. `http://localhost:8081`).
    pub base_url: String,
    /// How long to wait for the session announcement.
    pub connect_timeout: Option<Duration>,
    /// How long to wait for each response envelope.
    pub response_timeout: Option<Duration>,
    /// How long disconnect waits for the reader thread.
    pub disconnect_grace: Option<Duration>,
    /// Extra HTTP headers sent on every request.
    pub headers: Vec<(String, String)>,
}

impl McpClientConfig {
    /// Create a new config for the given server base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            connect_timeout: None,
            response_timeout: None,
            disconnect_grace: None,
            headers: Vec::new(),
        }
    }

    /// Set the session-announcement timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set the response timeout.
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = Some(timeout);
        self
    }

    /// Set the disconnect grace period.
    pub fn with_disconnect_grace(mut self, grace: Duration) -> Self {
        self.disconnect_grace = Some(grace);
        self
    }

    /// Add an HTTP header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// The SSE endpoint URL derived from the base URL.
    pub fn sse_url(&self) -> String {
        format!("{}/sse", self.base_url.trim_end_matches('/'))
    }

    fn transport_config(&self) -> SseTransportConfig {
        let mut config = SseTransportConfig::new(self.sse_url());
        if let Some(timeout) = self.connect_timeout {
            config = config.with_connect_timeout(timeout);
        }
        if let Some(timeout) = self.response_timeout {
            config = config.with_response_timeout(timeout);
        }
        if let Some(grace) = self.disconnect_grace {
            config = config.with_disconnect_grace(grace);
        }
        for (key, value) in &self.headers {
            config = config.with_header(key, value);
        }
        config
    }
}

/// An MCP client connected to a todo-mcp server over SSE.
///
/// Created disconnected; [`connect`](Self::connect) establishes the session
/// and runs the initialize handshake in one step.
pub struct McpClient {
    /// Client configuration.
    config: McpClientConfig,
    /// SSE transport (stream reader + call correlator).
    transport: SseTransport,
    /// Server info (after initialization).
    server_info: Option<ServerInfo>,
    /// Whether the initialize handshake succeeded.
    initialized: bool,
}

impl McpClient {
    /// Create a disconnected client.
    pub fn new(config: McpClientConfig) -> Result<Self> {
        let transport = SseTransport::new(config.transport_config())?;
        Ok(Self {
            config,
            transport,
            server_info: None,
            initialized: false,
        })
    }

    /// Connect to the server and initialize the session.
    ///
    /// Opens the event stream, waits for the session announcement, then runs
    /// the initialize handshake. On handshake failure the stream is left
    /// open; call [`disconnect`](Self::disconnect) to clean up.
    pub fn connect(&mut self) -> Result<()> {
        self.transport.connect()?;
        self.initialize()?;

        tracing::info!(
            url = %self.config.base_url,
            session = %self.transport.session_id().unwrap_or_default(),
            "MCP session initialized"
        );
        Ok(())
    }

    /// Disconnect from the server. Idempotent; safe to call even if never
    /// connected.
    pub fn disconnect(&mut self) -> Result<()> {
        self.transport.disconnect()?;
        self.server_info = None;
        self.initialized = false;
        Ok(())
    }

    /// Send the initialize handshake and mark the session initialized.
    fn initialize(&mut self) -> Result<()> {
        let params = InitializeParams::default();
        let request = JsonRpcRequest::new("initialize", Some(serde_json::to_value(&params)?));

        let response = self.transport.send_request(&request)?;
        let result = response
            .into_result()
            .map_err(|e| McpError::protocol(format!("initialize failed: {}", e.message)))?;

        let init_result: InitializeResult = serde_json::from_value(result)
            .map_err(|e| McpError::protocol(format!("invalid initialize result: {}", e)))?;

        tracing::info!(
            server = %init_result.server_info.name,
            version = %init_result.server_info.version,
            protocol = %init_result.protocol_version,
            "MCP server initialized"
        );

        self.server_info = Some(init_result.server_info);
        self.initialized = true;
        Ok(())
    }

    /// List the tools the server exposes, keyed by name.
    ///
    /// Descriptors are immutable once fetched; callers may cache the map for
    /// the session's lifetime.
    pub fn list_tools(&self) -> Result<HashMap<String, ToolInfo>> {
        if !self.initialized {
            return Err(McpError::NotInitialized);
        }

        let request = JsonRpcRequest::new("tools/list", Some(serde_json::json!({})));
        let response = self.transport.send_request(&request)?;
        let result = response
            .into_result()
            .map_err(|e| McpError::protocol(format!("tools/list failed: {}", e.message)))?;

        let list_result: ListToolsResult = serde_json::from_value(result)
            .map_err(|e| McpError::protocol(format!("invalid tools/list result: {}", e)))?;

        tracing::debug!(tool_count = list_result.tools.len(), "listed MCP tools");

        Ok(list_result
            .tools
            .into_iter()
            .map(|tool| (tool.name.clone(), tool))
            .collect())
    }

    /// Call a tool on the server and return the text of the first content
    /// item of its result.
    ///
    /// A server error payload surfaces as [`McpError::ToolError`] carrying
    /// the server-supplied detail.
    pub fn call_tool(&self, name: &str, arguments: Value) -> Result<String> {
        if !self.initialized {
            return Err(McpError::NotInitialized);
        }

        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };
        let request = JsonRpcRequest::new("tools/call", Some(serde_json::to_value(&params)?));

        let response = self.transport.send_request(&request)?;
        let result = response
            .into_result()
            .map_err(|e| McpError::tool_error(e.message, e.data))?;

        let call_result: CallToolResult = serde_json::from_value(result)
            .map_err(|e| McpError::protocol(format!("invalid tools/call result: {}", e)))?;

        if call_result.is_error() {
            tracing::warn!(tool = %name, "tool call returned error content");
        } else {
            tracing::debug!(tool = %name, "tool call succeeded");
        }

        call_result
            .first_text()
            .ok_or_else(|| McpError::protocol("no content in tool response"))
    }

    /// The session id announced by the server, if connected.
    pub fn session_id(&self) -> Option<String> {
        self.transport.session_id()
    }

    /// Check if a session is currently established.
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Check if the initialize handshake has succeeded.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Get the server info (after initialization).
    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        let _ = self.disconnect();
    }
}
