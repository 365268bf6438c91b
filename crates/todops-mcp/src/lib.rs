//! MCP (Model Context Protocol) client for the todops todo service.
//!
//! This crate implements the session/transport engine for talking to the
//! todo-mcp server over its SSE transport: requests go out as HTTP POSTs to a
//! session-scoped endpoint, and responses come back asynchronously on a
//! long-lived server-sent event stream.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  McpClient                                                  │
//! │  - connect() / disconnect() session lifecycle               │
//! │  - initialize, tools/list, tools/call                       │
//! └─────────────────────────────────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  SseTransport                                               │
//! │  - GET /sse opens the event stream                          │
//! │  - background reader thread demultiplexes stream events     │
//! │  - POST /sse?sessionid=<id> carries each request            │
//! │  - blocked caller pops the response off the delivery sink   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use todops_mcp::{McpClient, McpClientConfig};
//!
//! let mut client = McpClient::new(McpClientConfig::new("http://localhost:8081"))?;
//! client.connect()?;
//!
//! // Discover tools
//! let tools = client.list_tools()?;
//! for (name, tool) in &tools {
//!     println!("Tool: {} - {:?}", name, tool.description);
//! }
//!
//! // Invoke one
//! let result = client.call_tool("add-item", json!({"title": "milk"}))?;
//! println!("Result: {}", result);
//!
//! client.disconnect()?;
//! ```
//!
//! # Protocol flow
//!
//! 1. Client GETs `/sse` with `Accept: text/event-stream`
//! 2. Server pushes an `endpoint` event carrying the session id
//! 3. Client POSTs `initialize` to `/sse?sessionid=<id>`; the POST is
//!    answered with an acknowledgement status only
//! 4. The initialize response arrives as a `message` stream event
//! 5. Client can now call `tools/list` and `tools/call` the same way
//!
//! Only one call is in flight at a time; responses are correlated by stream
//! order, not by envelope id.

pub mod client;
pub mod error;
pub mod protocol;
pub mod sse;
pub mod transport;

// Re-export main types
pub use client::{McpClient, McpClientConfig};
pub use error::{McpError, Result};
pub use protocol::{
    CallToolParams, CallToolResult, ClientCapabilities, ClientInfo, InitializeParams,
    InitializeResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse, ListToolsResult, ServerInfo,
    ToolContent, ToolInfo,
};
pub use sse::{EventReader, SseEvent};
pub use transport::{SseTransport, SseTransportConfig};
