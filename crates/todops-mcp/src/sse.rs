//! Server-sent event decoding for the SSE transport.
//!
//! The todo-mcp server pushes two kinds of named events down the stream:
//! `endpoint` (the session announcement, carrying the session-scoped POST URL)
//! and `message` (a serialized JSON-RPC response). Only `event:` and `data:`
//! fields matter; comments and unknown fields are skipped.

use std::io::BufRead;

/// Event name announcing the session-scoped endpoint.
pub const ENDPOINT_EVENT: &str = "endpoint";

/// Event name carrying a serialized response envelope.
pub const MESSAGE_EVENT: &str = "message";

/// Query parameter carrying the session identifier in the endpoint payload.
const SESSION_ID_PARAM: &str = "sessionid";

/// A decoded server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event name. Defaults to "message" when the stream omits `event:`.
    pub name: String,
    /// Event payload: `data:` lines joined with newlines.
    pub data: String,
}

/// Incremental decoder over a readable event stream.
pub struct EventReader<R: BufRead> {
    inner: R,
}

impl<R: BufRead> EventReader<R> {
    /// Wrap an open stream body.
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Read the next blank-line-delimited event.
    ///
    /// Returns `Ok(None)` when the stream ends cleanly. A read error is
    /// surfaced as-is; the caller decides whether to keep reading.
    pub fn next_event(&mut self) -> std::io::Result<Option<SseEvent>> {
        let mut name = String::new();
        let mut data_lines: Vec<String> = Vec::new();
        let mut saw_field = false;
        let mut line = String::new();

        loop {
            line.clear();
            let bytes_read = self.inner.read_line(&mut line)?;

            if bytes_read == 0 {
                // EOF; flush a trailing unterminated event if one was started.
                if saw_field {
                    return Ok(Some(Self::finish(name, data_lines)));
                }
                return Ok(None);
            }

            let l = line.strip_suffix('\n').unwrap_or(&line);
            let l = l.strip_suffix('\r').unwrap_or(l);

            // Blank line dispatches the accumulated event.
            if l.is_empty() {
                if saw_field {
                    return Ok(Some(Self::finish(name, data_lines)));
                }
                continue;
            }

            // Comment line.
            if l.starts_with(':') {
                continue;
            }

            if let Some(rest) = l.strip_prefix("event:") {
                name = rest.trim_start().to_string();
                saw_field = true;
            } else if let Some(rest) = l.strip_prefix("data:") {
                data_lines.push(rest.trim_start().to_string());
                saw_field = true;
            }
            // Unknown fields (id:, retry:, ...) are ignored.
        }
    }

    fn finish(name: String, data_lines: Vec<String>) -> SseEvent {
        SseEvent {
            name: if name.is_empty() {
                MESSAGE_EVENT.to_string()
            } else {
                name
            },
            data: data_lines.join("\n"),
        }
    }
}

/// Extract the session id from an endpoint-event payload.
///
/// The payload is a URL-shaped string such as `/sse?sessionid=abc123`.
pub fn session_id_from_endpoint(endpoint: &str) -> Option<String> {
    let (_, query) = endpoint.trim().split_once('?')?;
    for pair in query.split('&') {
        if let Some(value) = pair.strip_prefix(SESSION_ID_PARAM) {
            if let Some(value) = value.strip_prefix('=') {
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}
