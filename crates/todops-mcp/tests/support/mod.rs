//! In-process mock todo-mcp server speaking the SSE transport.
//!
//! Each test starts its own server on an ephemeral port; behavior is scripted
//! through [`MockBehavior`]. The server implements just enough HTTP for the
//! client under test: GET opens the event stream, POST carries a JSON-RPC
//! request and is answered with an acknowledgement status, and the JSON-RPC
//! response is pushed back as a `message` event on the stream.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{Sender, channel};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde_json::{Value, json};

/// Session id the mock announces on the stream.
pub const SESSION_ID: &str = "mock-session-1";

/// Scripted server behavior for one test scenario.
#[derive(Clone)]
pub struct MockBehavior {
    /// HTTP status for the stream GET.
    pub sse_status: u16,
    /// Delay before the endpoint event is emitted. `None` = never emitted.
    pub announce_after: Option<Duration>,
    /// Emit a second endpoint event with a different session id.
    pub duplicate_announce: bool,
    /// Answer initialize with this error message instead of a result.
    pub init_error: Option<String>,
    /// Answer initialize with a result payload of the wrong shape.
    pub malformed_init_result: bool,
    /// Push a garbage (non-JSON) data frame before each real response.
    pub garbage_before_response: bool,
    /// Acknowledge but never answer the first tools/call request.
    pub swallow_first_call: bool,
    /// Answer the first tools/call request only after this delay.
    pub delay_first_call: Option<Duration>,
    /// Acknowledge tools/call requests, then close the event stream instead
    /// of answering.
    pub close_stream_on_call: bool,
    /// HTTP status for the POST acknowledgement.
    pub post_status: u16,
    /// Tool name -> Ok(text result) | Err(error message).
    pub tools: HashMap<String, Result<String, String>>,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            sse_status: 200,
            announce_after: Some(Duration::from_millis(20)),
            duplicate_announce: false,
            init_error: None,
            malformed_init_result: false,
            garbage_before_response: false,
            swallow_first_call: false,
            delay_first_call: None,
            close_stream_on_call: false,
            post_status: 202,
            tools: HashMap::new(),
        }
    }
}

impl MockBehavior {
    /// Register a tool that succeeds with the given text.
    pub fn with_tool(mut self, name: &str, text: &str) -> Self {
        self.tools.insert(name.to_string(), Ok(text.to_string()));
        self
    }

    /// Register a tool that fails with the given error message.
    pub fn with_failing_tool(mut self, name: &str, message: &str) -> Self {
        self.tools.insert(name.to_string(), Err(message.to_string()));
        self
    }
}

/// What the POST handler asks the stream writer to do.
enum StreamDirective {
    /// Push a `message` event carrying this payload.
    Message(String),
    /// Drop the stream connection.
    Close,
}

struct ServerState {
    behavior: MockBehavior,
    /// Sender half of the event stream, installed by the GET handler.
    events: Mutex<Option<Sender<StreamDirective>>>,
    calls_served: AtomicU32,
}

/// A running mock server.
pub struct MockServer {
    addr: SocketAddr,
}

impl MockServer {
    /// Start a server with the given behavior on an ephemeral port.
    pub fn start(behavior: MockBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
        let addr = listener.local_addr().expect("local addr");
        let state = Arc::new(ServerState {
            behavior,
            events: Mutex::new(None),
            calls_served: AtomicU32::new(0),
        });

        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let state = Arc::clone(&state);
                thread::spawn(move || handle_connection(stream, state));
            }
        });

        Self { addr }
    }

    /// Base URL to hand to the client config.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

fn handle_connection(stream: TcpStream, state: Arc<ServerState>) {
    let mut reader = BufReader::new(match stream.try_clone() {
        Ok(clone) => clone,
        Err(_) => return,
    });

    let mut request_line = String::new();
    if reader.read_line(&mut request_line).unwrap_or(0) == 0 {
        return;
    }
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("").to_string();

    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).unwrap_or(0) == 0 {
            return;
        }
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        let lower = line.to_ascii_lowercase();
        if let Some(value) = lower.strip_prefix("content-length:") {
            content_length = value.trim().parse().unwrap_or(0);
        }
    }

    match method.as_str() {
        "GET" => handle_sse(stream, state),
        "POST" => {
            let mut body = vec![0u8; content_length];
            if reader.read_exact(&mut body).is_err() {
                return;
            }
            handle_post(stream, state, body);
        }
        _ => {}
    }
}

fn handle_sse(mut stream: TcpStream, state: Arc<ServerState>) {
    let behavior = state.behavior.clone();

    if behavior.sse_status != 200 {
        let _ = write!(
            stream,
            "HTTP/1.1 {} Error\r\nContent-Length: 0\r\n\r\n",
            behavior.sse_status
        );
        return;
    }

    let _ = write!(
        stream,
        "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\n\r\n"
    );
    let _ = stream.flush();

    let (tx, rx) = channel::<StreamDirective>();
    *state.events.lock().unwrap() = Some(tx);

    if let Some(delay) = behavior.announce_after {
        thread::sleep(delay);
        let _ = write!(
            stream,
            "event: endpoint\ndata: /sse?sessionid={}\n\n",
            SESSION_ID
        );
        let _ = stream.flush();

        if behavior.duplicate_announce {
            let _ = write!(
                stream,
                "event: endpoint\ndata: /sse?sessionid=other-session-9\n\n"
            );
            let _ = stream.flush();
        }
    }

    while let Ok(directive) = rx.recv() {
        match directive {
            StreamDirective::Message(payload) => {
                if write!(stream, "event: message\ndata: {}\n\n", payload).is_err() {
                    break;
                }
                if stream.flush().is_err() {
                    break;
                }
            }
            StreamDirective::Close => break,
        }
    }
}

fn handle_post(mut stream: TcpStream, state: Arc<ServerState>, body: Vec<u8>) {
    let behavior = &state.behavior;
    let request: Value = serde_json::from_slice(&body).unwrap_or(json!({}));
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let method = request.get("method").and_then(|m| m.as_str()).unwrap_or("");

    let mut delay_before_reply = None;
    let mut close_stream = false;
    let reply = match method {
        "initialize" => {
            if let Some(message) = &behavior.init_error {
                Some(error_envelope(&id, message))
            } else if behavior.malformed_init_result {
                // Wrong-shaped result: protocolVersion is not a string.
                Some(json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": { "protocolVersion": 42 }
                }))
            } else {
                Some(json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {
                        "protocolVersion": "2024-11-05",
                        "capabilities": { "tools": {} },
                        "serverInfo": { "name": "mock-todo-mcp", "version": "1.0.0" }
                    }
                }))
            }
        }
        "tools/list" => {
            let tools: Vec<Value> = behavior
                .tools
                .keys()
                .map(|name| {
                    json!({
                        "name": name,
                        "description": format!("Mock tool {}", name),
                        "inputSchema": {
                            "type": "object",
                            "properties": { "title": { "type": "string" } }
                        }
                    })
                })
                .collect();
            Some(json!({ "jsonrpc": "2.0", "id": id, "result": { "tools": tools } }))
        }
        "tools/call" => {
            let served = state.calls_served.fetch_add(1, Ordering::SeqCst);
            if behavior.close_stream_on_call {
                close_stream = true;
                None
            } else if behavior.swallow_first_call && served == 0 {
                None
            } else {
                if served == 0 {
                    delay_before_reply = behavior.delay_first_call;
                }
                let name = request
                    .pointer("/params/name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                match behavior.tools.get(name) {
                    Some(Ok(text)) => Some(json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "result": { "content": [{ "type": "text", "text": text }] }
                    })),
                    Some(Err(message)) => Some(error_envelope(&id, message)),
                    None => Some(error_envelope(&id, &format!("unknown tool: {}", name))),
                }
            }
        }
        other => Some(error_envelope(&id, &format!("method not found: {}", other))),
    };

    // Acknowledge the POST; the real answer travels on the stream.
    let status_line = match behavior.post_status {
        200 => "200 OK".to_string(),
        202 => "202 Accepted".to_string(),
        other => format!("{} Error", other),
    };
    let ack_body = if behavior.post_status >= 400 { "boom" } else { "" };
    let _ = write!(
        stream,
        "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status_line,
        ack_body.len(),
        ack_body
    );
    let _ = stream.flush();

    if behavior.post_status >= 400 {
        return;
    }

    if let Some(delay) = delay_before_reply {
        thread::sleep(delay);
    }

    let events = state.events.lock().unwrap();
    if let Some(tx) = events.as_ref() {
        if behavior.garbage_before_response {
            let _ = tx.send(StreamDirective::Message("this is not json {{{".to_string()));
        }
        if let Some(reply) = reply {
            let _ = tx.send(StreamDirective::Message(reply.to_string()));
        }
        if close_stream {
            let _ = tx.send(StreamDirective::Close);
        }
    }
}

fn error_envelope(id: &Value, message: &str) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": { "message": message } })
}
