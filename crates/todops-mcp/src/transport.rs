//! SSE transport for MCP communication.
//!
//! The todo-mcp server speaks JSON-RPC over a split channel: requests are
//! HTTP POSTs to a session-scoped endpoint, answered with an acknowledgement
//! status only; responses travel back asynchronously as `message` events on a
//! long-lived SSE stream. A background reader thread owns the stream for the
//! lifetime of the connection and hands parsed envelopes to the blocked
//! caller through an mpsc channel.
//!
//! Only one call is ever in flight at a time, so the first message off the
//! channel after a POST is treated as that POST's response. Request ids are
//! carried on the wire but not used for correlation.

use std::io::BufReader;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, channel};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};

use crate::error::{McpError, Result};
use crate::protocol::{JsonRpcRequest, JsonRpcResponse};
use crate::sse::{ENDPOINT_EVENT, EventReader, MESSAGE_EVENT, session_id_from_endpoint};

/// Default bound on the session-announcement wait.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on the response wait after a POST.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default grace period for the reader to stop on disconnect.
pub const DEFAULT_DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// Interval between polls while waiting for the session announcement.
const SESSION_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Configuration for the SSE transport.
#[derive(Debug, Clone)]
pub struct SseTransportConfig {
    /// URL of the SSE endpoint (e.g. `http://localhost:8081/sse`).
    pub sse_url: String,
    /// How long to wait for the session announcement after the stream opens.
    pub connect_timeout: Duration,
    /// How long to wait for a response envelope after a successful POST.
    pub response_timeout: Duration,
    /// How long `disconnect` waits for the reader before detaching it.
    pub disconnect_grace: Duration,
    /// Extra headers sent on every request.
    pub headers: Vec<(String, String)>,
}

impl SseTransportConfig {
    /// Create a new config with the given SSE endpoint URL.
    pub fn new(sse_url: impl Into<String>) -> Self {
        Self {
            sse_url: sse_url.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            disconnect_grace: DEFAULT_DISCONNECT_GRACE,
            headers: Vec::new(),
        }
    }

    /// Set the session-announcement timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the response timeout.
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Set the disconnect grace period.
    pub fn with_disconnect_grace(mut self, grace: Duration) -> Self {
        self.disconnect_grace = grace;
        self
    }

    /// Add a header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }
}

/// Transport for communicating with a todo-mcp server over SSE.
///
/// All methods take `&self`; internal state is guarded so a caller blocked in
/// [`send_request`](Self::send_request) and a concurrent
/// [`disconnect`](Self::disconnect) cannot deadlock.
pub struct SseTransport {
    /// Transport configuration.
    config: SseTransportConfig,
    /// Client for POSTing requests (bounded by the response timeout).
    post_client: reqwest::blocking::Client,
    /// Client for the long-lived stream GET (no total-request timeout).
    stream_client: reqwest::blocking::Client,
    /// Session id, written exactly once by the reader.
    session_id: Arc<Mutex<Option<String>>>,
    /// Stop signal checked by the reader once per event.
    stop: Arc<AtomicBool>,
    /// Delivery sink: receiving end of the reader's channel.
    sink: Mutex<Option<Receiver<JsonRpcResponse>>>,
    /// Reader thread handle, present while a connection is live.
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl SseTransport {
    /// Create a disconnected transport.
    ///
    /// Validates the URL and builds the HTTP clients; no network activity
    /// happens until [`connect`](Self::connect).
    pub fn new(config: SseTransportConfig) -> Result<Self> {
        let _parsed = url::Url::parse(&config.sse_url)
            .map_err(|e| McpError::transport(format!("invalid URL: {}", e)))?;

        let post_client = reqwest::blocking::Client::builder()
            .timeout(config.response_timeout)
            .build()
            .map_err(|e| McpError::transport(format!("failed to build HTTP client: {}", e)))?;

        // The stream body stays open for the connection's lifetime, so this
        // client must not carry a total-request timeout.
        let stream_client = reqwest::blocking::Client::builder()
            .timeout(None)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| McpError::transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            config,
            post_client,
            stream_client,
            session_id: Arc::new(Mutex::new(None)),
            stop: Arc::new(AtomicBool::new(false)),
            sink: Mutex::new(None),
            reader: Mutex::new(None),
        })
    }

    /// Open the event stream, start the reader, and wait for the session
    /// announcement.
    ///
    /// Fails with `ConnectionFailed` if the stream does not open with a
    /// success status, and with `Timeout` if no announcement arrives within
    /// the connect timeout. On timeout the reader is left running; the caller
    /// is expected to call [`disconnect`](Self::disconnect).
    pub fn connect(&self) -> Result<()> {
        {
            let mut reader = self.lock_reader()?;
            if let Some(handle) = reader.as_ref() {
                if !handle.is_finished() {
                    tracing::debug!(url = %self.config.sse_url, "transport already connected");
                    return Ok(());
                }
                // The previous stream died; the stored session id is stale.
                tracing::debug!("previous event stream reader finished, resetting session");
                if let Some(handle) = reader.take() {
                    let _ = handle.join();
                }
            }
        }
        self.session_id
            .lock()
            .map_err(|_| McpError::transport("failed to acquire session lock"))?
            .take();

        tracing::info!(url = %self.config.sse_url, "opening event stream");

        let mut req = self
            .stream_client
            .get(&self.config.sse_url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        for (key, value) in &self.config.headers {
            req = req.header(key, value);
        }

        let response = req
            .send()
            .map_err(|e| McpError::connection_failed(format!("GET {} failed: {}", self.config.sse_url, e)))?;

        if !response.status().is_success() {
            return Err(McpError::connection_failed(format!(
                "SSE endpoint returned {}",
                response.status()
            )));
        }

        let (tx, rx) = channel();
        self.stop.store(false, Ordering::SeqCst);
        *self.lock_sink()? = Some(rx);

        let session_id = Arc::clone(&self.session_id);
        let stop = Arc::clone(&self.stop);
        let handle = std::thread::spawn(move || run_reader(response, tx, session_id, stop));
        *self.lock_reader()? = Some(handle);

        self.wait_for_session()
    }

    /// Poll until the reader has stored the session id, bounded by the
    /// connect timeout.
    fn wait_for_session(&self) -> Result<()> {
        let deadline = Instant::now() + self.config.connect_timeout;

        loop {
            if let Some(session_id) = self.session_id() {
                tracing::info!(session = %session_id, "session established");
                return Ok(());
            }

            // A dead reader means the announcement can never arrive.
            let reader_finished = self
                .lock_reader()?
                .as_ref()
                .is_none_or(|handle| handle.is_finished());
            if reader_finished {
                return Err(McpError::ConnectionClosed);
            }

            if Instant::now() >= deadline {
                return Err(McpError::timeout(format!(
                    "no endpoint event within {:?}",
                    self.config.connect_timeout
                )));
            }

            std::thread::sleep(SESSION_POLL_INTERVAL);
        }
    }

    /// Send a request and block until the matching response arrives on the
    /// stream.
    ///
    /// The POST must answer with an acknowledgement status (200 or 202); the
    /// response envelope is then popped from the delivery sink, bounded by
    /// the response timeout.
    pub fn send_request(&self, request: &JsonRpcRequest) -> Result<JsonRpcResponse> {
        let session_id = self.session_id().ok_or(McpError::NotConnected)?;

        let sink = self.lock_sink()?;
        let rx = sink.as_ref().ok_or(McpError::NotConnected)?;

        // Messages left over from a timed-out earlier call must not be
        // mistaken for this call's response.
        while let Ok(stale) = rx.try_recv() {
            tracing::warn!(id = %stale.id, "discarding stale message from an earlier call");
        }

        let url = format!("{}?sessionid={}", self.config.sse_url, session_id);
        let json = serde_json::to_string(request)?;

        tracing::debug!(method = %request.method, id = %request.id, "sending request");

        let mut req = self
            .post_client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .body(json);
        for (key, value) in &self.config.headers {
            req = req.header(key, value);
        }

        let response = req
            .send()
            .map_err(|e| McpError::transport(format!("POST failed: {}", e)))?;

        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::ACCEPTED {
            let body = response.text().unwrap_or_default();
            return Err(McpError::transport(format!(
                "unexpected status {}: {}",
                status, body
            )));
        }

        match rx.recv_timeout(self.config.response_timeout) {
            Ok(envelope) => {
                tracing::debug!(id = %envelope.id, "received response");
                Ok(envelope)
            }
            Err(RecvTimeoutError::Timeout) => Err(McpError::timeout(format!(
                "no response within {:?}",
                self.config.response_timeout
            ))),
            // The reader exited and dropped its sender; fail fast instead of
            // waiting out the full timeout.
            Err(RecvTimeoutError::Disconnected) => Err(McpError::ConnectionClosed),
        }
    }

    /// Stop the reader and reset session state. Idempotent; safe to call
    /// concurrently with an in-flight `send_request`.
    pub fn disconnect(&self) -> Result<()> {
        self.stop.store(true, Ordering::SeqCst);

        if let Some(handle) = self.lock_reader()?.take() {
            let deadline = Instant::now() + self.config.disconnect_grace;
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(SESSION_POLL_INTERVAL);
            }

            if handle.is_finished() {
                let _ = handle.join();
                tracing::info!("event stream reader stopped");
            } else {
                // Likely wedged in a blocking read on an idle stream; the
                // thread exits on its own once the stream breaks.
                tracing::warn!(
                    grace = ?self.config.disconnect_grace,
                    "event stream reader did not stop within grace period, detaching"
                );
                drop(handle);
            }
        }

        *self.lock_sink()? = None;
        self.session_id
            .lock()
            .map_err(|_| McpError::transport("failed to acquire session lock"))?
            .take();

        Ok(())
    }

    /// The session id announced by the server, if connected.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().ok().and_then(|guard| guard.clone())
    }

    /// Whether a session is currently established.
    pub fn is_connected(&self) -> bool {
        self.session_id().is_some()
    }

    fn lock_sink(&self) -> Result<std::sync::MutexGuard<'_, Option<Receiver<JsonRpcResponse>>>> {
        self.sink
            .lock()
            .map_err(|_| McpError::transport("failed to acquire sink lock"))
    }

    fn lock_reader(&self) -> Result<std::sync::MutexGuard<'_, Option<JoinHandle<()>>>> {
        self.reader
            .lock()
            .map_err(|_| McpError::transport("failed to acquire reader lock"))
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        let _ = self.disconnect();
    }
}

/// Reader loop: consumes the event stream until it closes, a read error
/// occurs, or the stop signal is raised. No sink writes happen after exit.
fn run_reader(
    response: reqwest::blocking::Response,
    sink: Sender<JsonRpcResponse>,
    session_id: Arc<Mutex<Option<String>>>,
    stop: Arc<AtomicBool>,
) {
    let mut events = EventReader::new(BufReader::new(response));

    loop {
        if stop.load(Ordering::SeqCst) {
            tracing::debug!("event stream reader stopping on signal");
            break;
        }

        let event = match events.next_event() {
            Ok(Some(event)) => event,
            Ok(None) => {
                tracing::info!("event stream closed by server");
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, "event stream read failed");
                break;
            }
        };

        match event.name.as_str() {
            ENDPOINT_EVENT => {
                let Some(extracted) = session_id_from_endpoint(&event.data) else {
                    tracing::warn!(payload = %event.data, "endpoint event without session id");
                    continue;
                };
                match session_id.lock() {
                    Ok(mut guard) => {
                        // Write-once: a duplicate announcement is a no-op.
                        if guard.is_none() {
                            tracing::debug!(session = %extracted, "session id announced");
                            *guard = Some(extracted);
                        } else {
                            tracing::debug!(session = %extracted, "duplicate endpoint event ignored");
                        }
                    }
                    Err(_) => {
                        tracing::error!("session lock poisoned, stopping reader");
                        break;
                    }
                }
            }
            MESSAGE_EVENT => match serde_json::from_str::<JsonRpcResponse>(&event.data) {
                Ok(envelope) => {
                    // Receiver dropped means the transport disconnected.
                    if sink.send(envelope).is_err() {
                        tracing::debug!("delivery sink closed, stopping reader");
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, payload = %event.data, "discarding malformed message event");
                }
            },
            other => {
                tracing::trace!(event = %other, "ignoring unknown event");
            }
        }
    }
}
