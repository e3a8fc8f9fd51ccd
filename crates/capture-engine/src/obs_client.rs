//! Minimal obs-websocket v5 client.
//!
//! Handles the Hello/Identify handshake (with optional challenge-response
//! authentication), matches request responses by id, and tracks the
//! recording state from `RecordStateChanged` events so callers can wait for
//! OBS to confirm a transition instead of sleeping.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, SinkExt, StreamExt};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use goexport_common::config::ObsConfig;
use goexport_common::error::{ExportError, ExportResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<ObsResponse>>>>;

const OP_HELLO: u64 = 0;
const OP_IDENTIFY: u64 = 1;
const OP_IDENTIFIED: u64 = 2;
const OP_EVENT: u64 = 5;
const OP_REQUEST: u64 = 6;
const OP_REQUEST_RESPONSE: u64 = 7;

/// `EventSubscription::Outputs`.
const SUBSCRIBE_OUTPUTS: u64 = 1 << 6;

/// Request status code for "resource already exists".
pub const CODE_ALREADY_EXISTS: u64 = 601;

const OUTPUT_STARTED: &str = "OBS_WEBSOCKET_OUTPUT_STARTED";
const OUTPUT_STOPPED: &str = "OBS_WEBSOCKET_OUTPUT_STOPPED";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const STATE_POLL: Duration = Duration::from_millis(10);

/// Reply to one request.
#[derive(Debug, Clone, PartialEq)]
pub struct ObsResponse {
    pub request_type: String,
    pub result: bool,
    pub code: u64,
    pub comment: Option<String>,
    pub data: Value,
}

impl ObsResponse {
    fn from_payload(d: &Value) -> Self {
        let status = &d["requestStatus"];
        Self {
            request_type: d["requestType"].as_str().unwrap_or_default().to_string(),
            result: status["result"].as_bool().unwrap_or(false),
            code: status["code"].as_u64().unwrap_or(0),
            comment: status["comment"].as_str().map(str::to_string),
            data: d.get("responseData").cloned().unwrap_or(Value::Null),
        }
    }

    fn into_error(self) -> ExportError {
        ExportError::obs(format!(
            "{} failed (code {}): {}",
            self.request_type,
            self.code,
            self.comment.as_deref().unwrap_or("no comment")
        ))
    }
}

/// Last recording state reported by OBS.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordState {
    pub active: bool,
    pub state: String,
    pub output_path: Option<String>,

    /// Number of state events seen so far.
    pub changes: u64,
}

impl RecordState {
    /// Whether OBS has settled into `active` (not merely starting or stopping).
    pub fn settled(&self, active: bool) -> bool {
        let terminal = if active { OUTPUT_STARTED } else { OUTPUT_STOPPED };
        self.active == active && self.state == terminal
    }
}

/// Connected, identified session with an OBS instance.
pub struct ObsClient {
    writer: tokio::sync::Mutex<SplitSink<WsStream, Message>>,
    pending: Pending,
    record_state: Arc<Mutex<RecordState>>,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
}

impl ObsClient {
    /// Connect using the configured endpoint, bounded by `connect_timeout_ms`.
    pub async fn connect(config: &ObsConfig) -> ExportResult<Self> {
        let url = format!("ws://{}:{}", config.host, config.port);
        let timeout = Duration::from_millis(config.connect_timeout_ms);
        tokio::time::timeout(timeout, Self::connect_url(&url, &config.password))
            .await
            .map_err(|_| ExportError::obs(format!("Timed out connecting to OBS at {url}")))?
    }

    pub async fn connect_url(url: &str, password: &str) -> ExportResult<Self> {
        tracing::debug!(url, "Connecting to OBS");
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| ExportError::obs(format!("Failed to connect to OBS at {url}: {e}")))?;
        let (mut sink, mut stream) = ws.split();

        let hello = next_payload(&mut stream).await?;
        if hello.0 != OP_HELLO {
            return Err(ExportError::obs(format!("Expected Hello, got op {}", hello.0)));
        }
        let rpc_version = hello.1["rpcVersion"].as_u64().unwrap_or(1);

        let mut identify = json!({
            "rpcVersion": rpc_version,
            "eventSubscriptions": SUBSCRIBE_OUTPUTS,
        });
        if let Some(auth) = hello.1.get("authentication") {
            let challenge = auth["challenge"].as_str().unwrap_or_default();
            let salt = auth["salt"].as_str().unwrap_or_default();
            identify["authentication"] = Value::String(auth_response(password, salt, challenge));
        }
        send_op(&mut sink, OP_IDENTIFY, identify).await?;

        let identified = next_payload(&mut stream).await?;
        if identified.0 != OP_IDENTIFIED {
            return Err(ExportError::obs(format!(
                "Expected Identified, got op {}",
                identified.0
            )));
        }
        tracing::info!(url, "Connected to OBS");

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let record_state = Arc::new(Mutex::new(RecordState::default()));
        let reader = tokio::spawn(read_loop(stream, Arc::clone(&pending), Arc::clone(&record_state)));

        Ok(Self {
            writer: tokio::sync::Mutex::new(sink),
            pending,
            record_state,
            next_id: AtomicU64::new(1),
            reader,
        })
    }

    /// Send a request and wait for its response, failed or not.
    pub async fn call(&self, request_type: &str, data: Value) -> ExportResult<ObsResponse> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id.clone(), tx);

        let payload = json!({
            "requestType": request_type,
            "requestId": id,
            "requestData": data,
        });
        tracing::debug!(request_type, request_id = %id, "OBS request");
        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = send_op(&mut *writer, OP_REQUEST, payload).await {
                lock(&self.pending).remove(&id);
                return Err(e);
            }
        }

        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(ExportError::obs("OBS connection closed")),
            Err(_) => {
                lock(&self.pending).remove(&id);
                Err(ExportError::obs(format!("{request_type} got no response")))
            }
        }
    }

    /// Send a request; a failed status becomes an error.
    pub async fn request(&self, request_type: &str, data: Value) -> ExportResult<Value> {
        let response = self.call(request_type, data).await?;
        if response.result {
            Ok(response.data)
        } else {
            Err(response.into_error())
        }
    }

    /// Like [`request`](Self::request), but "already exists" counts as success.
    pub async fn ensure(&self, request_type: &str, data: Value) -> ExportResult<()> {
        let response = self.call(request_type, data).await?;
        if response.result || response.code == CODE_ALREADY_EXISTS {
            Ok(())
        } else {
            Err(response.into_error())
        }
    }

    pub fn record_state(&self) -> RecordState {
        lock(&self.record_state).clone()
    }

    /// Poll until OBS reports a settled recording state of `active`.
    pub async fn wait_for_record_state(&self, active: bool, timeout: Duration) -> ExportResult<RecordState> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let state = self.record_state();
            if state.settled(active) {
                return Ok(state);
            }
            if self.reader.is_finished() {
                return Err(ExportError::obs("OBS connection closed"));
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ExportError::obs(format!(
                    "OBS did not confirm recording {} within {}ms (last state {:?})",
                    if active { "start" } else { "stop" },
                    timeout.as_millis(),
                    state.state
                )));
            }
            tokio::time::sleep(STATE_POLL).await;
        }
    }
}

impl Drop for ObsClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// `base64(sha256(base64(sha256(password + salt)) + challenge))`.
pub fn auth_response(password: &str, salt: &str, challenge: &str) -> String {
    let secret = BASE64.encode(Sha256::digest(format!("{password}{salt}").as_bytes()));
    BASE64.encode(Sha256::digest(format!("{secret}{challenge}").as_bytes()))
}

async fn send_op<S>(sink: &mut S, op: u64, d: Value) -> ExportResult<()>
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let text = json!({ "op": op, "d": d }).to_string();
    sink.send(Message::Text(text))
        .await
        .map_err(|e| ExportError::obs(format!("Failed to send to OBS: {e}")))
}

/// Next `(op, d)` from the socket, skipping non-text frames.
async fn next_payload(stream: &mut SplitStream<WsStream>) -> ExportResult<(u64, Value)> {
    while let Some(message) = stream.next().await {
        match message.map_err(|e| ExportError::obs(format!("OBS socket error: {e}")))? {
            Message::Text(text) => return parse_frame(&text),
            Message::Close(frame) => {
                let reason = frame
                    .map(|f| format!("{} {}", u16::from(f.code), f.reason))
                    .unwrap_or_default();
                return Err(ExportError::obs(format!("OBS closed the connection {reason}")));
            }
            _ => continue,
        }
    }
    Err(ExportError::obs("OBS closed the connection"))
}

fn parse_frame(text: &str) -> ExportResult<(u64, Value)> {
    let mut frame: Value = serde_json::from_str(text)?;
    let op = frame["op"]
        .as_u64()
        .ok_or_else(|| ExportError::obs(format!("Malformed OBS message: {text}")))?;
    Ok((op, frame["d"].take()))
}

async fn read_loop(mut stream: SplitStream<WsStream>, pending: Pending, record_state: Arc<Mutex<RecordState>>) {
    loop {
        let (op, d) = match next_payload(&mut stream).await {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "OBS reader stopped");
                break;
            }
        };
        match op {
            OP_REQUEST_RESPONSE => {
                let id = d["requestId"].as_str().unwrap_or_default().to_string();
                let response = ObsResponse::from_payload(&d);
                if !response.result {
                    tracing::debug!(request_type = %response.request_type, code = response.code, "OBS request failed");
                }
                if let Some(tx) = lock(&pending).remove(&id) {
                    let _ = tx.send(response);
                }
            }
            OP_EVENT => apply_event(&record_state, &d),
            _ => {}
        }
    }
    // Dropping the senders wakes every caller still waiting.
    lock(&pending).clear();
}

fn apply_event(record_state: &Mutex<RecordState>, d: &Value) {
    if d["eventType"].as_str() != Some("RecordStateChanged") {
        return;
    }
    let data = &d["eventData"];
    let mut state = lock(record_state);
    state.active = data["outputActive"].as_bool().unwrap_or(false);
    state.state = data["outputState"].as_str().unwrap_or_default().to_string();
    if let Some(path) = data["outputPath"].as_str() {
        state.output_path = Some(path.to_string());
    }
    state.changes += 1;
    tracing::debug!(active = state.active, state = %state.state, "OBS record state");
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_response_matches_protocol_example() {
        // Two-step SHA-256/base64 chain, computed independently.
        let secret = BASE64.encode(Sha256::digest(b"supersecretpasswordsalty"));
        let expected = BASE64.encode(Sha256::digest(format!("{secret}challenge").as_bytes()));
        assert_eq!(auth_response("supersecretpassword", "salty", "challenge"), expected);
        assert_ne!(auth_response("other", "salty", "challenge"), expected);
    }

    #[test]
    fn test_response_from_payload() {
        let d = json!({
            "requestType": "CreateScene",
            "requestId": "3",
            "requestStatus": {"result": false, "code": 601, "comment": "exists"},
        });
        let response = ObsResponse::from_payload(&d);
        assert!(!response.result);
        assert_eq!(response.code, CODE_ALREADY_EXISTS);
        assert_eq!(response.data, Value::Null);
        assert!(response.into_error().to_string().contains("CreateScene failed (code 601)"));
    }

    #[test]
    fn test_record_state_events() {
        let state = Mutex::new(RecordState::default());
        apply_event(
            &state,
            &json!({"eventType": "RecordStateChanged", "eventData": {
                "outputActive": false, "outputState": "OBS_WEBSOCKET_OUTPUT_STARTING"}}),
        );
        assert!(!lock(&state).settled(true));

        apply_event(
            &state,
            &json!({"eventType": "RecordStateChanged", "eventData": {
                "outputActive": true, "outputState": OUTPUT_STARTED, "outputPath": null}}),
        );
        apply_event(&state, &json!({"eventType": "SceneCreated", "eventData": {}}));
        let current = lock(&state).clone();
        assert!(current.settled(true));
        assert_eq!(current.changes, 2);
        assert_eq!(current.output_path, None);
    }

    #[test]
    fn test_parse_frame() {
        let (op, d) = parse_frame(r#"{"op":2,"d":{"negotiatedRpcVersion":1}}"#).unwrap();
        assert_eq!(op, OP_IDENTIFIED);
        assert_eq!(d["negotiatedRpcVersion"], 1);
        assert!(parse_frame(r#"{"d":{}}"#).is_err());
    }
}
