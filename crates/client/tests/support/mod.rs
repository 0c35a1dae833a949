//! In-process mock gateway for exercising the client end to end.
//!
//! Speaks just enough of the wire protocol: issues a challenge on connect,
//! answers the `connect` request, echoes, and misbehaves on demand.

use std::{
    net::SocketAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    axum::{
        Router,
        extract::{
            State, WebSocketUpgrade,
            ws::{Message, WebSocket},
        },
        response::IntoResponse,
        routing::get,
    },
    futures::{SinkExt, StreamExt},
    serde_json::{Value, json},
    tokio::{net::TcpListener, sync::Notify, task::JoinHandle},
};

/// Knobs for how the gateway treats connecting clients.
#[derive(Clone)]
pub struct Behavior {
    /// Reject the handshake with this message instead of greeting.
    pub reject_auth: Option<String>,
    /// Device token issued in the hello payload.
    pub issue_device_token: Option<String>,
    /// Answer protocol pings with pongs.
    pub respond_pongs: bool,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            reject_auth: None,
            issue_device_token: None,
            respond_pongs: true,
        }
    }
}

struct Shared {
    behavior: Behavior,
    connections: AtomicUsize,
    auths: Mutex<Vec<Value>>,
    kill: Notify,
}

pub struct MockGateway {
    addr: SocketAddr,
    shared: Arc<Shared>,
    server: JoinHandle<()>,
}

impl MockGateway {
    pub async fn spawn(behavior: Behavior) -> Self {
        let shared = Arc::new(Shared {
            behavior,
            connections: AtomicUsize::new(0),
            auths: Mutex::new(Vec::new()),
            kill: Notify::new(),
        });
        let app = Router::new()
            .route("/ws", get(ws_upgrade))
            .with_state(Arc::clone(&shared));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { addr, shared, server }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// WebSocket connections accepted so far.
    pub fn connections(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    /// Auth blocks received in connect requests, in order.
    pub fn auths(&self) -> Vec<Value> {
        self.shared.auths.lock().unwrap().clone()
    }

    /// Drop every open connection without a close frame.
    pub fn kill_connections(&self) {
        self.shared.kill.notify_waiters();
    }

    /// Stop accepting connections entirely.
    pub fn stop(&self) {
        self.server.abort();
    }
}

impl Drop for MockGateway {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(shared): State<Arc<Shared>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, shared))
}

async fn handle_socket(socket: WebSocket, shared: Arc<Shared>) {
    shared.connections.fetch_add(1, Ordering::SeqCst);
    let (mut sink, mut stream) = socket.split();

    let challenge = json!({
        "type": "event",
        "event": "connect.challenge",
        "payload": { "nonce": "abc123" },
    });
    if sink.send(Message::Text(challenge.to_string().into())).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            _ = shared.kill.notified() => return,
            msg = stream.next() => {
                let Some(Ok(Message::Text(raw))) = msg else { return };
                let Ok(frame) = serde_json::from_str::<Value>(raw.as_str()) else {
                    continue;
                };
                let is_connect = frame["method"] == "connect";
                let Some(reply) = respond(&shared, &frame).await else {
                    continue;
                };
                let greeted = is_connect && reply["ok"] == true;
                if sink.send(Message::Text(reply.to_string().into())).await.is_err() {
                    return;
                }
                if greeted {
                    // An unsolicited domain event right after the hello,
                    // so tests can watch dispatcher fan-out.
                    let event = json!({
                        "type": "event",
                        "event": "job.update",
                        "payload": { "seq": 1 },
                    });
                    if sink.send(Message::Text(event.to_string().into())).await.is_err() {
                        return;
                    }
                }
            },
        }
    }
}

async fn respond(shared: &Shared, frame: &Value) -> Option<Value> {
    match frame["type"].as_str()? {
        "ping" => shared
            .behavior
            .respond_pongs
            .then(|| json!({ "type": "pong" })),
        "req" => {
            let id = frame["id"].as_str()?;
            match frame["method"].as_str()? {
                "connect" => {
                    shared
                        .auths
                        .lock()
                        .unwrap()
                        .push(frame["params"]["auth"].clone());
                    if let Some(message) = &shared.behavior.reject_auth {
                        return Some(json!({
                            "type": "res", "id": id, "ok": false,
                            "error": { "code": "AUTH_FAILED", "message": message },
                        }));
                    }
                    let mut payload = json!({
                        "protocol": 3,
                        "server": { "version": "9.9.9", "hostname": "mock" },
                        "features": ["chat", "cron"],
                    });
                    if let Some(token) = &shared.behavior.issue_device_token {
                        payload["deviceToken"] = json!(token);
                    }
                    Some(json!({ "type": "res", "id": id, "ok": true, "payload": payload }))
                },
                "echo" => {
                    let params = frame["params"].clone();
                    if let Some(delay) = params["delayMs"].as_u64() {
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                    }
                    Some(json!({ "type": "res", "id": id, "ok": true, "payload": params }))
                },
                "boom" => Some(json!({
                    "type": "res", "id": id, "ok": false,
                    "error": { "code": "INVALID_REQUEST", "message": "boom" },
                })),
                method => Some(json!({
                    "type": "res", "id": id, "ok": false,
                    "error": {
                        "code": "METHOD_NOT_FOUND",
                        "message": format!("unknown method: {method}"),
                    },
                })),
            }
        },
        _ => None,
    }
}
