//! The connection task: exclusive owner of one WebSocket.
//!
//! A single select loop reads inbound frames, writes outbound frames,
//! drives the heartbeat, and reacts to cancellation. Frames are processed
//! in arrival order, and every way out of the loop funnels through one
//! cleanup path, so each transition finishes its side effects before the
//! next event is looked at.

use std::sync::Arc;

use {
    futures::{
        SinkExt, StreamExt,
        stream::SplitSink,
    },
    tokio::{
        net::TcpStream,
        sync::{mpsc, oneshot},
        time::{Instant, MissedTickBehavior},
    },
    tokio_tungstenite::{
        MaybeTlsStream, WebSocketStream,
        tungstenite::{
            Message,
            protocol::{CloseFrame, frame::coding::CloseCode},
        },
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
};

use portal_protocol::{self as protocol, ErrorShape, Frame, HelloOk};

use crate::{
    client::{ClientInner, ConnectionState, topics},
    error::ClientError,
    handshake,
    identity::DeviceIdentity,
    options::ClientOptions,
};

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Everything the connection task needs from the state machine.
pub(crate) struct ConnectionParams {
    pub inner: Arc<ClientInner>,
    pub opts: ClientOptions,
    pub identity: DeviceIdentity,
    /// Resolves the outer connect future once the handshake settles.
    pub ready: oneshot::Sender<Result<HelloOk, ClientError>>,
    pub outbound: mpsc::UnboundedReceiver<Frame>,
    pub cancel: CancellationToken,
    /// Epoch of this connection's wiring in the state machine.
    pub epoch: u64,
}

/// Handshake and liveness state local to one connection.
struct Link {
    inner: Arc<ClientInner>,
    opts: ClientOptions,
    identity: DeviceIdentity,
    ready: Option<oneshot::Sender<Result<HelloOk, ClientError>>>,
    /// Challenge nonce, held from receipt until the connect request
    /// resolves; dies with the task.
    challenge_nonce: Option<String>,
    /// Correlator id of our own connect request.
    connect_req_id: Option<String>,
    hello: Option<HelloOk>,
    last_pong: Instant,
    epoch: u64,
}

pub(crate) async fn run_connection(ws: WsStream, params: ConnectionParams) {
    let ConnectionParams {
        inner,
        opts,
        identity,
        ready,
        mut outbound,
        cancel,
        epoch,
    } = params;

    let (mut sink, mut stream) = ws.split();
    let mut heartbeat = tokio::time::interval(opts.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut link = Link {
        inner,
        opts,
        identity,
        ready: Some(ready),
        challenge_nonce: None,
        connect_req_id: None,
        hello: None,
        last_pong: Instant::now(),
        epoch,
    };
    let mut handle_gone = false;

    let reason: String = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code: CloseCode::Normal,
                        reason: "client disconnect".into(),
                    })))
                    .await;
                break "client disconnect".into();
            },

            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    // Every handle to this client is gone; nothing left to
                    // reconnect for.
                    handle_gone = true;
                    let _ = sink.send(Message::Close(None)).await;
                    break "client dropped".into();
                };
                if let Err(e) = send_frame(&mut sink, &frame).await {
                    break format!("write failed: {e}");
                }
            },

            _ = heartbeat.tick(), if link.hello.is_some() => {
                if link.last_pong.elapsed() >= link.opts.heartbeat_timeout {
                    warn!(
                        silent_ms = link.last_pong.elapsed().as_millis() as u64,
                        "liveness window elapsed, closing connection"
                    );
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code: CloseCode::from(protocol::HEARTBEAT_CLOSE_CODE),
                            reason: "heartbeat timeout".into(),
                        })))
                        .await;
                    break "heartbeat timeout".into();
                }
                if let Err(e) = send_frame(&mut sink, &Frame::Ping).await {
                    break format!("write failed: {e}");
                }
            },

            msg = stream.next() => match msg {
                Some(Ok(Message::Text(raw))) => match Frame::parse(raw.as_str()) {
                    Ok(frame) => {
                        if let Some(exit) = link.handle_frame(frame, &mut sink).await {
                            break exit;
                        }
                    },
                    Err(error) => warn!(%error, "discarding unparseable frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    break frame
                        .map(|f| format!("close {}: {}", u16::from(f.code), f.reason))
                        .unwrap_or_else(|| "closed by server".into());
                },
                // Binary frames are not part of this protocol; ws-level
                // ping/pong is handled by the library.
                Some(Ok(_)) => {},
                Some(Err(error)) => break format!("transport error: {error}"),
                None => break "connection closed".into(),
            },
        }
    };

    let intentional = cancel.is_cancelled() || handle_gone;
    link.finish(intentional, reason).await;
}

impl Link {
    /// Demultiplex one inbound frame. Returns a close reason when the
    /// connection must end.
    async fn handle_frame(&mut self, frame: Frame, sink: &mut WsSink) -> Option<String> {
        match frame {
            Frame::Event { event, payload } if event == protocol::CHALLENGE_EVENT => {
                self.handle_challenge(payload, sink).await
            },
            Frame::Event { event, payload } => {
                self.inner.dispatcher.emit(&event, &payload);
                None
            },
            Frame::Res { id, ok, payload, error } => {
                if self.connect_req_id.as_deref() == Some(id.as_str()) {
                    self.connect_req_id = None;
                    self.challenge_nonce = None;
                    self.inner.pending.remove(&id);
                    return self.handle_connect_response(ok, payload, error).await;
                }
                let outcome = if ok {
                    Ok(payload.unwrap_or(serde_json::Value::Null))
                } else {
                    Err(error.map(ClientError::Gateway).unwrap_or_else(|| {
                        ClientError::Protocol("error response without error payload".into())
                    }))
                };
                self.inner.pending.resolve(&id, outcome);
                None
            },
            Frame::Pong => {
                self.last_pong = Instant::now();
                None
            },
            Frame::Ping => {
                debug!("ignoring ping frame from server");
                None
            },
            Frame::Req { id, method, .. } => {
                warn!(%id, method, "unexpected request frame from server");
                None
            },
        }
    }

    /// React to the server's auth challenge: emit the event and send the
    /// connect request.
    async fn handle_challenge(
        &mut self,
        payload: serde_json::Value,
        sink: &mut WsSink,
    ) -> Option<String> {
        if self.hello.is_some() || self.connect_req_id.is_some() {
            // Re-challenging an authenticated (or mid-handshake) session is
            // not a defined input; report it and carry on.
            warn!("challenge received outside the handshake window, ignoring");
            return None;
        }

        let nonce = payload
            .get("nonce")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        self.inner.set_state(ConnectionState::Authenticating);
        self.challenge_nonce = Some(nonce.clone());
        self.inner
            .dispatcher
            .emit(topics::CHALLENGE, &serde_json::json!({ "nonce": nonce }));

        let params = handshake::build_connect_params(&self.opts, &self.identity);
        let params = match serde_json::to_value(&params) {
            Ok(value) => value,
            Err(e) => return Some(format!("failed to encode connect request: {e}")),
        };

        // Registered like any request, but under no-op callbacks: the outer
        // connect future is what resolves the caller.
        let (id, no_op) = self.inner.pending.register();
        drop(no_op);
        let frame = Frame::Req {
            id: id.clone(),
            method: protocol::CONNECT_METHOD.into(),
            params,
        };
        self.connect_req_id = Some(id);

        if let Err(e) = send_frame(sink, &frame).await {
            return Some(format!("write failed: {e}"));
        }
        None
    }

    async fn handle_connect_response(
        &mut self,
        ok: bool,
        payload: Option<serde_json::Value>,
        error: Option<ErrorShape>,
    ) -> Option<String> {
        if !ok {
            let message = error
                .map(|e| e.message)
                .unwrap_or_else(|| "authentication rejected".into());
            warn!(%message, "gateway rejected connect");
            if let Some(ready) = self.ready.take() {
                let _ = ready.send(Err(ClientError::AuthRejected(message.clone())));
            }
            // The gateway closes the transport after a rejected handshake;
            // fall out of the loop without reconnecting.
            return Some(format!("authentication rejected: {message}"));
        }

        let hello = match handshake::parse_hello(payload.unwrap_or(serde_json::Value::Null)) {
            Ok(hello) => hello,
            Err(e) => {
                if let Some(ready) = self.ready.take() {
                    let _ = ready.send(Err(e.clone()));
                }
                return Some(e.to_string());
            },
        };

        if let Some(token) = hello.device_token.as_deref() {
            self.inner.identity.save_token(token);
        }
        self.last_pong = Instant::now();
        self.inner.store_hello(&hello);
        self.inner.set_state(ConnectionState::Connected);
        self.inner.reset_reconnect().await;

        match serde_json::to_value(&hello) {
            Ok(value) => self.inner.dispatcher.emit(topics::CONNECTED, &value),
            Err(_) => self
                .inner
                .dispatcher
                .emit(topics::CONNECTED, &serde_json::Value::Null),
        }
        if let Some(ready) = self.ready.take() {
            let _ = ready.send(Ok(hello.clone()));
        }
        self.hello = Some(hello);
        None
    }

    /// The single disconnect path: settle everything this connection owned,
    /// then hand recovery to the reconnection scheduler.
    async fn finish(mut self, intentional: bool, reason: String) {
        let authenticated = self.hello.is_some();
        debug!(%reason, intentional, authenticated, "connection ended");

        // A newer connection may already own the wiring (disconnect then
        // immediate reconnect); only the current epoch tears it down.
        if self.inner.clear_link(self.epoch).await {
            let drain_error = if intentional {
                ClientError::Disconnected
            } else {
                ClientError::ConnectionClosed(reason.clone())
            };
            self.inner.pending.drain(drain_error);
            self.inner.set_state(ConnectionState::Disconnected);
        }

        if let Some(ready) = self.ready.take() {
            // Closed before the handshake settled: reject the in-flight
            // connect; the caller (or retry driver) decides what is next.
            let _ = ready.send(Err(ClientError::ConnectionClosed(reason)));
            return;
        }

        if authenticated {
            self.inner.dispatcher.emit(
                topics::DISCONNECTED,
                &serde_json::json!({ "intentional": intentional, "reason": reason }),
            );
            if !intentional {
                Arc::clone(&self.inner).schedule_reconnect().await;
            }
        }
    }
}

async fn send_frame(sink: &mut WsSink, frame: &Frame) -> Result<(), String> {
    let raw = frame.to_json().map_err(|e| format!("encode: {e}"))?;
    sink.send(Message::Text(raw.into()))
        .await
        .map_err(|e| e.to_string())
}
