//! The gateway client: connection state machine and public surface.

use std::sync::{Arc, Mutex as StdMutex};

use {
    futures::{
        FutureExt,
        future::{BoxFuture, Shared},
    },
    tokio::{
        sync::{Mutex as AsyncMutex, mpsc, oneshot},
        time::timeout,
    },
    tokio_tungstenite::connect_async,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use portal_protocol::{Frame, HelloOk};

use crate::{
    backoff::{ReconnectContext, reconnect_delay},
    conn::{self, ConnectionParams},
    dispatcher::{EventDispatcher, HandlerId},
    error::ClientError,
    identity::{FileKvStore, IdentityProvider, KvStore},
    options::ClientOptions,
    pending::PendingRequests,
};

/// Lifecycle of the single gateway connection.
///
/// A transport handle exists exactly while the state is not
/// `Disconnected`; transitions are serialized behind the connection lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    AwaitingChallenge,
    Authenticating,
    Connected,
    Closing,
}

/// Dispatcher topics emitted by the client itself. Server events are
/// re-emitted under their own names.
pub mod topics {
    /// `{nonce}` — the server opened the auth handshake.
    pub const CHALLENGE: &str = "challenge_received";
    /// Hello payload — the handshake completed.
    pub const CONNECTED: &str = "connected";
    /// `{intentional, reason}` — an authenticated connection ended.
    pub const DISCONNECTED: &str = "disconnected";
    /// `{attempt, delayMs}` — a reconnection attempt was scheduled.
    pub const RECONNECT_SCHEDULED: &str = "reconnect.scheduled";
    /// `{attempts}` — reconnection gave up; terminal until `connect()`.
    pub const RECONNECT_EXHAUSTED: &str = "reconnect.exhausted";
}

type ConnectFuture = Shared<BoxFuture<'static, Result<HelloOk, ClientError>>>;

/// Per-connection wiring owned by the state machine. Dropped pieces are
/// replaced wholesale on each attempt; stale timers never outlive the
/// state they protect.
#[derive(Default)]
struct LinkState {
    /// The in-flight connect attempt every concurrent caller shares.
    inflight_connect: Option<ConnectFuture>,
    sender: Option<mpsc::UnboundedSender<Frame>>,
    cancel: Option<CancellationToken>,
    /// Bumped per connection; a finished task may only tear down wiring
    /// that still carries its own epoch.
    epoch: u64,
    reconnect: ReconnectContext,
}

pub(crate) struct ClientInner {
    opts: StdMutex<ClientOptions>,
    state: StdMutex<ConnectionState>,
    last_hello: StdMutex<Option<HelloOk>>,
    pub(crate) dispatcher: EventDispatcher,
    pub(crate) pending: PendingRequests,
    pub(crate) identity: IdentityProvider,
    link: AsyncMutex<LinkState>,
}

/// Client for the gateway WebSocket protocol.
///
/// Cheap to clone; clones share one connection. Independent clients
/// coexist freely — there is no process-wide state.
#[derive(Clone)]
pub struct GatewayClient {
    inner: Arc<ClientInner>,
}

impl GatewayClient {
    /// Create a client with the default file-backed identity store.
    pub fn new(options: ClientOptions) -> Self {
        Self::with_store(options, Arc::new(FileKvStore::new()))
    }

    /// Create a client with a caller-provided identity store.
    pub fn with_store(options: ClientOptions, store: Arc<dyn KvStore>) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                opts: StdMutex::new(options),
                state: StdMutex::new(ConnectionState::Disconnected),
                last_hello: StdMutex::new(None),
                dispatcher: EventDispatcher::new(),
                pending: PendingRequests::new(),
                identity: IdentityProvider::new(store),
                link: AsyncMutex::new(LinkState::default()),
            }),
        }
    }

    /// Replace the connection options; takes effect on the next connect.
    pub fn configure(&self, options: ClientOptions) {
        *self.inner.opts.lock().unwrap() = options;
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock().unwrap()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Subscribe to a topic: a server event name, a [`topics`] constant, or
    /// the wildcard `"*"`.
    pub fn on<F>(&self, topic: &str, handler: F) -> HandlerId
    where
        F: Fn(&serde_json::Value) + Send + Sync + 'static,
    {
        self.inner.dispatcher.on(topic, handler)
    }

    pub fn off(&self, topic: &str, id: HandlerId) -> bool {
        self.inner.dispatcher.off(topic, id)
    }

    /// Connect and authenticate.
    ///
    /// Idempotent while an attempt is outstanding: concurrent callers share
    /// one attempt and receive the same outcome. Resolves immediately when
    /// already connected. Resets the reconnection counter and cancels any
    /// pending reconnect timer.
    pub async fn connect(&self) -> Result<HelloOk, ClientError> {
        {
            let mut link = self.inner.link.lock().await;
            link.reconnect.reset();
        }
        Arc::clone(&self.inner).connect_shared().await
    }

    /// Tear everything down. Idempotent and infallible from any state:
    /// cancels timers, rejects in-flight requests, closes the transport
    /// with a normal close code, and forces `Disconnected`.
    pub async fn disconnect(&self) {
        if self.state() != ConnectionState::Disconnected {
            self.inner.set_state(ConnectionState::Closing);
        }
        {
            let mut link = self.inner.link.lock().await;
            link.reconnect.cancel();
            link.inflight_connect = None;
            link.sender = None;
            if let Some(cancel) = link.cancel.take() {
                cancel.cancel();
            }
        }
        self.inner.pending.drain(ClientError::Disconnected);
        self.inner.set_state(ConnectionState::Disconnected);
    }

    /// Submit a request and await its response payload.
    ///
    /// Fails fast with [`ClientError::NotConnected`] unless the state is
    /// exactly `Connected` with a live transport.
    pub async fn request(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, ClientError> {
        if self.state() != ConnectionState::Connected {
            return Err(ClientError::NotConnected);
        }
        let sender = self.inner.link.lock().await.sender.clone();
        let Some(sender) = sender else {
            return Err(ClientError::NotConnected);
        };
        let request_timeout = self.inner.opts.lock().unwrap().request_timeout;

        let (id, rx) = self.inner.pending.register();
        let frame = Frame::Req {
            id: id.clone(),
            method: method.to_string(),
            params,
        };
        if sender.send(frame).is_err() {
            self.inner.pending.remove(&id);
            return Err(ClientError::NotConnected);
        }

        match timeout(request_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(ClientError::ConnectionClosed(
                "connection task dropped".into(),
            )),
            Err(_) => {
                // Late responses find nothing to hit once the entry is gone.
                self.inner.pending.remove(&id);
                Err(ClientError::RequestTimeout(request_timeout.as_millis() as u64))
            },
        }
    }
}

impl ClientInner {
    pub(crate) fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.lock().unwrap();
        if *state != next {
            debug!(from = ?*state, to = ?next, "connection state");
            *state = next;
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    pub(crate) fn store_hello(&self, hello: &HelloOk) {
        *self.last_hello.lock().unwrap() = Some(hello.clone());
    }

    pub(crate) async fn reset_reconnect(&self) {
        self.link.lock().await.reconnect.reset();
    }

    /// Drop the wiring of the connection identified by `epoch`, unless a
    /// newer connection owns it already. Returns whether it was current.
    /// Reconnect bookkeeping survives either way.
    pub(crate) async fn clear_link(&self, epoch: u64) -> bool {
        let mut link = self.link.lock().await;
        if link.epoch != epoch {
            return false;
        }
        link.sender = None;
        link.cancel = None;
        true
    }

    /// Clone the in-flight connect future, starting an attempt if none is
    /// outstanding. Leaves the reconnect counter alone — `connect()` resets
    /// it, the retry path increments it.
    pub(crate) async fn connect_shared(self: Arc<Self>) -> Result<HelloOk, ClientError> {
        let fut = {
            let mut link = self.link.lock().await;
            if self.state() == ConnectionState::Connected
                && let Some(hello) = self.last_hello.lock().unwrap().clone()
            {
                return Ok(hello);
            }
            match link.inflight_connect.clone() {
                Some(fut) => fut,
                None => {
                    let (tx, rx) = oneshot::channel();
                    let inner = Arc::clone(&self);
                    tokio::spawn(async move {
                        let result = Arc::clone(&inner).do_connect().await;
                        inner.link.lock().await.inflight_connect = None;
                        let _ = tx.send(result);
                    });
                    let fut: ConnectFuture = rx
                        .map(|received| {
                            received.unwrap_or_else(|_| {
                                Err(ClientError::ConnectionClosed(
                                    "connect attempt aborted".into(),
                                ))
                            })
                        })
                        .boxed()
                        .shared();
                    link.inflight_connect = Some(fut.clone());
                    fut
                },
            }
        };
        fut.await
    }

    /// One full connect attempt: open the transport, hand it to the
    /// connection task, and wait for the handshake to settle — all under
    /// the connection-establishment timeout.
    async fn do_connect(self: Arc<Self>) -> Result<HelloOk, ClientError> {
        let opts = self.opts.lock().unwrap().clone();
        let identity = self.identity.load_or_create();
        self.set_state(ConnectionState::Connecting);
        info!(url = %opts.url, "connecting to gateway");

        let connect_timeout = opts.connect_timeout;
        let attempt = async {
            let (ws, _response) = connect_async(opts.url.as_str())
                .await
                .map_err(|e| ClientError::Transport(e.to_string()))?;
            self.set_state(ConnectionState::AwaitingChallenge);

            let (ready_tx, ready_rx) = oneshot::channel();
            let (out_tx, out_rx) = mpsc::unbounded_channel();
            let cancel = CancellationToken::new();
            let epoch = {
                let mut link = self.link.lock().await;
                link.epoch += 1;
                link.sender = Some(out_tx);
                link.cancel = Some(cancel.clone());
                link.epoch
            };
            tokio::spawn(conn::run_connection(ws, ConnectionParams {
                inner: Arc::clone(&self),
                opts: opts.clone(),
                identity,
                ready: ready_tx,
                outbound: out_rx,
                cancel,
                epoch,
            }));
            ready_rx.await.unwrap_or_else(|_| {
                Err(ClientError::ConnectionClosed(
                    "connection task exited during handshake".into(),
                ))
            })
        };

        match timeout(connect_timeout, attempt).await {
            Ok(Ok(hello)) => {
                info!(
                    server = %hello.server.version,
                    protocol = hello.protocol,
                    "gateway connected"
                );
                Ok(hello)
            },
            Ok(Err(e)) => {
                self.teardown_failed_attempt().await;
                Err(e)
            },
            Err(_) => {
                warn!(
                    timeout_ms = connect_timeout.as_millis() as u64,
                    "connect timed out"
                );
                self.teardown_failed_attempt().await;
                Err(ClientError::ConnectTimeout(connect_timeout.as_millis() as u64))
            },
        }
    }

    async fn teardown_failed_attempt(&self) {
        {
            let mut link = self.link.lock().await;
            link.sender = None;
            if let Some(cancel) = link.cancel.take() {
                cancel.cancel();
            }
        }
        self.set_state(ConnectionState::Disconnected);
    }

    /// Arm a single reconnect timer, or emit the terminal exhaustion event
    /// once the attempt budget is spent. No-op while a timer is pending or
    /// when auto-reconnect is off.
    ///
    /// Boxed: the timer task re-enters this on a failed retry.
    pub(crate) fn schedule_reconnect(self: Arc<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let opts = self.opts.lock().unwrap().clone();
            if !opts.auto_reconnect {
                return;
            }

            let mut link = self.link.lock().await;
            if link.reconnect.timer_armed() {
                return;
            }
            let attempt = link.reconnect.attempt;
            if attempt >= opts.max_reconnect_attempts {
                if link.reconnect.mark_exhausted() {
                    warn!(attempts = attempt, "reconnect attempts exhausted");
                    self.dispatcher.emit(
                        topics::RECONNECT_EXHAUSTED,
                        &serde_json::json!({ "attempts": attempt }),
                    );
                }
                return;
            }

            let delay = reconnect_delay(attempt, opts.reconnect_base, opts.reconnect_cap);
            debug!(attempt, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
            self.dispatcher.emit(
                topics::RECONNECT_SCHEDULED,
                &serde_json::json!({ "attempt": attempt, "delayMs": delay.as_millis() as u64 }),
            );

            let inner = Arc::clone(&self);
            link.reconnect.arm(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                {
                    let mut link = inner.link.lock().await;
                    link.reconnect.disarm();
                    // Counted before the attempt; only a successful
                    // authentication resets it.
                    link.reconnect.attempt += 1;
                }
                if let Err(error) = Arc::clone(&inner).connect_shared().await {
                    debug!(%error, "reconnect attempt failed");
                    inner.schedule_reconnect().await;
                }
            }));
        })
    }
}
