use portal_protocol::ErrorShape;

/// Errors surfaced by the client.
///
/// Cloneable so a single connect failure can fan out to every caller
/// sharing the in-flight attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// `request` was called while the client is not `Connected`.
    #[error("not connected")]
    NotConnected,
    /// Transport open plus handshake did not finish within the window.
    #[error("connect timed out after {0}ms")]
    ConnectTimeout(u64),
    /// The gateway rejected the connect request.
    #[error("authentication rejected: {0}")]
    AuthRejected(String),
    /// A request got no response within its deadline.
    #[error("request timed out after {0}ms")]
    RequestTimeout(u64),
    /// The caller tore the connection down.
    #[error("client disconnect")]
    Disconnected,
    /// The connection ended while work was outstanding.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),
    /// The gateway answered a request with an error.
    #[error("gateway error: {0}")]
    Gateway(ErrorShape),
    /// The transport could not be opened or failed mid-flight.
    #[error("transport error: {0}")]
    Transport(String),
    /// Automatic reconnection gave up; an explicit `connect` is required.
    #[error("reconnect attempts exhausted after {0}")]
    ReconnectsExhausted(u32),
    /// The peer violated the wire protocol.
    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl From<ErrorShape> for ClientError {
    fn from(shape: ErrorShape) -> Self {
        Self::Gateway(shape)
    }
}
