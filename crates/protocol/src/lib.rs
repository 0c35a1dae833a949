//! Wire protocol shared by the gateway and its clients.
//!
//! Frames are JSON objects tagged by `type` (see [`Frame`]). The server
//! opens authentication by emitting a [`CHALLENGE_EVENT`]; the client
//! answers with a [`CONNECT_METHOD`] request carrying [`ConnectParams`]
//! and receives a [`HelloOk`] payload on success.

pub mod connect;
pub mod frames;

pub use connect::{AuthParams, ClientInfo, ConnectParams, DeviceInfo, HelloOk, ServerInfo};
pub use frames::{ErrorShape, Frame, error_codes};

/// Highest protocol revision this crate speaks.
pub const PROTOCOL_VERSION: u16 = 3;
/// Oldest revision still accepted during the handshake.
pub const MIN_PROTOCOL_VERSION: u16 = 1;

/// Event name of the server-issued auth challenge.
pub const CHALLENGE_EVENT: &str = "connect.challenge";
/// Method name of the authentication request sent in reply.
pub const CONNECT_METHOD: &str = "connect";

/// Window for transport open plus handshake before a connect attempt fails.
pub const CONNECT_TIMEOUT_MS: u64 = 10_000;
/// Per-request deadline in the correlator.
pub const REQUEST_TIMEOUT_MS: u64 = 30_000;
/// Cadence of client liveness probes while connected.
pub const HEARTBEAT_INTERVAL_MS: u64 = 25_000;
/// Silence after which the connection is declared dead.
pub const HEARTBEAT_TIMEOUT_MS: u64 = 60_000;
/// First reconnection delay; doubles per attempt.
pub const RECONNECT_BASE_MS: u64 = 1_000;
/// Upper bound on the reconnection delay.
pub const RECONNECT_CAP_MS: u64 = 30_000;
/// Automatic reconnection gives up after this many attempts.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Close code sent when the liveness window elapses without a pong.
pub const HEARTBEAT_CLOSE_CODE: u16 = 4008;

/// Capability scopes a client may request at connect time.
pub mod scopes {
    pub const ADMIN: &str = "operator.admin";
    pub const READ: &str = "operator.read";
    pub const WRITE: &str = "operator.write";
}
