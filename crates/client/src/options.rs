use std::time::Duration;

use portal_protocol as protocol;

/// Tunable connection options.
///
/// Defaults come from the protocol constants; tests shrink the timing
/// fields to keep the suite fast. Applied via [`GatewayClient::configure`]
/// (or at construction) and snapshotted at the start of each connect
/// attempt.
///
/// [`GatewayClient::configure`]: crate::GatewayClient::configure
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Gateway WebSocket URL.
    pub url: String,
    /// Explicit auth token. Takes precedence over a persisted device token.
    pub token: Option<String>,
    /// Role requested at connect time.
    pub role: String,
    /// Capability scopes requested at connect time.
    pub scopes: Vec<String>,
    /// Client mode reported in the connect request.
    pub mode: String,
    /// Device display name; defaults to the hostname.
    pub display_name: Option<String>,
    pub locale: Option<String>,
    pub user_agent: Option<String>,
    /// Reconnect automatically after an unexpected disconnect.
    pub auto_reconnect: bool,
    pub max_reconnect_attempts: u32,
    pub reconnect_base: Duration,
    pub reconnect_cap: Duration,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:18789/ws".into(),
            token: None,
            role: "operator".into(),
            scopes: vec![protocol::scopes::READ.into(), protocol::scopes::WRITE.into()],
            mode: "portal".into(),
            display_name: None,
            locale: None,
            user_agent: None,
            auto_reconnect: true,
            max_reconnect_attempts: protocol::DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_base: Duration::from_millis(protocol::RECONNECT_BASE_MS),
            reconnect_cap: Duration::from_millis(protocol::RECONNECT_CAP_MS),
            connect_timeout: Duration::from_millis(protocol::CONNECT_TIMEOUT_MS),
            request_timeout: Duration::from_millis(protocol::REQUEST_TIMEOUT_MS),
            heartbeat_interval: Duration::from_millis(protocol::HEARTBEAT_INTERVAL_MS),
            heartbeat_timeout: Duration::from_millis(protocol::HEARTBEAT_TIMEOUT_MS),
        }
    }
}
