//! Config schema types. Every section and field is optional in the file;
//! defaults match the wire-protocol constants.

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    pub gateway: GatewayConfig,
    pub device: DeviceConfig,
    pub reconnect: ReconnectConfig,
    pub heartbeat: HeartbeatConfig,
}

/// Where and how to reach the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub url: String,
    /// Explicit auth token. `${PORTAL_TOKEN}` style values are substituted
    /// from the environment at load time.
    pub token: Option<String>,
    pub role: String,
    pub scopes: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:18789/ws".into(),
            token: None,
            role: "operator".into(),
            scopes: vec!["operator.read".into(), "operator.write".into()],
        }
    }
}

/// Presentation of this device to the gateway.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Defaults to the hostname when unset.
    pub display_name: Option<String>,
}

/// Automatic reconnection policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub enabled: bool,
    pub max_attempts: u32,
    pub base_ms: u64,
    pub cap_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 10,
            base_ms: 1_000,
            cap_ms: 30_000,
        }
    }
}

/// Liveness probing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub interval_ms: u64,
    pub timeout_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: 25_000,
            timeout_ms: 60_000,
        }
    }
}
