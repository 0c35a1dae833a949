//! Connect-request and hello payload shapes.
//!
//! Field names are camelCase on the wire to match what the gateway and its
//! other clients speak.

use serde::{Deserialize, Serialize};

/// Params of the `connect` request a client sends in reply to a challenge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectParams {
    pub min_protocol: u16,
    pub max_protocol: u16,
    pub client: ClientInfo,
    pub device: DeviceInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
    pub auth: AuthParams,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

/// Identity of the connecting program.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientInfo {
    pub id: String,
    pub version: String,
    pub platform: String,
    pub mode: String,
}

/// Identity of the device the client runs on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceInfo {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Credentials presented during the handshake.
///
/// Carries an explicit token or a persisted device token, never both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_token: Option<String>,
}

/// Payload of a successful `connect` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HelloOk {
    pub protocol: u16,
    pub server: ServerInfo,
    pub features: Vec<String>,
    /// Issued on first successful auth; persisted by the client for
    /// token-less reconnection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerInfo {
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_params_use_camel_case_wire_names() {
        let params = ConnectParams {
            min_protocol: 1,
            max_protocol: 3,
            device: DeviceInfo {
                id: "dev-1".into(),
                display_name: Some("bench".into()),
            },
            auth: AuthParams {
                device_token: Some("tok".into()),
                ..AuthParams::default()
            },
            user_agent: Some("portal/0.4".into()),
            ..ConnectParams::default()
        };
        let value = serde_json::to_value(&params).unwrap();
        assert_eq!(value["minProtocol"], 1);
        assert_eq!(value["maxProtocol"], 3);
        assert_eq!(value["device"]["displayName"], "bench");
        assert_eq!(value["auth"]["deviceToken"], "tok");
        assert_eq!(value["userAgent"], "portal/0.4");
        assert!(value["auth"].get("token").is_none());
    }

    #[test]
    fn hello_parses_with_optional_fields_absent() {
        let hello: HelloOk = serde_json::from_value(serde_json::json!({
            "protocol": 3,
            "server": { "version": "1.2.3" },
        }))
        .unwrap();
        assert_eq!(hello.protocol, 3);
        assert_eq!(hello.server.version, "1.2.3");
        assert!(hello.server.hostname.is_none());
        assert!(hello.features.is_empty());
        assert!(hello.device_token.is_none());
    }
}
