//! Challenge-response connect handshake: request construction and hello
//! interpretation. The connection task drives the exchange itself.

use portal_protocol::{
    AuthParams, ClientInfo, ConnectParams, DeviceInfo, HelloOk, MIN_PROTOCOL_VERSION,
    PROTOCOL_VERSION,
};

use crate::{error::ClientError, identity::DeviceIdentity, options::ClientOptions};

/// Build the connect request sent in reply to a challenge.
///
/// The auth block carries the caller's explicit token when one was
/// configured, falling back to the persisted device token — never both.
pub(crate) fn build_connect_params(
    opts: &ClientOptions,
    identity: &DeviceIdentity,
) -> ConnectParams {
    let auth = match (&opts.token, &identity.device_token) {
        (Some(token), _) => AuthParams {
            token: Some(token.clone()),
            device_token: None,
        },
        (None, Some(device_token)) => AuthParams {
            token: None,
            device_token: Some(device_token.clone()),
        },
        (None, None) => AuthParams::default(),
    };

    let display_name = opts
        .display_name
        .clone()
        .or_else(|| hostname::get().ok().and_then(|h| h.into_string().ok()));

    ConnectParams {
        min_protocol: MIN_PROTOCOL_VERSION,
        max_protocol: PROTOCOL_VERSION,
        client: ClientInfo {
            id: "portal".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            platform: std::env::consts::OS.into(),
            mode: opts.mode.clone(),
        },
        device: DeviceInfo {
            id: identity.device_id.clone(),
            display_name,
        },
        role: Some(opts.role.clone()),
        scopes: Some(opts.scopes.clone()),
        auth,
        locale: opts.locale.clone(),
        user_agent: Some(
            opts.user_agent
                .clone()
                .unwrap_or_else(|| format!("portal/{}", env!("CARGO_PKG_VERSION"))),
        ),
    }
}

/// Interpret the payload of a successful connect response.
pub(crate) fn parse_hello(payload: serde_json::Value) -> Result<HelloOk, ClientError> {
    serde_json::from_value(payload)
        .map_err(|e| ClientError::Protocol(format!("malformed hello payload: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(token: Option<&str>) -> DeviceIdentity {
        DeviceIdentity {
            device_id: "dev-1".into(),
            device_token: token.map(String::from),
        }
    }

    #[test]
    fn explicit_token_wins_over_device_token() {
        let opts = ClientOptions {
            token: Some("explicit".into()),
            ..ClientOptions::default()
        };
        let params = build_connect_params(&opts, &identity(Some("persisted")));
        assert_eq!(params.auth.token.as_deref(), Some("explicit"));
        assert!(params.auth.device_token.is_none());
    }

    #[test]
    fn device_token_used_when_no_explicit_token() {
        let params = build_connect_params(&ClientOptions::default(), &identity(Some("persisted")));
        assert!(params.auth.token.is_none());
        assert_eq!(params.auth.device_token.as_deref(), Some("persisted"));
    }

    #[test]
    fn no_credentials_leaves_auth_empty() {
        let params = build_connect_params(&ClientOptions::default(), &identity(None));
        assert_eq!(params.auth, AuthParams::default());
    }

    #[test]
    fn carries_protocol_bounds_and_device_id() {
        let params = build_connect_params(&ClientOptions::default(), &identity(None));
        assert_eq!(params.min_protocol, MIN_PROTOCOL_VERSION);
        assert_eq!(params.max_protocol, PROTOCOL_VERSION);
        assert_eq!(params.device.id, "dev-1");
        assert_eq!(params.role.as_deref(), Some("operator"));
    }

    #[test]
    fn malformed_hello_is_a_protocol_error() {
        let err = parse_hello(serde_json::json!("not an object")).unwrap_err();
        assert!(matches!(err, ClientError::Protocol(_)));
    }
}
