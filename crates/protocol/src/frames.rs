use serde::{Deserialize, Serialize};

// ── Error codes ──────────────────────────────────────────────────────────────

/// Machine-readable codes carried by failed responses and client errors.
pub mod error_codes {
    pub const AUTH_FAILED: &str = "AUTH_FAILED";
    pub const DISCONNECTED: &str = "DISCONNECTED";
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
    pub const METHOD_NOT_FOUND: &str = "METHOD_NOT_FOUND";
    pub const NOT_CONNECTED: &str = "NOT_CONNECTED";
    pub const REQUEST_TIMEOUT: &str = "REQUEST_TIMEOUT";
    pub const UNAVAILABLE: &str = "UNAVAILABLE";
}

/// Error payload of a failed `res` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ErrorShape {
    pub code: String,
    pub message: String,
}

impl ErrorShape {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

// ── Frames ───────────────────────────────────────────────────────────────────

/// A single wire frame, tagged by `type`.
///
/// `req` travels client→server; `res`, `event`, and `pong` server→client;
/// `ping` client→server. Events arrive unsolicited.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    Req {
        id: String,
        method: String,
        #[serde(default)]
        params: serde_json::Value,
    },
    Res {
        id: String,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorShape>,
    },
    Event {
        event: String,
        #[serde(default)]
        payload: serde_json::Value,
    },
    Ping,
    Pong,
}

impl Frame {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_challenge_event() {
        let frame =
            Frame::parse(r#"{"type":"event","event":"connect.challenge","payload":{"nonce":"abc123"}}"#)
                .unwrap();
        match frame {
            Frame::Event { event, payload } => {
                assert_eq!(event, "connect.challenge");
                assert_eq!(payload["nonce"], "abc123");
            },
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn parses_error_response() {
        let frame = Frame::parse(
            r#"{"type":"res","id":"7-1","ok":false,"error":{"code":"AUTH_FAILED","message":"bad token"}}"#,
        )
        .unwrap();
        match frame {
            Frame::Res { id, ok, payload, error } => {
                assert_eq!(id, "7-1");
                assert!(!ok);
                assert!(payload.is_none());
                let error = error.unwrap();
                assert_eq!(error.code, error_codes::AUTH_FAILED);
                assert_eq!(error.message, "bad token");
            },
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn serializes_ping_with_type_tag_only() {
        assert_eq!(Frame::Ping.to_json().unwrap(), r#"{"type":"ping"}"#);
    }

    #[test]
    fn request_omits_nothing() {
        let raw = Frame::Req {
            id: "1-1".into(),
            method: "sessions.list".into(),
            params: serde_json::json!({}),
        }
        .to_json()
        .unwrap();
        assert_eq!(raw, r#"{"type":"req","id":"1-1","method":"sessions.list","params":{}}"#);
    }
}
