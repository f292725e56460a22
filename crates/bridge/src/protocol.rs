//! Bridge wire protocol: JSON-RPC 2.0 over WebSocket text frames.
//!
//! Each text frame carries one JSON message. Frames are defensively split
//! on newlines so simple clients that batch newline-delimited messages
//! into one frame still parse.
//!
//! Message kinds:
//! - request      `{jsonrpc, id, method, params?}` — expects one response
//! - response     `{jsonrpc, id, result}` or `{jsonrpc, id, error}`
//! - notification `{jsonrpc, method, params?}` — never answered

use serde::{Deserialize, Serialize};

// ── Constants ────────────────────────────────────────────────────────────────

pub const JSONRPC_VERSION: &str = "2.0";
pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_FRAME_BYTES: usize = 524_288; // 512 KiB
pub const HANDSHAKE_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
pub const PING_INTERVAL_MS: u64 = 30_000;

/// Method names on the wire.
pub mod methods {
    /// Client → server handshake request; must be the first frame.
    pub const CONNECT: &str = "connect";
    /// Server → client: deliver a text or media message.
    pub const SEND: &str = "send";
    /// Server → client: report connection/account health.
    pub const GET_STATUS: &str = "getStatus";
    /// Server → client keep-alive request.
    pub const PING: &str = "ping";
    /// Server → client notification: toggle a typing indicator.
    pub const TYPING: &str = "typing";
    /// Client → server notification: an inbound platform message.
    pub const MESSAGE: &str = "message";
    /// Client → server notification: connection state changed.
    pub const STATUS: &str = "status";
}

// ── Error codes ──────────────────────────────────────────────────────────────

pub mod error_codes {
    // JSON-RPC 2.0 reserved range.
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    // Domain codes.
    pub const NOT_CONNECTED: i64 = -32001;
    pub const SEND_FAILED: i64 = -32002;
    pub const UNAUTHORIZED: i64 = -32003;
}

// ── Frames ───────────────────────────────────────────────────────────────────

/// Correlation id; clients may use strings or numbers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Text(String),
    Number(i64),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(text) => write!(f, "{text}"),
            Self::Number(num) => write!(f, "{num}"),
        }
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("rpc error {code}: {message}")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    #[must_use]
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Request or notification (a request without an `id`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrame {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl RequestFrame {
    #[must_use]
    pub fn request(
        id: impl Into<RequestId>,
        method: impl Into<String>,
        params: Option<serde_json::Value>,
    ) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: Some(id.into()),
            method: method.into(),
            params,
        }
    }

    #[must_use]
    pub fn notification(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: None,
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl ResponseFrame {
    #[must_use]
    pub fn ok(id: RequestId, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    #[must_use]
    pub fn err(id: RequestId, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// One classified inbound message.
#[derive(Debug, Clone)]
pub enum BridgeFrame {
    Request {
        id: RequestId,
        method: String,
        params: Option<serde_json::Value>,
    },
    Notification {
        method: String,
        params: Option<serde_json::Value>,
    },
    Response(ResponseFrame),
}

/// Classify one JSON message.
///
/// `method` + `id` → request; `method` alone → notification; `id` with
/// `result` or `error` → response. Anything else is malformed.
#[must_use]
pub fn classify(value: serde_json::Value) -> Option<BridgeFrame> {
    let obj = value.as_object()?;
    if obj.contains_key("method") {
        let frame: RequestFrame = serde_json::from_value(value).ok()?;
        return Some(match frame.id {
            Some(id) => BridgeFrame::Request {
                id,
                method: frame.method,
                params: frame.params,
            },
            None => BridgeFrame::Notification {
                method: frame.method,
                params: frame.params,
            },
        });
    }
    if obj.contains_key("result") || obj.contains_key("error") {
        let frame: ResponseFrame = serde_json::from_value(value).ok()?;
        // Exactly one of result/error.
        if frame.result.is_some() == frame.error.is_some() {
            return None;
        }
        return Some(BridgeFrame::Response(frame));
    }
    None
}

/// Parse a WebSocket text frame into its messages.
///
/// Splits on newlines first; each non-empty line is parsed and classified
/// independently. Unparseable lines are skipped (the caller logs).
#[must_use]
pub fn parse_frames(text: &str) -> Vec<BridgeFrame> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| serde_json::from_str(line).ok())
        .filter_map(classify)
        .collect()
}

// ── Handshake ────────────────────────────────────────────────────────────────

/// Params of the `connect` request a client must send first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    pub account_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Free-form client identification ("wa-bridge/1.4 on macOS").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
}

/// Result of a successful `connect`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectResult {
    pub protocol: u32,
    pub server: String,
    pub keep_alive_ms: u64,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    #[test]
    fn request_frame_serializes_with_jsonrpc_tag() {
        let frame = RequestFrame::request("r1", methods::SEND, Some(json!({"to": "c1"})));
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["id"], "r1");
        assert_eq!(value["method"], "send");
        assert_eq!(value["params"]["to"], "c1");
    }

    #[test]
    fn notification_omits_id() {
        let frame = RequestFrame::notification(methods::TYPING, None);
        let value = serde_json::to_value(&frame).unwrap();
        assert!(value.get("id").is_none());
        assert!(value.get("params").is_none());
    }

    #[test]
    fn classify_request_notification_response() {
        let req = classify(json!({"jsonrpc": "2.0", "id": 7, "method": "ping"})).unwrap();
        assert!(matches!(req, BridgeFrame::Request { id: RequestId::Number(7), .. }));

        let notif = classify(json!({"jsonrpc": "2.0", "method": "status", "params": {}})).unwrap();
        assert!(matches!(notif, BridgeFrame::Notification { .. }));

        let resp = classify(json!({"jsonrpc": "2.0", "id": "r1", "result": {"ok": true}})).unwrap();
        assert!(matches!(resp, BridgeFrame::Response(_)));
    }

    #[test]
    fn classify_rejects_malformed() {
        assert!(classify(json!({"jsonrpc": "2.0"})).is_none());
        assert!(classify(json!("hello")).is_none());
        assert!(classify(json!({"id": "r1"})).is_none());
        // result and error together violate the exactly-one rule
        assert!(
            classify(json!({
                "jsonrpc": "2.0",
                "id": "r1",
                "result": {},
                "error": {"code": -1, "message": "x"},
            }))
            .is_none()
        );
    }

    #[test]
    fn error_response_round_trips() {
        let frame = ResponseFrame::err(
            "r9".into(),
            RpcError::new(error_codes::SEND_FAILED, "no such chat"),
        );
        let text = serde_json::to_string(&frame).unwrap();
        let parsed = parse_frames(&text);
        assert_eq!(parsed.len(), 1);
        let BridgeFrame::Response(resp) = &parsed[0] else {
            panic!("expected response");
        };
        assert_eq!(resp.error.as_ref().unwrap().code, error_codes::SEND_FAILED);
        assert!(resp.result.is_none());
    }

    #[test]
    fn newline_batched_frames_all_parse() {
        let text = concat!(
            r#"{"jsonrpc":"2.0","method":"status","params":{"state":"connected"}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"message","params":{"chatId":"c1"}}"#,
            "\n\n",
            "not json at all",
            "\n",
            r#"{"jsonrpc":"2.0","id":"r1","result":{}}"#,
        );
        let frames = parse_frames(text);
        assert_eq!(frames.len(), 3);
    }

    #[test]
    fn request_id_accepts_strings_and_numbers() {
        let s: RequestId = serde_json::from_value(json!("abc")).unwrap();
        let n: RequestId = serde_json::from_value(json!(12)).unwrap();
        assert_eq!(s.to_string(), "abc");
        assert_eq!(n.to_string(), "12");
    }

    #[test]
    fn connect_params_use_camel_case() {
        let params: ConnectParams =
            serde_json::from_value(json!({"accountId": "main", "token": "t"})).unwrap();
        assert_eq!(params.account_id, "main");
        assert_eq!(params.token.as_deref(), Some("t"));
        assert!(params.client.is_none());
    }
}
