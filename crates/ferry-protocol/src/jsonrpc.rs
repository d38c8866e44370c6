// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! JSON-RPC 2.0 message model.
//!
//! One message per line, `\n`-terminated, UTF-8.  A frame is classified by
//! shape rather than by a tagged field:
//!
//! - `method` + `id`  → request (expects exactly one response)
//! - `method` only    → notification
//! - `id` only        → response to an earlier outbound request
//!
//! [`Incoming::classify`] performs that split; the endpoint owns correlation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error codes used on the wire.
///
/// The `-327xx` range is standard JSON-RPC; the `-3200x` range carries the
/// bridge's own conditions.
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    pub const AUTH_REQUIRED: i64 = -32000;
    pub const SESSION_NOT_FOUND: i64 = -32001;
    pub const SESSION_BUSY: i64 = -32002;
    pub const RESOURCE_EXHAUSTED: i64 = -32003;
}

/// A request id.  JSON-RPC allows strings and numbers; both are preserved
/// verbatim so the response echoes exactly what the host sent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

/// Error member of a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// A decoded inbound frame, split by shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Request {
        id: RequestId,
        method: String,
        params: Value,
    },
    Notification {
        method: String,
        params: Value,
    },
    Response {
        id: RequestId,
        result: Result<Value, ErrorObject>,
    },
    /// Neither request, notification, nor response shape.
    Invalid,
}

impl Incoming {
    /// Classify a decoded JSON value per the rules above.
    ///
    /// Missing `params` becomes `Value::Null` so handlers validate a uniform
    /// shape.  A response with both `result` and `error` is treated as an
    /// error response (the error member wins, matching common host behaviour).
    pub fn classify(value: Value) -> Self {
        let obj = match value {
            Value::Object(map) => map,
            _ => return Self::Invalid,
        };

        let id = obj
            .get("id")
            .cloned()
            .and_then(|v| serde_json::from_value::<RequestId>(v).ok());
        let method = obj.get("method").and_then(Value::as_str).map(str::to_string);
        let params = obj.get("params").cloned().unwrap_or(Value::Null);

        match (method, id) {
            (Some(method), Some(id)) => Self::Request { id, method, params },
            (Some(method), None) => Self::Notification { method, params },
            (None, Some(id)) => {
                if let Some(err) = obj.get("error") {
                    match serde_json::from_value::<ErrorObject>(err.clone()) {
                        Ok(e) => Self::Response { id, result: Err(e) },
                        Err(_) => Self::Invalid,
                    }
                } else if let Some(result) = obj.get("result") {
                    Self::Response {
                        id,
                        result: Ok(result.clone()),
                    }
                } else {
                    Self::Invalid
                }
            }
            (None, None) => Self::Invalid,
        }
    }
}

/// Serialize an outbound request frame.
pub fn request_frame(id: &RequestId, method: &str, params: Value) -> Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    })
}

/// Serialize an outbound notification frame.
pub fn notification_frame(method: &str, params: Value) -> Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
    })
}

/// Serialize a success response frame.
pub fn result_frame(id: &RequestId, result: Value) -> Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result,
    })
}

/// Serialize an error response frame.  `id` is `None` when the offending
/// request could not be parsed far enough to recover one.
pub fn error_frame(id: Option<&RequestId>, error: &ErrorObject) -> Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": error,
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
