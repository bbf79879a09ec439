//! JSON-RPC 2.0 envelope types and batch/notification rules.
//!
//! Nothing in this module performs I/O. Transports hand raw bytes to
//! [`parse_message`] and the resulting [`Message`] to a [`Dispatcher`], then
//! frame whatever [`Outgoing`] value comes back.
//!
//! # Rules
//!
//! - A top-level array is a batch. Elements are dispatched concurrently and
//!   the reply contains only the non-notification responses. If that array
//!   would be empty nothing is emitted at all.
//! - A request whose `id` is absent or `null` is a notification and never
//!   produces a response.
//! - Malformed JSON produces exactly one parse error with `id: null`.

mod dispatch;

pub use dispatch::{handler_fn, Dispatcher, EnvelopeGuard, HandlerFn, RequestHandler};

use crate::config::ProtocolConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved error codes, stable across both transports.
pub mod codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INTERNAL_ERROR: i32 = -32603;
    pub const UNAUTHORIZED: i32 = -32001;
}

/// JSON-RPC 2.0 request or notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// `None` for both an absent and an explicit `null` id.
    #[serde(default)]
    pub id: Option<Value>,
}

impl Request {
    pub fn new(method: impl Into<String>, params: Option<Value>, id: Option<Value>) -> Self {
        Self {
            jsonrpc: ProtocolConfig::JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// JSON-RPC 2.0 response. Exactly one of `result` / `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    /// `Some(Value::Null)` for an explicit `"result": null`.
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    #[serde(default)]
    pub id: Value,
}

impl Response {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: ProtocolConfig::JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: ProtocolConfig::JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }

    pub fn error_code(&self) -> Option<i32> {
        self.error.as_ref().map(|e| e.code)
    }

    /// True when exactly one of `result` and `error` is set.
    pub fn is_well_formed(&self) -> bool {
        self.result.is_some() != self.error.is_some()
    }
}

fn present_value<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
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

    pub fn parse_error(detail: impl std::fmt::Display) -> Self {
        Self::new(codes::PARSE_ERROR, "Parse error").with_data(Value::String(detail.to_string()))
    }

    pub fn too_large() -> Self {
        Self::new(codes::PARSE_ERROR, "Request body too large")
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(codes::INVALID_REQUEST, message)
    }

    pub fn not_found() -> Self {
        Self::new(codes::INVALID_REQUEST, "Not found")
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(codes::INTERNAL_ERROR, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(codes::UNAUTHORIZED, message)
    }
}

/// One inbound top-level JSON value, not yet validated as envelopes.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Single(Value),
    Batch(Vec<Value>),
}

/// What a transport writes back: one response or a non-empty batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outgoing {
    Single(Response),
    Batch(Vec<Response>),
}

impl Outgoing {
    pub fn to_vec(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Responses carried by this value, in emission order.
    pub fn responses(&self) -> &[Response] {
        match self {
            Outgoing::Single(response) => std::slice::from_ref(response),
            Outgoing::Batch(responses) => responses,
        }
    }
}

/// Parse raw bytes into a single value or a batch.
///
/// Any JSON syntax error is a parse error; the caller answers it with
/// `id: null` even if the input was meant to be a batch.
pub fn parse_message(bytes: &[u8]) -> std::result::Result<Message, RpcError> {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Array(items)) => Ok(Message::Batch(items)),
        Ok(value) => Ok(Message::Single(value)),
        Err(e) => Err(RpcError::parse_error(e)),
    }
}

/// Validate one value as a request envelope.
///
/// On failure returns the invalid-request response to send instead, using
/// the value's `id` when it is a legal id and `null` otherwise.
pub fn validate_envelope(value: Value) -> std::result::Result<Request, Response> {
    let Value::Object(ref object) = value else {
        return Err(Response::error(
            Value::Null,
            RpcError::invalid_request("Invalid Request: expected an object"),
        ));
    };

    let id = match object.get("id") {
        None | Some(Value::Null) => Value::Null,
        Some(id @ (Value::String(_) | Value::Number(_))) => id.clone(),
        Some(_) => {
            return Err(Response::error(
                Value::Null,
                RpcError::invalid_request("Invalid Request: id must be a string, number or null"),
            ))
        }
    };

    if object.get("jsonrpc").and_then(Value::as_str) != Some(ProtocolConfig::JSONRPC_VERSION) {
        return Err(Response::error(
            id,
            RpcError::invalid_request("Invalid Request: expected jsonrpc 2.0"),
        ));
    }

    if !matches!(object.get("method"), Some(Value::String(_))) {
        return Err(Response::error(
            id,
            RpcError::invalid_request("Invalid Request: method must be a string"),
        ));
    }

    serde_json::from_value(value)
        .map_err(|e| Response::error(id, RpcError::invalid_request(format!("Invalid Request: {}", e))))
}
