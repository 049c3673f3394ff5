//! JSON-RPC 2.0 message model.
//!
//! Inbound text is classified by [`parse`] into a [`Message`]; outbound
//! messages are serialized with `serde_json`. Optional fields are omitted
//! rather than emitted as `null`, with the single exception of a
//! [`Response`] whose `id` could not be determined.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use super::error::{ErrorCode, RpcError};

/// Protocol version string carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Method-name prefix reserved by JSON-RPC for system extensions.
pub const RESERVED_METHOD_PREFIX: &str = "rpc.";

/// Marker that always serializes as `"2.0"`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Version;

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(JSONRPC_VERSION)
    }
}

/// Request correlation identifier: a string or an integer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Integer identifier.
    Number(i64),
    /// String identifier.
    String(String),
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

/// A request, or a notification when `id` is absent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    /// Always `"2.0"`.
    pub jsonrpc: Version,
    /// Method name.
    pub method: String,
    /// Raw parameters; each handler performs its own typed extraction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Correlation ID; `None` marks a notification.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
}

impl Request {
    /// Build a request that expects a response.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>, id: impl Into<RequestId>) -> Self {
        Self {
            jsonrpc: Version,
            method: method.into(),
            params,
            id: Some(id.into()),
        }
    }

    /// Build a notification (no `id`, never answered).
    #[must_use]
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: Version,
            method: method.into(),
            params,
            id: None,
        }
    }

    /// Whether this message must never receive a response.
    #[must_use]
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// A response carrying exactly one of `result` or `error`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    /// Always `"2.0"`.
    pub jsonrpc: Version,
    /// ID of the answered request; `None` serializes as `null`.
    pub id: Option<RequestId>,
    /// Success payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    /// Success response for `id`.
    #[must_use]
    pub fn success(id: Option<RequestId>, result: Value) -> Self {
        Self {
            jsonrpc: Version,
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Error response for `id`; `message` defaults to the code's canonical text.
    #[must_use]
    pub fn error(
        id: Option<RequestId>,
        code: ErrorCode,
        message: Option<String>,
        data: Option<Value>,
    ) -> Self {
        let mut error = RpcError::new(code, message);
        error.data = data;
        Self::from_error(id, error)
    }

    /// Error response wrapping an already-built [`RpcError`].
    #[must_use]
    pub fn from_error(id: Option<RequestId>, error: RpcError) -> Self {
        Self {
            jsonrpc: Version,
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Whether this response carries an error.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Any classified inbound or outbound message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Message {
    /// Request or notification.
    Request(Request),
    /// Response to an earlier request.
    Response(Response),
}

impl Message {
    /// Serialize to compact JSON text.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Internal` if a contained value cannot be serialized.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl From<Request> for Message {
    fn from(value: Request) -> Self {
        Self::Request(value)
    }
}

impl From<Response> for Message {
    fn from(value: Response) -> Self {
        Self::Response(value)
    }
}

/// Classify raw JSON text into a [`Message`].
///
/// # Errors
///
/// - [`ErrorCode::ParseError`] when `text` is not valid JSON.
/// - [`ErrorCode::InvalidRequest`] when the envelope is not a JSON-RPC 2.0
///   request or response (wrong version, both `result` and `error`, empty
///   or reserved method name, malformed `id`, or neither shape).
pub fn parse(text: &str) -> std::result::Result<Message, RpcError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| RpcError::parse_error(format!("Parse error: {e}")))?;

    let Value::Object(obj) = value else {
        return Err(RpcError::invalid_request("message must be a JSON object"));
    };

    match obj.get("jsonrpc") {
        Some(Value::String(v)) if v == JSONRPC_VERSION => {}
        Some(_) => {
            return Err(RpcError::invalid_request(
                "unsupported jsonrpc version, expected \"2.0\"",
            ))
        }
        None => return Err(RpcError::invalid_request("missing jsonrpc version")),
    }

    let has_result = obj.contains_key("result");
    let has_error = obj.contains_key("error");

    if (has_result || has_error) && obj.contains_key("id") {
        return parse_response(obj, has_result, has_error).map(Message::Response);
    }

    if obj.contains_key("method") {
        return parse_request(obj).map(Message::Request);
    }

    Err(RpcError::invalid_request(
        "message is neither a request nor a response",
    ))
}

// ── Private helpers ───────────────────────────────────────────────────────────

fn parse_response(
    mut obj: Map<String, Value>,
    has_result: bool,
    has_error: bool,
) -> std::result::Result<Response, RpcError> {
    if has_result && has_error {
        return Err(RpcError::invalid_request(
            "response must not carry both result and error",
        ));
    }

    let id = match obj.remove("id") {
        Some(Value::Null) | None => None,
        Some(raw) => Some(parse_id(raw)?),
    };

    if has_result {
        return Ok(Response::success(id, obj.remove("result").unwrap_or(Value::Null)));
    }

    let raw_error = obj.remove("error").unwrap_or(Value::Null);
    let error: RpcError = serde_json::from_value(raw_error)
        .map_err(|e| RpcError::invalid_request(format!("malformed error object: {e}")))?;
    Ok(Response::from_error(id, error))
}

fn parse_request(mut obj: Map<String, Value>) -> std::result::Result<Request, RpcError> {
    let method = match obj.remove("method") {
        Some(Value::String(m)) => m,
        _ => return Err(RpcError::invalid_request("method must be a string")),
    };

    if method.is_empty() {
        return Err(RpcError::invalid_request("method name must not be empty"));
    }
    if method.starts_with(RESERVED_METHOD_PREFIX) {
        return Err(RpcError::invalid_request(format!(
            "method name {method:?} uses the reserved \"rpc.\" prefix"
        )));
    }

    let id = match obj.remove("id") {
        None => None,
        Some(raw) => Some(parse_id(raw)?),
    };

    Ok(Request {
        jsonrpc: Version,
        method,
        params: obj.remove("params"),
        id,
    })
}

fn parse_id(raw: Value) -> std::result::Result<RequestId, RpcError> {
    match raw {
        Value::String(s) => Ok(RequestId::String(s)),
        Value::Number(n) => n
            .as_i64()
            .map(RequestId::Number)
            .ok_or_else(|| RpcError::invalid_request(format!("id {n} is not an integer"))),
        other => Err(RpcError::invalid_request(format!(
            "id must be a string or integer, got {other}"
        ))),
    }
}
