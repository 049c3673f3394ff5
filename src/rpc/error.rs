//! JSON-RPC error taxonomy.
//!
//! Standard JSON-RPC 2.0 codes plus the reserved server-error band used by
//! the session lifecycle.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Every error kind the engine can put on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Malformed JSON.
    ParseError,
    /// Structurally invalid JSON-RPC envelope.
    InvalidRequest,
    /// No handler registered for the method.
    MethodNotFound,
    /// Handler rejected its arguments.
    InvalidParams,
    /// Unexpected handler failure.
    InternalError,
    /// Method requires a session that does not exist.
    SessionNotInitialized,
    /// `initialize` called while a session is already live.
    SessionAlreadyInitialized,
    /// Reserved; protocol version mismatches are advisory only.
    InvalidProtocolVersion,
    /// Pending-request deadline exceeded.
    Timeout,
    /// Operation cancelled via its token.
    Cancelled,
}

impl ErrorCode {
    /// All known kinds, in taxonomy order.
    pub const ALL: [Self; 10] = [
        Self::ParseError,
        Self::InvalidRequest,
        Self::MethodNotFound,
        Self::InvalidParams,
        Self::InternalError,
        Self::SessionNotInitialized,
        Self::SessionAlreadyInitialized,
        Self::InvalidProtocolVersion,
        Self::Timeout,
        Self::Cancelled,
    ];

    /// Numeric wire code.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::SessionNotInitialized => -32000,
            Self::SessionAlreadyInitialized => -32001,
            Self::InvalidProtocolVersion => -32002,
            Self::Timeout => -32007,
            Self::Cancelled => -32008,
        }
    }

    /// Message used when the caller does not supply one.
    #[must_use]
    pub const fn canonical_message(self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid Request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
            Self::SessionNotInitialized => "Session not initialized",
            Self::SessionAlreadyInitialized => "Session already initialized",
            Self::InvalidProtocolVersion => "Invalid protocol version",
            Self::Timeout => "Request timed out",
            Self::Cancelled => "Request cancelled",
        }
    }

    /// Reverse lookup from a wire code.
    #[must_use]
    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.code() == code)
    }
}

/// JSON-RPC error object: `{code, message, data?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Numeric error code.
    pub code: i32,
    /// Human-readable description.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Build an error of `kind`, defaulting the message to the canonical text.
    #[must_use]
    pub fn new(kind: ErrorCode, message: Option<String>) -> Self {
        Self {
            code: kind.code(),
            message: message.unwrap_or_else(|| kind.canonical_message().to_owned()),
            data: None,
        }
    }

    /// Attach structured `data`.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// The taxonomy kind for this error's code, if it is a known one.
    #[must_use]
    pub fn kind(&self) -> Option<ErrorCode> {
        ErrorCode::from_code(self.code)
    }

    /// Shorthand for a [`ErrorCode::ParseError`] with a detail message.
    #[must_use]
    pub fn parse_error(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::ParseError, Some(detail.into()))
    }

    /// Shorthand for a [`ErrorCode::InvalidRequest`] with a detail message.
    #[must_use]
    pub fn invalid_request(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, Some(detail.into()))
    }
}
