//! Error types shared across the engine.

use std::fmt::{Display, Formatter};

use crate::rpc::RpcError;

/// Shared engine result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Engine error enumeration covering all failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or stream I/O failure.
    Io(String),
    /// Unrecoverable transport fault (oversized frame, broken stream).
    Transport(String),
    /// One inbound frame was malformed; the stream itself is still usable.
    Framing(String),
    /// The peer closed the stream, possibly in the middle of a frame.
    EndOfStream(String),
    /// The transport was closed locally.
    Closed,
    /// The operation observed its cancellation token.
    Cancelled,
    /// The operation exceeded its deadline.
    Timeout(String),
    /// A handler rejected its arguments.
    InvalidParams(String),
    /// A handler failed with an explicit JSON-RPC error.
    Protocol(RpcError),
    /// Illegal session state transition or lifecycle violation.
    Session(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// Entity with the same identifier already exists.
    AlreadyExists(String),
    /// Unexpected internal failure.
    Internal(String),
}

impl AppError {
    /// The underlying message text, without the category prefix.
    ///
    /// Used as the `message` of JSON-RPC error responses built from
    /// handler failures.
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::Config(msg)
            | Self::Io(msg)
            | Self::Transport(msg)
            | Self::Framing(msg)
            | Self::EndOfStream(msg)
            | Self::Timeout(msg)
            | Self::InvalidParams(msg)
            | Self::Session(msg)
            | Self::NotFound(msg)
            | Self::AlreadyExists(msg)
            | Self::Internal(msg) => msg.clone(),
            Self::Protocol(err) => err.message.clone(),
            Self::Closed => "transport closed".into(),
            Self::Cancelled => "operation cancelled".into(),
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Framing(msg) => write!(f, "framing: {msg}"),
            Self::EndOfStream(msg) => write!(f, "end of stream: {msg}"),
            Self::Closed => write!(f, "transport closed"),
            Self::Cancelled => write!(f, "operation cancelled"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::InvalidParams(msg) => write!(f, "invalid params: {msg}"),
            Self::Protocol(err) => write!(f, "protocol error {}: {}", err.code, err.message),
            Self::Session(msg) => write!(f, "session: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::AlreadyExists(msg) => write!(f, "already exists: {msg}"),
            Self::Internal(msg) => write!(f, "internal: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            Self::EndOfStream(err.to_string())
        } else {
            Self::Io(err.to_string())
        }
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("json: {err}"))
    }
}

impl From<RpcError> for AppError {
    fn from(err: RpcError) -> Self {
        Self::Protocol(err)
    }
}
