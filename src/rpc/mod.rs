//! JSON-RPC 2.0 message model and error taxonomy.
//!
//! - `error`: [`ErrorCode`] taxonomy and the wire [`RpcError`] object.
//! - `message`: [`Request`], [`Response`], [`Message`] and the [`parse`]
//!   classifier.

pub mod error;
pub mod message;

pub use error::{ErrorCode, RpcError};
pub use message::{parse, Message, Request, RequestId, Response, Version, JSONRPC_VERSION};
