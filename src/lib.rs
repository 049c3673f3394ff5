#![forbid(unsafe_code)]

//! Session-oriented JSON-RPC 2.0 protocol engine for the Agent Client
//! Protocol, framed with `Content-Length` headers over a byte stream pair.

pub mod acp;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod rpc;
pub mod server;
pub mod session;
pub mod transport;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
