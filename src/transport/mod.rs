//! Message transport.
//!
//! Frames and unframes JSON-RPC bodies over a byte stream pair. The
//! transport has no knowledge of JSON-RPC semantics; it moves UTF-8 text.
//!
//! - `codec`: [`FrameCodec`], the `Content-Length` framing codec.
//! - `stream`: [`StreamTransport`], the codec driven over an
//!   `AsyncRead`/`AsyncWrite` pair (stdio in production).

pub mod codec;
pub mod stream;

use std::future::Future;
use std::pin::Pin;

use tokio_util::sync::CancellationToken;

use crate::Result;

pub use codec::{Frame, FrameCodec, FrameLimits};
pub use stream::StreamTransport;

/// Boxed, sendable future returned by the object-safe traits in this crate.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A bidirectional message channel to the single connected peer.
pub trait Transport: Send + Sync {
    /// Whether the channel is still usable (not closed, peer not gone).
    fn is_connected(&self) -> bool;

    /// Read the next message body.
    ///
    /// # Errors
    ///
    /// - [`AppError::EndOfStream`](crate::AppError::EndOfStream) when the peer
    ///   closed the stream, including mid-frame.
    /// - [`AppError::Framing`](crate::AppError::Framing) when one frame was
    ///   unusable; the next read may succeed.
    /// - [`AppError::Cancelled`](crate::AppError::Cancelled) when `cancel` fired.
    /// - [`AppError::Closed`](crate::AppError::Closed) after [`close`](Self::close).
    /// - [`AppError::Transport`](crate::AppError::Transport) or
    ///   [`AppError::Io`](crate::AppError::Io) on unrecoverable faults.
    fn read_message<'a>(&'a self, cancel: &'a CancellationToken) -> BoxFuture<'a, Result<String>>;

    /// Frame and write one message body, then flush.
    ///
    /// # Errors
    ///
    /// - [`AppError::Closed`](crate::AppError::Closed) after [`close`](Self::close).
    /// - [`AppError::Cancelled`](crate::AppError::Cancelled) when `cancel` fired.
    /// - [`AppError::Io`](crate::AppError::Io) when the underlying write fails.
    fn write_message<'a>(
        &'a self,
        body: &'a str,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<()>>;

    /// Flush and shut down the write side. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`](crate::AppError::Io) if the final flush fails.
    fn close(&self) -> BoxFuture<'_, Result<()>>;
}
