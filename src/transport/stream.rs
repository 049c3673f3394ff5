//! Byte-stream transport.
//!
//! [`StreamTransport`] frames messages over any `AsyncRead`/`AsyncWrite`
//! pair: stdin/stdout for the host binary, in-memory duplex pipes in tests.
//! Reads go through a [`FramedRead`] and writes through a [`FramedWrite`],
//! each behind its own async mutex. The write mutex is held for one full
//! header + body + flush so concurrent writers never interleave.

use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::codec::{Frame, FrameCodec, FrameLimits};
use super::{BoxFuture, Transport};
use crate::{AppError, Result};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// `Content-Length` framed transport over a reader/writer pair.
pub struct StreamTransport {
    reader: Mutex<FramedRead<BoxedReader, FrameCodec>>,
    writer: Mutex<FramedWrite<BoxedWriter, FrameCodec>>,
    closed: AtomicBool,
    reached_eof: AtomicBool,
}

impl StreamTransport {
    /// Wrap an arbitrary reader/writer pair.
    #[must_use]
    pub fn new<R, W>(reader: R, writer: W, limits: FrameLimits) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let reader: BoxedReader = Box::new(reader);
        let writer: BoxedWriter = Box::new(writer);
        Self {
            reader: Mutex::new(FramedRead::new(reader, FrameCodec::with_limits(limits))),
            writer: Mutex::new(FramedWrite::new(writer, FrameCodec::with_limits(limits))),
            closed: AtomicBool::new(false),
            reached_eof: AtomicBool::new(false),
        }
    }

    /// Transport over the process's stdin/stdout.
    #[must_use]
    pub fn stdio(limits: FrameLimits) -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout(), limits)
    }

    async fn read_inner(&self, cancel: &CancellationToken) -> Result<String> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AppError::Closed);
        }

        let mut reader = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(AppError::Cancelled),
            guard = self.reader.lock() => guard,
        };

        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(AppError::Cancelled),
            item = reader.next() => item,
        };

        match next {
            None => {
                self.reached_eof.store(true, Ordering::SeqCst);
                debug!("transport: peer closed the stream");
                Err(AppError::EndOfStream("peer closed the stream".into()))
            }
            Some(Ok(Frame::Message(body))) => {
                trace!(bytes = body.len(), "transport: message received");
                Ok(body)
            }
            Some(Ok(Frame::Invalid(reason))) => Err(AppError::Framing(reason)),
            Some(Err(err)) => {
                if matches!(err, AppError::EndOfStream(_)) {
                    self.reached_eof.store(true, Ordering::SeqCst);
                }
                Err(err)
            }
        }
    }

    async fn write_inner(&self, body: &str, cancel: &CancellationToken) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AppError::Closed);
        }

        let mut writer = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(AppError::Cancelled),
            guard = self.writer.lock() => guard,
        };

        // Close may have won the race for the lock.
        if self.closed.load(Ordering::SeqCst) {
            return Err(AppError::Closed);
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(AppError::Cancelled),
            sent = writer.send(body.to_owned()) => {
                trace!(bytes = body.len(), "transport: message written");
                sent
            }
        }
    }

    async fn close_inner(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut writer = self.writer.lock().await;
        writer.close().await?;
        debug!("transport: closed");
        Ok(())
    }
}

impl Transport for StreamTransport {
    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && !self.reached_eof.load(Ordering::SeqCst)
    }

    fn read_message<'a>(&'a self, cancel: &'a CancellationToken) -> BoxFuture<'a, Result<String>> {
        Box::pin(self.read_inner(cancel))
    }

    fn write_message<'a>(
        &'a self,
        body: &'a str,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.write_inner(body, cancel))
    }

    fn close(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.close_inner())
    }
}
