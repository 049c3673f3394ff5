//! `Content-Length` framing codec.
//!
//! Implements the LSP-style wire format:
//!
//! ```text
//! Content-Length: <decimal byte length>\r\n
//! \r\n
//! <UTF-8 JSON body, exactly that many bytes>
//! ```
//!
//! Use [`FrameCodec`] as the codec parameter for
//! [`tokio_util::codec::FramedRead`] (inbound) and
//! [`tokio_util::codec::FramedWrite`] (outbound).
//!
//! # Decoder
//!
//! Header lines end at `\n`; a trailing `\r` and surrounding whitespace are
//! ignored. Blank lines before the first header are skipped. Only
//! `Content-Length` (case-insensitive) is interpreted; every other header is
//! ignored. A header block without a usable `Content-Length`, or a body that
//! is not UTF-8, yields [`Frame::Invalid`] instead of an error so the
//! surrounding `FramedRead` keeps reading the stream.
//!
//! After a header block without a usable length the body size is unknown,
//! so the decoder discards input up to the next `Content-Length` token
//! before reading another header block.
//!
//! Oversized header blocks and bodies are fatal ([`AppError::Transport`]),
//! and a stream that ends inside a frame is [`AppError::EndOfStream`].

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace};

use crate::config::TransportConfig;
use crate::{AppError, Result};

/// Name of the only header the codec interprets.
pub const CONTENT_LENGTH: &str = "Content-Length";

/// Default maximum body size: 10 MiB.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 10 * 1024 * 1024;

/// Default maximum size of one header block: 8 KiB.
pub const DEFAULT_MAX_HEADER_BYTES: usize = 8 * 1024;

/// Size limits enforced while decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    /// Largest accepted body, in bytes.
    pub max_message_bytes: usize,
    /// Largest accepted header block, in bytes.
    pub max_header_bytes: usize,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
        }
    }
}

impl From<&TransportConfig> for FrameLimits {
    fn from(config: &TransportConfig) -> Self {
        Self {
            max_message_bytes: config.max_message_bytes,
            max_header_bytes: config.max_header_bytes,
        }
    }
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete UTF-8 body.
    Message(String),
    /// A frame that was consumed but cannot be used; carries the reason.
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Head,
    Body(usize),
    Resync,
}

/// `Content-Length` framing codec for JSON-RPC streams.
#[derive(Debug)]
pub struct FrameCodec {
    state: DecodeState,
    limits: FrameLimits,
}

impl FrameCodec {
    /// Create a codec with the default [`FrameLimits`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(FrameLimits::default())
    }

    /// Create a codec enforcing `limits`.
    #[must_use]
    pub fn with_limits(limits: FrameLimits) -> Self {
        Self {
            state: DecodeState::Head,
            limits,
        }
    }

    /// Build the header block for a body of `body_len` bytes.
    #[must_use]
    pub fn header_for(body_len: usize) -> String {
        format!("{CONTENT_LENGTH}: {body_len}\r\n\r\n")
    }

    /// Scan `src` for a complete header block.
    ///
    /// Returns `Ok(None)` while the block is incomplete, otherwise the parsed
    /// content length (or the reason it is unusable). The block is consumed
    /// from `src` once complete.
    fn decode_head(&self, src: &mut BytesMut) -> Result<Option<std::result::Result<usize, String>>> {
        let mut pos = 0;
        let mut seen_header = false;
        let mut content_length: Option<std::result::Result<usize, String>> = None;

        while let Some(offset) = src[pos..].iter().position(|b| *b == b'\n') {
            let line_end = pos + offset;
            let line = String::from_utf8_lossy(&src[pos..line_end]).trim().to_owned();
            pos = line_end + 1;

            if line.is_empty() {
                if !seen_header {
                    // Stray separator between frames.
                    src.advance(pos);
                    pos = 0;
                    continue;
                }
                src.advance(pos);
                return Ok(Some(content_length.unwrap_or_else(|| {
                    Err(format!("missing {CONTENT_LENGTH} header"))
                })));
            }

            seen_header = true;
            if let Some(parsed) = parse_content_length(&line) {
                content_length = Some(parsed);
            }
        }

        if src.len() > self.limits.max_header_bytes {
            return Err(AppError::Transport(format!(
                "header block exceeds {} bytes",
                self.limits.max_header_bytes
            )));
        }

        Ok(None)
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.state {
                DecodeState::Head => match self.decode_head(src)? {
                    None => return Ok(None),
                    Some(Err(reason)) => {
                        self.state = DecodeState::Resync;
                        return Ok(Some(Frame::Invalid(reason)));
                    }
                    Some(Ok(len)) => {
                        if len > self.limits.max_message_bytes {
                            return Err(AppError::Transport(format!(
                                "message length {len} exceeds limit of {} bytes",
                                self.limits.max_message_bytes
                            )));
                        }
                        trace!(len, "frame header decoded");
                        self.state = DecodeState::Body(len);
                    }
                },
                DecodeState::Resync => {
                    if let Some(start) = find_content_length(src) {
                        if start > 0 {
                            debug!(discarded = start, "resynchronised on next frame header");
                        }
                        src.advance(start);
                        self.state = DecodeState::Head;
                        continue;
                    }
                    // Keep a tail that may hold the start of a split token.
                    let keep = CONTENT_LENGTH.len() - 1;
                    if src.len() > keep {
                        src.advance(src.len() - keep);
                    }
                    return Ok(None);
                }
                DecodeState::Body(len) => {
                    if src.len() < len {
                        src.reserve(len - src.len());
                        return Ok(None);
                    }
                    let body = src.split_to(len);
                    self.state = DecodeState::Head;
                    return Ok(Some(match String::from_utf8(body.to_vec()) {
                        Ok(text) => Frame::Message(text),
                        Err(e) => Frame::Invalid(format!("body is not valid UTF-8: {e}")),
                    }));
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if self.state == DecodeState::Resync {
            src.clear();
            self.state = DecodeState::Head;
            return Ok(None);
        }
        if src.is_empty() && self.state == DecodeState::Head {
            return Ok(None);
        }
        let detail = match self.state {
            DecodeState::Head | DecodeState::Resync => {
                "stream ended inside a header block".to_owned()
            }
            DecodeState::Body(len) => {
                format!("stream ended after {} of {len} body bytes", src.len())
            }
        };
        src.clear();
        self.state = DecodeState::Head;
        Err(AppError::EndOfStream(detail))
    }
}

impl Encoder<String> for FrameCodec {
    type Error = AppError;

    /// Write `Content-Length: <utf8 byte count>\r\n\r\n` followed by the body.
    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        let header = Self::header_for(item.len());
        dst.reserve(header.len() + item.len());
        dst.extend_from_slice(header.as_bytes());
        dst.extend_from_slice(item.as_bytes());
        Ok(())
    }
}

// ── Private helpers ───────────────────────────────────────────────────────────

/// Offset of the first case-insensitive `Content-Length` token in `src`.
fn find_content_length(src: &[u8]) -> Option<usize> {
    let token = CONTENT_LENGTH.as_bytes();
    src.windows(token.len())
        .position(|window| window.eq_ignore_ascii_case(token))
}

/// Interpret one header line; `None` when it is not `Content-Length`.
fn parse_content_length(line: &str) -> Option<std::result::Result<usize, String>> {
    let (name, value) = line.split_once(':')?;
    if !name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
        return None;
    }
    let value = value.trim();
    Some(
        value
            .parse::<usize>()
            .map_err(|_| format!("invalid {CONTENT_LENGTH} value {value:?}")),
    )
}
