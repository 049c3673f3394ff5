//! Unit tests for the `Content-Length` frame codec.
//!
//! Covers partial delivery, multi-byte bodies, tolerated header noise,
//! recoverable invalid frames, size limits and end-of-stream handling.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use acp_engine::transport::{Frame, FrameCodec, FrameLimits};
use acp_engine::AppError;

fn framed(body: &str) -> String {
    format!("Content-Length: {}\r\n\r\n{body}", body.len())
}

// ── Basic decoding ──────────────────────────────────────────────────────────

/// A complete frame decodes to its body.
#[test]
fn complete_frame_decodes() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from(framed(r#"{"jsonrpc":"2.0","method":"ping"}"#).as_str());

    let frame = codec.decode(&mut buf).expect("decode");

    assert_eq!(
        frame,
        Some(Frame::Message(r#"{"jsonrpc":"2.0","method":"ping"}"#.to_owned()))
    );
    assert!(buf.is_empty(), "the frame must be fully consumed");
}

/// Bytes arriving one at a time are buffered until the frame completes.
#[test]
fn partial_delivery_is_buffered() {
    let mut codec = FrameCodec::new();
    let wire = framed("{\"a\":1}");
    let mut buf = BytesMut::new();

    let mut decoded = None;
    for byte in wire.as_bytes() {
        buf.extend_from_slice(&[*byte]);
        if let Some(frame) = codec.decode(&mut buf).expect("decode") {
            decoded = Some(frame);
        }
    }

    assert_eq!(decoded, Some(Frame::Message("{\"a\":1}".to_owned())));
}

/// Two frames in one buffer decode in order.
#[test]
fn back_to_back_frames_decode_in_order() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from(format!("{}{}", framed("first"), framed("second")).as_str());

    assert_eq!(
        codec.decode(&mut buf).unwrap(),
        Some(Frame::Message("first".into()))
    );
    assert_eq!(
        codec.decode(&mut buf).unwrap(),
        Some(Frame::Message("second".into()))
    );
    assert_eq!(codec.decode(&mut buf).unwrap(), None);
}

// ── Byte lengths ────────────────────────────────────────────────────────────

/// The length counts UTF-8 bytes, so multi-byte bodies survive intact.
#[test]
fn multibyte_body_uses_byte_length() {
    let body = r#"{"text":"héllo 世界 🚀"}"#;
    assert!(body.len() > body.chars().count());

    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::new();
    codec.encode(body.to_owned(), &mut buf).expect("encode");

    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    assert!(buf.starts_with(header.as_bytes()));

    let frame = codec.decode(&mut buf).expect("decode");
    assert_eq!(frame, Some(Frame::Message(body.to_owned())));
}

/// `header_for` produces the exact wire header.
#[test]
fn header_for_matches_wire_format() {
    assert_eq!(FrameCodec::header_for(42), "Content-Length: 42\r\n\r\n");
}

// ── Header tolerance ────────────────────────────────────────────────────────

/// Header names are case-insensitive, bare `\n` terminators are accepted
/// and unrelated headers are ignored.
#[test]
fn lenient_headers_are_accepted() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from(
        "content-type: application/json\ncontent-length: 2\n\n{}",
    );

    assert_eq!(
        codec.decode(&mut buf).unwrap(),
        Some(Frame::Message("{}".into()))
    );
}

/// Blank lines between frames are skipped.
#[test]
fn stray_blank_lines_are_skipped() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from(format!("\r\n\r\n{}", framed("{}")).as_str());

    assert_eq!(
        codec.decode(&mut buf).unwrap(),
        Some(Frame::Message("{}".into()))
    );
}

/// A header block without `Content-Length` is reported as an invalid frame,
/// and the codec keeps decoding afterwards.
#[test]
fn missing_content_length_is_recoverable() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from(format!("X-Other: 1\r\n\r\n{}", framed("ok")).as_str());

    assert!(matches!(
        codec.decode(&mut buf).unwrap(),
        Some(Frame::Invalid(_))
    ));
    assert_eq!(
        codec.decode(&mut buf).unwrap(),
        Some(Frame::Message("ok".into()))
    );
}

/// A non-numeric `Content-Length` is an invalid frame, not an error.
#[test]
fn garbage_content_length_is_invalid_frame() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from("Content-Length: lots\r\n\r\n");

    let frame = codec.decode(&mut buf).unwrap();
    assert!(
        matches!(&frame, Some(Frame::Invalid(reason)) if reason.contains("Content-Length")),
        "unexpected frame: {frame:?}"
    );
}

/// An unusable length followed by its body does not poison the stream: the
/// decoder skips to the next `Content-Length` header and resumes.
#[test]
fn invalid_length_with_body_resynchronises() {
    let mut codec = FrameCodec::new();
    let wire = format!(
        "Content-Length: abc\r\n\r\n{}{}{}",
        r#"{"jsonrpc":"2.0","method":"x","id":1}"#,
        framed(r#"{"a":1}"#),
        framed(r#"{"b":2}"#),
    );
    let mut buf = BytesMut::from(wire.as_str());

    let mut frames = Vec::new();
    while let Some(frame) = codec.decode(&mut buf).unwrap() {
        frames.push(frame);
    }

    assert_eq!(frames.len(), 3, "frames: {frames:?}");
    assert!(matches!(&frames[0], Frame::Invalid(reason) if reason.contains("abc")));
    assert_eq!(frames[1], Frame::Message(r#"{"a":1}"#.into()));
    assert_eq!(frames[2], Frame::Message(r#"{"b":2}"#.into()));
    assert!(buf.is_empty());
}

/// Resynchronisation copes with the next header arriving in pieces.
#[test]
fn resync_survives_split_header_token() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from("Content-Length: -1\r\n\r\ngarbage without newline Cont");

    assert!(matches!(
        codec.decode(&mut buf).unwrap(),
        Some(Frame::Invalid(_))
    ));
    assert_eq!(codec.decode(&mut buf).unwrap(), None);

    buf.extend_from_slice(b"ent-Length: 2\r\n\r\n{}");
    assert_eq!(
        codec.decode(&mut buf).unwrap(),
        Some(Frame::Message("{}".into()))
    );
}

/// EOF while skipping the remains of an invalid frame is a clean end.
#[test]
fn eof_while_resynchronising_is_clean() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from("Content-Length: x\r\n\r\n{\"lost\":true}");

    assert!(matches!(
        codec.decode(&mut buf).unwrap(),
        Some(Frame::Invalid(_))
    ));
    assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
}

/// A body that is not UTF-8 is an invalid frame.
#[test]
fn non_utf8_body_is_invalid_frame() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from(&b"Content-Length: 2\r\n\r\n\xff\xfe"[..]);

    assert!(matches!(
        codec.decode(&mut buf).unwrap(),
        Some(Frame::Invalid(_))
    ));
}

// ── Limits ──────────────────────────────────────────────────────────────────

/// A declared length above the limit is a fatal transport error.
#[test]
fn oversized_body_is_fatal() {
    let mut codec = FrameCodec::with_limits(FrameLimits {
        max_message_bytes: 8,
        max_header_bytes: 1024,
    });
    let mut buf = BytesMut::from("Content-Length: 9\r\n\r\n123456789");

    let err = codec.decode(&mut buf).unwrap_err();
    assert!(matches!(err, AppError::Transport(_)), "got {err:?}");
}

/// An unterminated header block larger than the limit is fatal.
#[test]
fn oversized_header_block_is_fatal() {
    let mut codec = FrameCodec::with_limits(FrameLimits {
        max_message_bytes: 1024,
        max_header_bytes: 16,
    });
    let mut buf = BytesMut::from("X-Padding: aaaaaaaaaaaaaaaaaaaaaaaa");

    let err = codec.decode(&mut buf).unwrap_err();
    assert!(matches!(err, AppError::Transport(_)), "got {err:?}");
}

// ── End of stream ───────────────────────────────────────────────────────────

/// EOF on a frame boundary is a clean end.
#[test]
fn eof_between_frames_is_clean() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::new();

    assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
}

/// EOF inside a body is reported as end of stream.
#[test]
fn eof_inside_body_is_end_of_stream() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from("Content-Length: 10\r\n\r\n{\"a\"");

    assert_eq!(codec.decode(&mut buf).unwrap(), None);
    let err = codec.decode_eof(&mut buf).unwrap_err();
    assert!(matches!(err, AppError::EndOfStream(_)), "got {err:?}");
}

/// EOF inside a header block is reported as end of stream.
#[test]
fn eof_inside_header_is_end_of_stream() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from("Content-Len");

    let err = codec.decode_eof(&mut buf).unwrap_err();
    assert!(matches!(err, AppError::EndOfStream(_)), "got {err:?}");
}
