//! Length-prefixed frame codec.
//!
//! # Wire Format
//! ```text
//! frame   = 1*DIGIT LF payload
//! payload = <length> OCTETs
//! ```
//!
//! The decimal length header is parsed first; the payload is then taken as
//! exactly that many raw bytes without scanning them, so payloads may carry
//! any value including embedded line feeds. Nothing follows the payload.
//!
//! # Design Decisions
//! - Length is checked against `max_frame_size` before buffering the payload
//! - A header that grows past `MAX_HEADER_LEN` bytes without a terminator is rejected
//! - End of stream inside a frame is an error, never a short frame

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Line terminator closing the length header.
pub const HEADER_TERMINATOR: u8 = b'\n';

/// Longest accepted length header (digits of `u64::MAX`).
pub const MAX_HEADER_LEN: usize = 20;

/// Default upper bound for a single frame payload (1 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Errors produced while decoding or encoding frames.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Length header is empty, not decimal, or does not fit.
    #[error("malformed frame length header")]
    MalformedLength,

    /// Declared length is above the configured maximum.
    #[error("frame length {len} exceeds maximum of {max} bytes")]
    TooLarge { len: usize, max: usize },

    /// Stream ended while a length header was being read.
    #[error("stream ended inside a frame header ({buffered} bytes buffered)")]
    TruncatedHeader { buffered: usize },

    /// Stream ended before the declared payload arrived.
    #[error("stream ended after {received} of {expected} payload bytes")]
    TruncatedPayload { expected: usize, received: usize },

    /// Underlying transport error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// Whether the error was caused by the peer violating the frame protocol.
    pub fn is_protocol_violation(&self) -> bool {
        !matches!(self, FrameError::Io(_))
    }

    /// Short label used for metrics and logs.
    pub fn reason(&self) -> &'static str {
        match self {
            FrameError::MalformedLength => "malformed_length",
            FrameError::TooLarge { .. } => "too_large",
            FrameError::TruncatedHeader { .. } => "truncated_header",
            FrameError::TruncatedPayload { .. } => "truncated_payload",
            FrameError::Io(_) => "io",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Header,
    Payload(usize),
}

/// Codec for the `<len>\n<payload>` framing.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
    state: DecodeState,
}

impl FrameCodec {
    /// Create a codec that refuses frames above `max_frame_size` bytes.
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            state: DecodeState::Header,
        }
    }

    /// Configured maximum payload size.
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    fn decode_header(&self, src: &mut BytesMut) -> Result<Option<usize>, FrameError> {
        let Some(pos) = src.iter().position(|b| *b == HEADER_TERMINATOR) else {
            // Fail fast on garbage instead of waiting for a terminator that may never come.
            if src.len() > MAX_HEADER_LEN || !src.iter().all(u8::is_ascii_digit) {
                return Err(FrameError::MalformedLength);
            }
            return Ok(None);
        };

        if pos > MAX_HEADER_LEN {
            return Err(FrameError::MalformedLength);
        }

        let line = src.split_to(pos + 1);
        let len = parse_length(&line[..pos])?;
        if len > self.max_frame_size {
            return Err(FrameError::TooLarge {
                len,
                max: self.max_frame_size,
            });
        }
        Ok(Some(len))
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

fn parse_length(digits: &[u8]) -> Result<usize, FrameError> {
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(FrameError::MalformedLength);
    }
    std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or(FrameError::MalformedLength)
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, FrameError> {
        loop {
            match self.state {
                DecodeState::Header => match self.decode_header(src)? {
                    Some(len) => {
                        src.reserve(len.saturating_sub(src.len()));
                        self.state = DecodeState::Payload(len);
                    }
                    None => return Ok(None),
                },
                DecodeState::Payload(len) => {
                    if src.len() < len {
                        return Ok(None);
                    }
                    self.state = DecodeState::Header;
                    return Ok(Some(src.split_to(len).freeze()));
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, FrameError> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }

        match self.state {
            DecodeState::Header if src.is_empty() => Ok(None),
            DecodeState::Header => {
                let buffered = src.len();
                src.clear();
                Err(FrameError::TruncatedHeader { buffered })
            }
            DecodeState::Payload(expected) => {
                let received = src.len();
                src.clear();
                self.state = DecodeState::Header;
                Err(FrameError::TruncatedPayload { expected, received })
            }
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> Result<(), FrameError> {
        if payload.len() > self.max_frame_size {
            return Err(FrameError::TooLarge {
                len: payload.len(),
                max: self.max_frame_size,
            });
        }
        let header = payload.len().to_string();
        dst.reserve(header.len() + 1 + payload.len());
        dst.put_slice(header.as_bytes());
        dst.put_u8(HEADER_TERMINATOR);
        dst.put_slice(&payload);
        Ok(())
    }
}

/// Encode a single payload into its wire representation.
pub fn encode(payload: &[u8]) -> Bytes {
    let mut dst = BytesMut::with_capacity(payload.len() + MAX_HEADER_LEN + 1);
    dst.put_slice(payload.len().to_string().as_bytes());
    dst.put_u8(HEADER_TERMINATOR);
    dst.put_slice(payload);
    dst.freeze()
}
