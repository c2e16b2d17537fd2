//! Newline-delimited frame codec (panic-free).
//!
//! Inbound bytes accumulate in a `BytesMut`; every complete `\n`-terminated
//! segment is handed out as one frame string. A trailing partial segment stays
//! buffered until the next `feed`.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{LinkError, Result};
use crate::protocol::envelope::Envelope;

/// Default upper bound for a single frame (excluding the delimiter).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

const DELIMITER: u8 = b'\n';
const PREVIEW_CHARS: usize = 120;

/// Stateful frame reassembler.
#[derive(Debug)]
pub struct FrameCodec {
    buf: BytesMut,
    max_frame_bytes: usize,
    /// Bytes of `buf` already known to contain no delimiter.
    scanned: usize,
    /// Dropping the remainder of an oversized frame until the next delimiter.
    discarding: bool,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl FrameCodec {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_frame_bytes,
            scanned: 0,
            discarding: false,
        }
    }

    /// Append `bytes` and return a lazy iterator over every complete frame.
    ///
    /// Frames not pulled from the iterator stay buffered for the next call.
    pub fn feed(&mut self, bytes: &[u8]) -> Frames<'_> {
        self.buf.extend_from_slice(bytes);
        Frames { codec: self }
    }

    /// Number of buffered bytes that do not yet form a complete frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    fn next_frame(&mut self) -> Option<Result<String>> {
        loop {
            let Some(pos) = self.buf[self.scanned..].iter().position(|b| *b == DELIMITER) else {
                return self.hold_partial();
            };

            let end = self.scanned + pos;
            let line = self.buf.split_to(end + 1);
            self.scanned = 0;

            if self.discarding {
                self.discarding = false;
                continue;
            }

            let line = &line[..end];
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            if line.len() > self.max_frame_bytes {
                return Some(Err(self.too_large()));
            }

            return Some(match std::str::from_utf8(line) {
                Ok(s) => Ok(s.to_owned()),
                Err(e) => Err(LinkError::MalformedMessage(format!("frame is not utf-8: {e}"))),
            });
        }
    }

    fn hold_partial(&mut self) -> Option<Result<String>> {
        if self.discarding {
            self.buf.clear();
            self.scanned = 0;
            return None;
        }
        if self.buf.len() > self.max_frame_bytes {
            tracing::debug!(
                buffered = self.buf.len(),
                limit = self.max_frame_bytes,
                "discarding oversized frame until next delimiter"
            );
            self.buf.clear();
            self.scanned = 0;
            self.discarding = true;
            return Some(Err(self.too_large()));
        }
        self.scanned = self.buf.len();
        None
    }

    fn too_large(&self) -> LinkError {
        LinkError::MalformedMessage(format!("frame exceeds {} bytes", self.max_frame_bytes))
    }
}

/// Frames extracted by one [`FrameCodec::feed`] call.
#[derive(Debug)]
pub struct Frames<'a> {
    codec: &'a mut FrameCodec,
}

impl Iterator for Frames<'_> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.codec.next_frame()
    }
}

/// Serialize an envelope to its wire form, delimiter included.
pub fn encode_envelope(env: &Envelope) -> Result<Bytes> {
    env.validate()
        .map_err(|e| LinkError::Serialization(format!("refusing to encode: {e}")))?;

    let mut out = serde_json::to_vec(env)
        .map_err(|e| LinkError::Serialization(format!("envelope json: {e}")))?;
    out.put_u8(DELIMITER);
    Ok(Bytes::from(out))
}

/// Parse one frame into a validated envelope.
pub fn decode_envelope(frame: &str) -> Result<Envelope> {
    let env: Envelope = serde_json::from_str(frame).map_err(|e| {
        LinkError::MalformedMessage(format!("invalid envelope json ({e}): {}", preview(frame)))
    })?;
    env.validate()?;
    Ok(env)
}

/// Truncated copy of a raw frame for diagnostics.
pub fn preview(frame: &str) -> String {
    match frame.char_indices().nth(PREVIEW_CHARS) {
        Some((idx, _)) => format!("{}...", &frame[..idx]),
        None => frame.to_owned(),
    }
}
