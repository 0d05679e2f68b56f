//! Frame codecs
//!
//! Both codecs recover from framing errors locally: a malformed header or
//! body is dropped and decoding resynchronizes on the next frame. Only IO
//! errors ever reach the stream consumer.

use bytes::{Buf, BufMut, BytesMut};
use lazy_static::lazy_static;
use regex::bytes::Regex;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, warn};

use crate::message::Message;

/// Maximum message size (16 MB)
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Maximum size of a header block before it is considered garbage
const MAX_HEADER_SIZE: usize = 8 * 1024;

/// Header block terminator
const HEADER_DELIMITER: &[u8] = b"\r\n\r\n";

lazy_static! {
    static ref CONTENT_LENGTH_REGEX: Regex =
        Regex::new(r"(?i)Content-Length:\s*(\d+)").unwrap();
}

/// Protocol codec error
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// Serialize a message, enforcing the size limit
fn serialize(item: &Message) -> Result<Vec<u8>, CodecError> {
    let data = serde_json::to_vec(item)?;
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(CodecError::MessageTooLarge {
            size: data.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(data)
}

// ==================== Header framing ====================

/// Codec for `Content-Length` framed JSON
///
/// ```text
/// Content-Length: 27\r\n
/// \r\n
/// {"jsonrpc":"2.0","id":1,...}
/// ```
///
/// Other header fields are tolerated and ignored.
#[derive(Debug, Default)]
pub struct HeaderCodec {
    /// Body length announced by the last header, while waiting for the body
    content_length: Option<usize>,
}

impl HeaderCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extract the announced body length from a header block
    fn parse_content_length(header: &[u8]) -> Option<usize> {
        let caps = CONTENT_LENGTH_REGEX.captures(header)?;
        std::str::from_utf8(&caps[1]).ok()?.parse().ok()
    }
}

impl Decoder for HeaderCodec {
    type Item = Message;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let len = match self.content_length {
                Some(len) => len,
                None => {
                    let Some(end) = src
                        .windows(HEADER_DELIMITER.len())
                        .position(|w| w == HEADER_DELIMITER)
                    else {
                        if src.len() > MAX_HEADER_SIZE {
                            // Keep a possible partial delimiter at the tail
                            let drop = src.len() - (HEADER_DELIMITER.len() - 1);
                            warn!("Discarding {} bytes without a frame header", drop);
                            src.advance(drop);
                        }
                        return Ok(None);
                    };

                    let header = src.split_to(end);
                    src.advance(HEADER_DELIMITER.len());

                    match Self::parse_content_length(&header) {
                        Some(len) if len <= MAX_MESSAGE_SIZE => {
                            self.content_length = Some(len);
                            len
                        }
                        Some(len) => {
                            warn!(
                                "Discarding header announcing {} bytes (max {})",
                                len, MAX_MESSAGE_SIZE
                            );
                            continue;
                        }
                        None => {
                            warn!(
                                "Discarding malformed header: {:?}",
                                String::from_utf8_lossy(&header)
                            );
                            continue;
                        }
                    }
                }
            };

            if src.len() < len {
                src.reserve(len - src.len());
                return Ok(None);
            }

            let body = src.split_to(len);
            self.content_length = None;

            match serde_json::from_slice::<Message>(&body) {
                Ok(msg) => return Ok(Some(msg)),
                Err(e) => {
                    debug!("Dropping frame with invalid JSON body: {}", e);
                    continue;
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(msg) = self.decode(buf)? {
            return Ok(Some(msg));
        }
        if !buf.is_empty() {
            debug!("Discarding {} bytes of incomplete frame at EOF", buf.len());
            buf.clear();
        }
        self.content_length = None;
        Ok(None)
    }
}

impl Encoder<Message> for HeaderCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let data = serialize(&item)?;
        let header = format!("Content-Length: {}\r\n\r\n", data.len());

        dst.reserve(header.len() + data.len());
        dst.put_slice(header.as_bytes());
        dst.put_slice(&data);
        Ok(())
    }
}

// ==================== Line framing ====================

/// Codec for newline-delimited JSON
///
/// Used on the hub <-> client link only, so it never has to match the
/// downstream tool's framing.
#[derive(Debug, Default)]
pub struct LineCodec {
    /// Offset already scanned for a newline
    next_index: usize,
    /// Dropping an oversized line until its terminating newline
    discarding: bool,
}

impl LineCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for LineCodec {
    type Item = Message;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let newline = src[self.next_index..].iter().position(|b| *b == b'\n');

            let Some(offset) = newline else {
                if self.discarding {
                    src.clear();
                    self.next_index = 0;
                } else if src.len() > MAX_MESSAGE_SIZE {
                    warn!("Discarding line longer than {} bytes", MAX_MESSAGE_SIZE);
                    src.clear();
                    self.next_index = 0;
                    self.discarding = true;
                } else {
                    self.next_index = src.len();
                }
                return Ok(None);
            };

            let line = src.split_to(self.next_index + offset + 1);
            self.next_index = 0;

            if self.discarding {
                self.discarding = false;
                continue;
            }

            let line = &line[..line.len() - 1];
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            match serde_json::from_slice::<Message>(line) {
                Ok(msg) => return Ok(Some(msg)),
                Err(e) => {
                    debug!("Skipping unparsable line: {}", e);
                    continue;
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(msg) = self.decode(buf)? {
            return Ok(Some(msg));
        }
        if !buf.is_empty() {
            debug!("Discarding {} bytes of unterminated line at EOF", buf.len());
            buf.clear();
        }
        self.next_index = 0;
        self.discarding = false;
        Ok(None)
    }
}

impl Encoder<Message> for LineCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let data = serialize(&item)?;

        dst.reserve(data.len() + 1);
        dst.put_slice(&data);
        dst.put_u8(b'\n');
        Ok(())
    }
}
