//! Line codec: frames a TCP byte stream into protocol messages.
//!
//! Splits on `\n` (tolerating a preceding `\r`), tokenises each line into a
//! [`Message`], and serializes outgoing messages with `\n` termination.
//!
//! A line that fails to tokenise is yielded as `Err(ParseError)` inside the
//! item so the stream stays usable; only I/O failures and over-long lines are
//! returned as codec errors, which end the stream.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::message::{Message, ParseError};

/// Maximum line length, excluding the terminator.
pub const MAX_LINE_LENGTH: usize = 8191;

/// Codec error: the stream can no longer be framed.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("line exceeds maximum length ({MAX_LINE_LENGTH} bytes)")]
    LineTooLong,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Default)]
pub struct LineCodec {
    // Bytes already scanned for a terminator.
    scanned: usize,
}

impl LineCodec {
    pub fn new() -> Self {
        Self::default()
    }

    fn parse_line(line: &[u8]) -> Option<Result<Message, ParseError>> {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let text = match std::str::from_utf8(line) {
            Ok(text) => text,
            Err(_) => return Some(Err(ParseError::InvalidUtf8)),
        };
        Message::parse(text).transpose()
    }
}

/// Length of a line without the `\r` of a `\r\n` terminator
fn content_len(line: &[u8]) -> usize {
    line.strip_suffix(b"\r").unwrap_or(line).len()
}

impl Decoder for LineCodec {
    type Item = Result<Message, ParseError>;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let newline = src[self.scanned..].iter().position(|b| *b == b'\n');

            let Some(offset) = newline else {
                self.scanned = src.len();
                // A trailing \r may be the start of a \r\n terminator.
                if content_len(src) > MAX_LINE_LENGTH {
                    return Err(CodecError::LineTooLong);
                }
                return Ok(None);
            };

            let pos = self.scanned + offset;
            self.scanned = 0;
            if content_len(&src[..pos]) > MAX_LINE_LENGTH {
                return Err(CodecError::LineTooLong);
            }

            let line = src.split_to(pos);
            src.advance(1); // skip \n

            // Blank lines carry no request.
            if let Some(item) = Self::parse_line(&line) {
                return Ok(Some(item));
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(item) = self.decode(src)? {
            return Ok(Some(item));
        }
        // Unterminated final line.
        self.scanned = 0;
        if src.is_empty() {
            return Ok(None);
        }
        let line = src.split_to(src.len());
        Ok(Self::parse_line(&line))
    }
}

impl Encoder<Message> for LineCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = item.pack();
        dst.reserve(line.len() + 1);
        dst.put_slice(line.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}
