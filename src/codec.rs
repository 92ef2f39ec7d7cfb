use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

use crate::frame::{Command, Frame};
use crate::parser::{parse_frame_slice, unescape_header_value};

/// Escape a header name or value for the wire (STOMP 1.2).
fn escape_header_value(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '\\' => result.push_str("\\\\"),
            '\r' => result.push_str("\\r"),
            '\n' => result.push_str("\\n"),
            ':' => result.push_str("\\c"),
            _ => result.push(ch),
        }
    }
    result
}

fn invalid_data(what: &str, detail: impl std::fmt::Display) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("{}: {}", what, detail))
}

fn header_text(raw: Vec<u8>, escaped: bool, what: &str) -> io::Result<String> {
    let bytes = if escaped {
        unescape_header_value(&raw).map_err(|e| invalid_data(what, e))?
    } else {
        raw
    };
    String::from_utf8(bytes).map_err(|e| invalid_data(what, e))
}

/// Items produced or consumed by the codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StompItem {
    /// A decoded STOMP frame
    Frame(Frame),
    /// A heart-beat EOL (LF or CR LF)
    Heartbeat,
}

/// `StompCodec` implements `tokio_util::codec::{Decoder, Encoder}` for the
/// STOMP wire format.
///
/// WebSocket messages are fed into a `BytesMut` and drained through
/// `decode`, so one message may yield several frames or heart-beats and a
/// frame split across messages is reassembled.
#[derive(Debug, Default)]
pub struct StompCodec {
    _private: (),
}

impl StompCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for StompCodec {
    type Item = StompItem;
    type Error = io::Error;

    /// Decode the next item from `src`.
    ///
    /// Returns `Ok(None)` and leaves `src` untouched when more bytes are
    /// needed. Malformed frames, unknown commands, bad escapes and invalid
    /// UTF-8 in the command or headers are `InvalidData` errors.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match src.chunk() {
            [b'\n', ..] => {
                src.advance(1);
                return Ok(Some(StompItem::Heartbeat));
            }
            [b'\r', b'\n', ..] => {
                src.advance(2);
                return Ok(Some(StompItem::Heartbeat));
            }
            [b'\r'] => return Ok(None),
            _ => {}
        }

        let Some(raw) = parse_frame_slice(src.chunk()).map_err(|e| invalid_data("parse error", e))?
        else {
            return Ok(None);
        };
        src.advance(raw.consumed);

        let name = String::from_utf8(raw.command).map_err(|e| invalid_data("invalid utf8 in command", e))?;
        let command: Command = name.parse().map_err(|e| invalid_data("bad command", e))?;
        let escaped = command.escapes_headers();

        let mut headers = Vec::with_capacity(raw.headers.len());
        for (k, v) in raw.headers {
            let key = header_text(k, escaped, "header key")?;
            let value = header_text(v, escaped, "header value")?;
            headers.push((key, value));
        }

        Ok(Some(StompItem::Frame(Frame {
            command,
            headers,
            body: raw.body,
        })))
    }
}

impl Encoder<StompItem> for StompCodec {
    type Error = io::Error;

    /// Append the wire form of `item` to `dst`.
    ///
    /// A `content-length` header is added when the body contains NUL bytes
    /// or is not UTF-8 and the caller did not set one.
    fn encode(&mut self, item: StompItem, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let frame = match item {
            StompItem::Heartbeat => {
                dst.put_u8(b'\n');
                return Ok(());
            }
            StompItem::Frame(frame) => frame,
        };

        dst.extend_from_slice(frame.command.as_str().as_bytes());
        dst.put_u8(b'\n');

        let escaped = frame.command.escapes_headers();
        let mut headers = frame.headers;
        let has_cl = headers
            .iter()
            .any(|(k, _)| k.eq_ignore_ascii_case("content-length"));
        if !has_cl && (frame.body.contains(&0) || std::str::from_utf8(&frame.body).is_err()) {
            headers.push(("content-length".to_string(), frame.body.len().to_string()));
        }

        for (k, v) in headers {
            if escaped {
                dst.extend_from_slice(escape_header_value(&k).as_bytes());
                dst.put_u8(b':');
                dst.extend_from_slice(escape_header_value(&v).as_bytes());
            } else {
                dst.extend_from_slice(k.as_bytes());
                dst.put_u8(b':');
                dst.extend_from_slice(v.as_bytes());
            }
            dst.put_u8(b'\n');
        }

        dst.put_u8(b'\n');
        dst.extend_from_slice(&frame.body);
        dst.put_u8(0);
        Ok(())
    }
}
