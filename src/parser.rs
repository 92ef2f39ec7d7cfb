//! Slice-based STOMP frame parser.
//!
//! The parser works on a borrowed byte slice and reports how many bytes a
//! complete frame occupied, so the codec can advance its read buffer only
//! once a whole frame is available. Header escapes are left in place here;
//! `unescape_header_value` undoes them for frames that use escaping.

use thiserror::Error;

/// Protocol errors found while parsing a frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),
    #[error("invalid content-length {0:?}")]
    InvalidContentLength(String),
    #[error("missing NUL terminator after content-length body")]
    MissingNul,
    #[error("invalid escape sequence: {0}")]
    InvalidEscape(String),
}

/// A frame cut out of the input, still as raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub command: Vec<u8>,
    pub headers: Vec<(Vec<u8>, Vec<u8>)>,
    pub body: Vec<u8>,
    /// Number of input bytes the frame used, including the NUL and an
    /// optional trailing EOL.
    pub consumed: usize,
}

/// Split off the next line starting at `pos`, without its LF or CR LF.
/// Returns the line and the position just after the LF.
fn next_line(input: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    let rel = input[pos..].iter().position(|&b| b == b'\n')?;
    let mut line = &input[pos..pos + rel];
    if let [rest @ .., b'\r'] = line {
        line = rest;
    }
    Some((line, pos + rel + 1))
}

/// Skip a single EOL (LF or CR LF) following a frame's NUL, if present.
fn skip_trailing_eol(input: &[u8], mut pos: usize) -> usize {
    if input.get(pos) == Some(&b'\r') && input.get(pos + 1) == Some(&b'\n') {
        pos += 2;
    } else if input.get(pos) == Some(&b'\n') {
        pos += 1;
    }
    pos
}

fn content_length(headers: &[(Vec<u8>, Vec<u8>)]) -> Result<Option<usize>, ParseError> {
    let Some((_, raw)) = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(b"content-length"))
    else {
        return Ok(None);
    };
    let text = String::from_utf8_lossy(raw);
    text.trim()
        .parse::<usize>()
        .map(Some)
        .map_err(|_| ParseError::InvalidContentLength(text.into_owned()))
}

/// Parse one STOMP frame from the front of `input`.
///
/// Leading EOLs are skipped (the codec reports those as heart-beats before
/// calling in here). Returns `Ok(None)` when the slice does not yet contain
/// a complete frame.
pub fn parse_frame_slice(input: &[u8]) -> Result<Option<RawFrame>, ParseError> {
    let mut pos = 0usize;
    while pos < input.len() && (input[pos] == b'\n' || input[pos] == b'\r') {
        pos += 1;
    }

    let Some((command, after_command)) = next_line(input, pos) else {
        return Ok(None);
    };
    let command = command.to_vec();
    pos = after_command;

    let mut headers = Vec::new();
    loop {
        let Some((line, next)) = next_line(input, pos) else {
            return Ok(None);
        };
        pos = next;
        if line.is_empty() {
            break;
        }
        let Some(colon) = line.iter().position(|&b| b == b':') else {
            return Err(ParseError::MalformedHeader(
                String::from_utf8_lossy(line).into_owned(),
            ));
        };
        headers.push((line[..colon].to_vec(), line[colon + 1..].to_vec()));
    }

    let body_end = match content_length(&headers)? {
        Some(len) => {
            if pos + len >= input.len() {
                return Ok(None);
            }
            if input[pos + len] != 0 {
                return Err(ParseError::MissingNul);
            }
            pos + len
        }
        None => match input[pos..].iter().position(|&b| b == 0) {
            Some(rel) => pos + rel,
            None => return Ok(None),
        },
    };

    let body = input[pos..body_end].to_vec();
    let consumed = skip_trailing_eol(input, body_end + 1);
    Ok(Some(RawFrame {
        command,
        headers,
        body,
        consumed,
    }))
}

/// Undo STOMP 1.2 header escaping (`\\`, `\n`, `\r`, `\c`).
///
/// Any other character after a backslash, or a trailing lone backslash, is
/// a protocol error.
pub fn unescape_header_value(raw: &[u8]) -> Result<Vec<u8>, ParseError> {
    let mut out = Vec::with_capacity(raw.len());
    let mut bytes = raw.iter();
    while let Some(&b) = bytes.next() {
        if b != b'\\' {
            out.push(b);
            continue;
        }
        match bytes.next() {
            Some(b'\\') => out.push(b'\\'),
            Some(b'n') => out.push(b'\n'),
            Some(b'r') => out.push(b'\r'),
            Some(b'c') => out.push(b':'),
            Some(&other) => {
                return Err(ParseError::InvalidEscape(format!(
                    "\\{}",
                    char::from(other)
                )));
            }
            None => return Err(ParseError::InvalidEscape("trailing backslash".into())),
        }
    }
    Ok(out)
}
