//! Typed payloads carried in STOMP bodies as JSON.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, EncodeError};
use crate::frame::{Command, Frame};

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Broadcast by the greeting controller on `/topic/greetings`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Greeting {
    pub content: String,
}

/// Sent to the application destination `/app/hello`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloMessage {
    pub name: String,
}

fn is_json(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    mime == JSON_CONTENT_TYPE || mime.ends_with("+json")
}

/// Build a `SEND` frame carrying `payload` as JSON.
pub fn encode<T: Serialize>(destination: &str, payload: &T) -> Result<Frame, EncodeError> {
    let body = serde_json::to_vec(payload)?;
    Ok(Frame::new(Command::Send)
        .header("destination", destination)
        .header("content-type", JSON_CONTENT_TYPE)
        .header("content-length", body.len().to_string())
        .set_body(body))
}

/// Parse a frame body as `T`.
///
/// A missing `content-type` is treated as JSON.
pub fn decode<T: DeserializeOwned>(frame: &Frame) -> Result<T, DecodeError> {
    if let Some(content_type) = frame.get_header("content-type") {
        if !is_json(content_type) {
            return Err(DecodeError::UnsupportedContentType(content_type.to_string()));
        }
    }
    if frame.body.is_empty() {
        return Err(DecodeError::EmptyBody);
    }
    Ok(serde_json::from_slice(&frame.body)?)
}
