//! Error types for connecting, running and using a STOMP session.
//!
//! Decode and routing failures are recovered inside the session and only
//! logged; `TransportError` drives the reconnect policy; `ConnectError` and
//! `NotConnectedError` are returned to the caller.

use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

use crate::frame::Frame;
use crate::session::{SessionId, SessionState};

/// Contents of an `ERROR` frame sent by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    /// The `message` header, or `"unknown error"` when absent.
    pub message: String,
    /// Body text, if non-empty.
    pub body: Option<String>,
    /// `receipt-id` of the frame that caused the error, if any.
    pub receipt_id: Option<String>,
    pub headers: Vec<(String, String)>,
}

impl ServerError {
    pub fn from_frame(frame: &Frame) -> Self {
        let body = if frame.body.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&frame.body).into_owned())
        };
        Self {
            message: frame
                .get_header("message")
                .unwrap_or("unknown error")
                .to_string(),
            body,
            receipt_id: frame.get_header("receipt-id").map(str::to_string),
            headers: frame.headers.clone(),
        }
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(body) = &self.body {
            write!(f, ": {}", body.trim_end())?;
        }
        Ok(())
    }
}

impl std::error::Error for ServerError {}

/// Failure to establish a session. Reported to whoever called `connect`.
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("invalid websocket uri {uri:?}: {reason}")]
    InvalidUri { uri: String, reason: String },
    #[error("websocket open failed: {0}")]
    WebSocket(#[source] Box<tungstenite::Error>),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("broker rejected connection: {0}")]
    Rejected(ServerError),
    #[error("connection closed before CONNECTED was received")]
    ClosedDuringHandshake,
    #[error("no CONNECTED within {0:?}")]
    Timeout(Duration),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("a session is already active on this manager")]
    AlreadyActive,
    #[error("session manager has been shut down")]
    ShutDown,
}

impl From<tungstenite::Error> for ConnectError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::Io(e) => ConnectError::Io(e),
            other => ConnectError::WebSocket(Box::new(other)),
        }
    }
}

/// Loss of an established connection, or a failed attempt to get it back.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[source] Box<tungstenite::Error>),
    #[error("undecodable data on the wire: {0}")]
    Codec(#[source] io::Error),
    #[error("connection closed by peer{}", .0.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    Closed(Option<String>),
    #[error("nothing received for {0:?}")]
    HeartbeatTimeout(Duration),
    #[error("broker sent ERROR: {0}")]
    Server(ServerError),
    #[error("reconnect attempt {attempt} failed: {source}")]
    Reconnect {
        attempt: u32,
        #[source]
        source: ConnectError,
    },
}

impl From<tungstenite::Error> for TransportError {
    fn from(err: tungstenite::Error) -> Self {
        TransportError::WebSocket(Box::new(err))
    }
}

/// A message body that could not be turned into the subscription's
/// payload type.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("message has an empty body")]
    EmptyBody,
    #[error("unsupported content-type {0:?}")]
    UnsupportedContentType(String),
    #[error("payload type mismatch: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
#[error("payload could not be serialized: {0}")]
pub struct EncodeError(#[from] pub serde_json::Error);

/// Returned by session operations that need a live connection.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("session {session} is {state}, not connected")]
pub struct NotConnectedError {
    pub session: SessionId,
    pub state: SessionState,
}

#[derive(Error, Debug)]
pub enum SendError {
    #[error(transparent)]
    NotConnected(#[from] NotConnectedError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
}
