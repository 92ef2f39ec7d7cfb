//! STOMP frames carried over a WebSocket connection.
//!
//! WebSocket framing is handled by `tokio-tungstenite`; this module feeds
//! message payloads through `StompCodec` in both directions.

use bytes::BytesMut;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::http::Uri;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{StompCodec, StompItem};
use crate::error::{ConnectError, TransportError};
use crate::frame::Command;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Validate a `ws://`/`wss://` URI and return its `host[:port]`.
pub(crate) fn authority_of(uri: &str) -> Result<String, ConnectError> {
    let invalid = |reason: &str| ConnectError::InvalidUri {
        uri: uri.to_string(),
        reason: reason.to_string(),
    };
    let parsed = uri.parse::<Uri>().map_err(|e| invalid(&e.to_string()))?;
    match parsed.scheme_str() {
        Some("ws") | Some("wss") => {}
        _ => return Err(invalid("scheme must be ws or wss")),
    }
    parsed
        .authority()
        .map(|a| a.to_string())
        .ok_or_else(|| invalid("missing host"))
}

/// Writing half: encodes items and sends them as WebSocket messages.
pub(crate) struct FrameSink {
    sink: SplitSink<WsStream, Message>,
    codec: StompCodec,
}

/// Reading half: reassembles STOMP items from WebSocket messages.
pub(crate) struct FrameStream {
    stream: SplitStream<WsStream>,
    codec: StompCodec,
    buf: BytesMut,
}

/// An open WebSocket carrying STOMP.
pub(crate) struct StompTransport {
    sink: FrameSink,
    stream: FrameStream,
}

impl StompTransport {
    /// Open the WebSocket. The caller bounds this with its connect timeout.
    pub(crate) async fn open(uri: &str) -> Result<Self, ConnectError> {
        let (ws, response) = connect_async(uri).await?;
        tracing::debug!(uri, status = %response.status(), "websocket open");
        let (sink, stream) = ws.split();
        Ok(Self {
            sink: FrameSink {
                sink,
                codec: StompCodec::new(),
            },
            stream: FrameStream {
                stream,
                codec: StompCodec::new(),
                buf: BytesMut::new(),
            },
        })
    }

    pub(crate) async fn send(&mut self, item: StompItem) -> Result<(), TransportError> {
        self.sink.send(item).await
    }

    pub(crate) async fn next_item(&mut self) -> Option<Result<StompItem, TransportError>> {
        self.stream.next_item().await
    }

    pub(crate) fn into_split(self) -> (FrameSink, FrameStream) {
        (self.sink, self.stream)
    }
}

impl FrameSink {
    /// Encode one item into a single WebSocket message: text when the
    /// encoded frame is UTF-8, binary otherwise.
    pub(crate) async fn send(&mut self, item: StompItem) -> Result<(), TransportError> {
        let mut dst = BytesMut::new();
        self.codec
            .encode(item, &mut dst)
            .map_err(TransportError::Codec)?;
        let message = match String::from_utf8(dst.to_vec()) {
            Ok(text) => Message::Text(text.into()),
            Err(e) => Message::Binary(e.into_bytes().into()),
        };
        self.sink.send(message).await?;
        Ok(())
    }

    /// Send a WebSocket close; errors are irrelevant at this point.
    pub(crate) async fn close(&mut self) {
        if let Err(e) = self.sink.close().await {
            tracing::debug!(error = %e, "websocket close");
        }
    }
}

impl FrameStream {
    /// Next STOMP item, or `None` once the peer has closed cleanly.
    ///
    /// Cancel-safe: bytes already received stay buffered.
    pub(crate) async fn next_item(&mut self) -> Option<Result<StompItem, TransportError>> {
        loop {
            match self.codec.decode(&mut self.buf) {
                Ok(Some(item)) => return Some(Ok(item)),
                Ok(None) => {}
                Err(e) => return Some(Err(TransportError::Codec(e))),
            }

            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(e.into())),
            };
            match message {
                Message::Text(text) => self.buf.extend_from_slice(text.as_bytes()),
                Message::Binary(bytes) => self.buf.extend_from_slice(&bytes),
                Message::Close(frame) => {
                    let reason = frame
                        .map(|f| f.reason.as_str().to_string())
                        .filter(|r| !r.is_empty());
                    return Some(Err(TransportError::Closed(reason)));
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }
}

/// Wait for a specific RECEIPT, discarding anything else, up to `timeout`.
pub(crate) async fn await_receipt(
    stream: &mut FrameStream,
    receipt_id: &str,
    timeout: Duration,
) -> bool {
    let wait = async {
        while let Some(Ok(item)) = stream.next_item().await {
            if let StompItem::Frame(f) = item {
                if f.command == Command::Receipt
                    && f.get_header("receipt-id") == Some(receipt_id)
                {
                    return true;
                }
            }
        }
        false
    };
    tokio::time::timeout(timeout, wait).await.unwrap_or(false)
}
