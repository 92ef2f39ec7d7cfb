//! A scripted STOMP broker on a local WebSocket, for integration tests.
#![allow(dead_code)]

use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use std::future::Future;
use std::time::Duration;
use stomp_ws::{ClientConfig, Command, Frame, Heartbeat, ReconnectPolicy, StompCodec, StompItem};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{WebSocketStream, accept_async};
use tokio_util::codec::{Decoder, Encoder};

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

/// Client settings that keep tests fast: no heart-beats, short timeouts,
/// immediate reconnect.
pub fn test_config() -> ClientConfig {
    ClientConfig::new()
        .heartbeat(Heartbeat::disabled())
        .connect_timeout(Duration::from_secs(2))
        .receipt_timeout(Duration::from_millis(300))
        .reconnect_policy(ReconnectPolicy::immediate())
}

/// Poll `check` until it holds or `WAIT` elapses.
pub async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Await `fut`, failing the test after `WAIT`.
pub async fn within<T>(what: &str, fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(WAIT, fut)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
}

pub struct MockBroker {
    listener: TcpListener,
    pub uri: String,
}

impl MockBroker {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        Self {
            listener,
            uri: format!("ws://{}/gs-guide-websocket", addr),
        }
    }

    /// Accept the next WebSocket connection.
    pub async fn accept(&self) -> BrokerConn {
        let (tcp, _) = within("client connection", self.listener.accept())
            .await
            .expect("accept");
        let ws = accept_async(tcp).await.expect("websocket handshake");
        BrokerConn {
            ws,
            codec: StompCodec::new(),
            buf: BytesMut::new(),
        }
    }

    /// Whether a client connects within `window`.
    pub async fn connects_within(&self, window: Duration) -> bool {
        tokio::time::timeout(window, self.listener.accept())
            .await
            .is_ok()
    }

    /// Accept a connection and answer its CONNECT without heart-beats.
    pub async fn accept_session(&self) -> BrokerConn {
        self.accept_session_with("0,0").await
    }

    /// Accept a connection and answer its CONNECT advertising `heart_beat`.
    pub async fn accept_session_with(&self, heart_beat: &str) -> BrokerConn {
        let mut conn = self.accept().await;
        conn.expect_frame(Command::Connect).await;
        conn.send_frame(
            Frame::new(Command::Connected)
                .header("version", "1.2")
                .header("session", "mock-session")
                .header("heart-beat", heart_beat),
        )
        .await;
        conn
    }
}

/// The broker's end of one client connection.
pub struct BrokerConn {
    ws: WebSocketStream<TcpStream>,
    codec: StompCodec,
    buf: BytesMut,
}

impl BrokerConn {
    /// Next frame or heart-beat from the client; `None` once it has closed.
    pub async fn next_item(&mut self) -> Option<StompItem> {
        loop {
            if let Some(item) = self.codec.decode(&mut self.buf).expect("client sent malformed data") {
                return Some(item);
            }
            let message = match within("client data", self.ws.next()).await? {
                Ok(message) => message,
                Err(_) => return None,
            };
            match message {
                Message::Text(text) => self.buf.extend_from_slice(text.as_bytes()),
                Message::Binary(bytes) => self.buf.extend_from_slice(&bytes),
                Message::Close(_) => return None,
                _ => {}
            }
        }
    }

    /// Next frame from the client, skipping heart-beats.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            match self.next_item().await? {
                StompItem::Frame(frame) => return Some(frame),
                StompItem::Heartbeat => continue,
            }
        }
    }

    pub async fn expect_frame(&mut self, command: Command) -> Frame {
        let frame = self
            .next_frame()
            .await
            .unwrap_or_else(|| panic!("connection closed while waiting for {command}"));
        assert_eq!(frame.command, command, "unexpected frame:\n{frame}");
        frame
    }

    pub async fn try_send_frame(&mut self, frame: Frame) -> Result<(), tungstenite::Error> {
        let mut dst = BytesMut::new();
        self.codec
            .encode(StompItem::Frame(frame), &mut dst)
            .expect("encode");
        let message = match String::from_utf8(dst.to_vec()) {
            Ok(text) => Message::Text(text.into()),
            Err(e) => Message::Binary(e.into_bytes().into()),
        };
        self.ws.send(message).await
    }

    pub async fn send_frame(&mut self, frame: Frame) {
        self.try_send_frame(frame).await.expect("send to client");
    }

    /// Send raw text as one WebSocket message.
    pub async fn send_text(&mut self, text: &str) {
        self.ws
            .send(Message::Text(text.to_string().into()))
            .await
            .expect("send to client");
    }

    /// A MESSAGE on `/topic/greetings` for `subscription` with `body`.
    pub fn message(subscription: &str, body: impl Into<Vec<u8>>) -> Frame {
        let body = body.into();
        Frame::new(Command::Message)
            .header("destination", "/topic/greetings")
            .header("subscription", subscription)
            .header("message-id", "mock-1")
            .header("content-type", "application/json")
            .header("content-length", body.len().to_string())
            .set_body(body)
    }

    pub async fn greet(&mut self, subscription: &str, content: &str) {
        let body = serde_json::json!({ "content": content }).to_string();
        self.send_frame(Self::message(subscription, body)).await;
    }

    /// Answer the client's DISCONNECT with its RECEIPT.
    pub async fn acknowledge_disconnect(&mut self) -> Frame {
        let disconnect = self.expect_frame(Command::Disconnect).await;
        let receipt = disconnect
            .get_header("receipt")
            .expect("DISCONNECT asks for a receipt")
            .to_string();
        let _ = self
            .try_send_frame(Frame::new(Command::Receipt).header("receipt-id", receipt))
            .await;
        disconnect
    }

    /// Close with a WebSocket close frame.
    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}
