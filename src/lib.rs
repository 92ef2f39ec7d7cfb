//! STOMP 1.2 over WebSocket: one managed client session with typed JSON
//! subscriptions and automatic reconnection.
//!
//! ```no_run
//! use stomp_ws::{ClientConfig, Greeting, Session, SessionManager};
//!
//! # async fn run() -> Result<(), stomp_ws::ConnectError> {
//! let manager = SessionManager::new(ClientConfig::default());
//! manager
//!     .connect("ws://localhost:8080/gs-guide-websocket", |session: &Session| {
//!         let _ = session.subscribe("/topic/greetings", |_: &str, g: Greeting| {
//!             println!("{}", g.content);
//!         });
//!     })
//!     .await?;
//! // ...
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod frame;
pub mod heartbeat;
pub mod manager;
pub mod parser;
pub mod payload;
pub mod session;
pub mod subscription;
mod transport;

pub use codec::{StompCodec, StompItem};
pub use config::{BrokerLayout, ClientConfig, ReconnectPolicy};
pub use error::{
    ConnectError, DecodeError, EncodeError, NotConnectedError, SendError, ServerError,
    TransportError,
};
pub use frame::{Command, Frame};
pub use heartbeat::{Heartbeat, InvalidHeartbeat, Negotiated};
pub use manager::{SessionManager, SessionManagerBuilder};
pub use payload::{Greeting, HelloMessage};
pub use session::{DispatchOutcome, Session, SessionId, SessionState};
pub use subscription::SubscriptionId;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smoke_frame_display() {
        let f = Frame::new(Command::Connect)
            .header("accept-version", "1.2")
            .set_body(b"hello".to_vec());
        let s = format!("{}", f);
        assert!(s.contains("CONNECT"));
        assert!(s.contains("Body (5 bytes)"));
    }
}
