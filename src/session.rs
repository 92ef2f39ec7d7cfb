use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

use crate::codec::StompItem;
use crate::error::{NotConnectedError, SendError};
use crate::frame::{Command, Frame};
use crate::payload;
use crate::subscription::{Registry, SubscriptionId, typed_handler};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque handle identifying one STOMP session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub(crate) fn next() -> Self {
        SessionId(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Lifecycle state of a session (and of the manager that owns it).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Closing => "closing",
        })
    }
}

/// What `Session::dispatch` did with a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// This many handlers received the decoded payload.
    Delivered(usize),
    /// Matching subscriptions existed but none could decode the body.
    Undecodable,
    /// No registered subscription matched.
    NoSubscriber,
    /// The session is not connected; the frame was discarded.
    Inactive,
    /// Only MESSAGE frames are dispatched.
    NotAMessage,
}

struct SessionInner {
    state: SessionState,
    registry: Registry,
}

/// One logical STOMP connection and its subscriptions.
///
/// `Session` is a cheap handle: clones share the same state. All
/// operations are synchronous; outgoing frames are queued for the
/// connection task that owns the transport. The subscription registry and
/// state live behind a single lock so `dispatch` never races
/// `subscribe`/`unsubscribe`/`close`.
#[derive(Clone)]
pub struct Session {
    id: SessionId,
    server_session: Option<String>,
    version: Option<String>,
    inner: Arc<Mutex<SessionInner>>,
    outbound: mpsc::UnboundedSender<StompItem>,
    sub_id_counter: Arc<AtomicU64>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("server_session", &self.server_session)
            .field("state", &self.state())
            .finish()
    }
}

impl Session {
    /// A freshly handshaken session, already `Connected`.
    pub(crate) fn new(
        server_session: Option<String>,
        version: Option<String>,
        outbound: mpsc::UnboundedSender<StompItem>,
    ) -> Self {
        Self {
            id: SessionId::next(),
            server_session,
            version,
            inner: Arc::new(Mutex::new(SessionInner {
                state: SessionState::Connected,
                registry: Registry::default(),
            })),
            outbound,
            sub_id_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn not_connected(&self, state: SessionState) -> NotConnectedError {
        NotConnectedError {
            session: self.id,
            state,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The `session` header from CONNECTED, if the broker sent one.
    pub fn server_session(&self) -> Option<&str> {
        self.server_session.as_deref()
    }

    /// Negotiated protocol version from CONNECTED.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Registered subscriptions as `(id, destination)`, in registration order.
    pub fn subscriptions(&self) -> Vec<(SubscriptionId, String)> {
        self.lock().registry.snapshot()
    }

    /// Subscribe to `destination`, decoding every message as `T`.
    ///
    /// `handler` receives the destination and the decoded payload. Messages
    /// whose body does not decode as `T` are logged and dropped without
    /// reaching the handler.
    pub fn subscribe<T, F>(
        &self,
        destination: &str,
        handler: F,
    ) -> Result<SubscriptionId, NotConnectedError>
    where
        T: DeserializeOwned + 'static,
        F: Fn(&str, T) + Send + Sync + 'static,
    {
        let mut inner = self.lock();
        if inner.state != SessionState::Connected {
            return Err(self.not_connected(inner.state));
        }

        let id = SubscriptionId(self.sub_id_counter.fetch_add(1, Ordering::SeqCst));
        let frame = Frame::new(Command::Subscribe)
            .header("id", id.to_string())
            .header("destination", destination)
            .header("ack", "auto");
        if self.outbound.send(StompItem::Frame(frame)).is_err() {
            return Err(self.not_connected(SessionState::Disconnected));
        }

        inner.registry.insert(
            id,
            destination.to_string(),
            typed_handler::<T, F>(destination.to_string(), handler),
        );
        tracing::info!(session = %self.id, subscription = %id, destination, "subscribed");
        Ok(id)
    }

    /// Remove a subscription. Unknown or already-removed ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut inner = self.lock();
        let Some(entry) = inner.registry.remove(id) else {
            return;
        };
        tracing::info!(session = %self.id, subscription = %id, destination = %entry.destination, "unsubscribed");
        if inner.state == SessionState::Connected {
            let frame = Frame::new(Command::Unsubscribe).header("id", entry.wire_id);
            let _ = self.outbound.send(StompItem::Frame(frame));
        }
    }

    /// Unsubscribe every registered subscription.
    pub fn unsubscribe_all(&self) {
        for (id, _) in self.subscriptions() {
            self.unsubscribe(id);
        }
    }

    /// Send `payload` as JSON to `destination`.
    pub fn send<T: Serialize>(&self, destination: &str, payload: &T) -> Result<(), SendError> {
        let frame = payload::encode(destination, payload)?;
        let inner = self.lock();
        if inner.state != SessionState::Connected {
            return Err(self.not_connected(inner.state).into());
        }
        self.outbound
            .send(StompItem::Frame(frame))
            .map_err(|_| self.not_connected(SessionState::Disconnected))?;
        Ok(())
    }

    /// Deliver an inbound MESSAGE frame to matching subscriptions.
    ///
    /// Handlers are invoked outside the lock, so a handler may itself
    /// subscribe, unsubscribe or close the session. Each subscription is
    /// checked again just before its handler runs: one removed (or a
    /// session closed) by an earlier handler or another thread is skipped.
    /// Decode failures are logged and the frame is dropped for that
    /// subscription; the session stays connected.
    pub fn dispatch(&self, frame: &Frame) -> DispatchOutcome {
        if frame.command != Command::Message {
            return DispatchOutcome::NotAMessage;
        }
        let handlers = {
            let inner = self.lock();
            if inner.state != SessionState::Connected {
                tracing::debug!(session = %self.id, state = %inner.state, "discarding message on inactive session");
                return DispatchOutcome::Inactive;
            }
            inner.registry.matching(frame)
        };
        if handlers.is_empty() {
            tracing::debug!(session = %self.id, destination = ?frame.destination(), "no subscription for message");
            return DispatchOutcome::NoSubscriber;
        }

        let mut delivered = 0;
        let mut invoked = 0;
        for (id, handler) in handlers {
            {
                let inner = self.lock();
                if inner.state != SessionState::Connected {
                    tracing::debug!(session = %self.id, state = %inner.state, "session left Connected during dispatch");
                    break;
                }
                if !inner.registry.contains(id) {
                    tracing::debug!(session = %self.id, subscription = %id, "subscription removed during dispatch");
                    continue;
                }
            }
            invoked += 1;
            match handler(frame) {
                Ok(()) => delivered += 1,
                Err(e) => tracing::warn!(
                    session = %self.id,
                    subscription = %id,
                    destination = ?frame.destination(),
                    error = %e,
                    "dropping message that does not decode"
                ),
            }
        }
        if delivered > 0 {
            DispatchOutcome::Delivered(delivered)
        } else if invoked > 0 {
            DispatchOutcome::Undecodable
        } else if self.state() == SessionState::Connected {
            DispatchOutcome::NoSubscriber
        } else {
            DispatchOutcome::Inactive
        }
    }

    /// Close the session: stop deliveries, clear subscriptions and ask the
    /// broker to disconnect. Does nothing unless the session is connected.
    pub fn close(&self) {
        let mut inner = self.lock();
        if inner.state != SessionState::Connected {
            return;
        }
        inner.state = SessionState::Closing;
        inner.registry.clear();
        let disconnect = Frame::new(Command::Disconnect).receipt(format!("close-{}", self.id));
        if self.outbound.send(StompItem::Frame(disconnect)).is_err() {
            tracing::debug!(session = %self.id, "transport already gone; skipping DISCONNECT");
        }
        tracing::info!(session = %self.id, "session closing");
    }

    /// Tear down after the transport ended, deliberately or not.
    pub(crate) fn mark_disconnected(&self) {
        let mut inner = self.lock();
        inner.state = SessionState::Disconnected;
        let dropped = inner.registry.clear();
        if !dropped.is_empty() {
            tracing::debug!(session = %self.id, count = dropped.len(), "subscriptions discarded");
        }
    }
}
