//! `SessionManager`: owns the connect → subscribe → dispatch → reconnect
//! cycle for a single STOMP-over-WebSocket session.
//!
//! `connect` performs the handshake on the caller's task and then hands the
//! transport to a background driver task. The driver dispatches inbound
//! frames in arrival order, writes queued outbound frames, keeps
//! heart-beats, and on a transport error tears the session down and runs
//! the reconnect loop. `shutdown` cancels the driver and waits for it, so no
//! handler runs once it returns.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_util::sync::CancellationToken;

use crate::codec::StompItem;
use crate::config::ClientConfig;
use crate::error::{ConnectError, ServerError, TransportError};
use crate::frame::{Command, Frame};
use crate::heartbeat::{Heartbeat, Negotiated};
use crate::session::{Session, SessionState};
use crate::transport::{FrameSink, FrameStream, StompTransport, authority_of, await_receipt};

/// Called with every newly connected session, including after a reconnect.
/// This is where the application subscribes.
pub type ConnectedHook = Arc<dyn Fn(&Session) + Send + Sync>;

/// Notification of a transport error. The manager has already torn the
/// session down and applied the reconnect policy.
pub type TransportErrorHook = Arc<dyn Fn(&TransportError) + Send + Sync>;

/// State shared between manager handles and the driver task.
struct Shared {
    config: ClientConfig,
    on_transport_error: Option<TransportErrorHook>,
    state_tx: watch::Sender<SessionState>,
    session: Mutex<Option<Session>>,
    cancel: CancellationToken,
}

impl Shared {
    fn set_state(&self, state: SessionState) {
        self.state_tx.send_replace(state);
    }

    fn current_session(&self) -> Option<Session> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the session slot wholesale.
    fn install(&self, session: Option<Session>) {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = session;
    }

    fn notify(&self, err: &TransportError) {
        if let Some(hook) = &self.on_transport_error {
            hook(err);
        }
    }
}

/// Where and how to (re)connect.
struct Target {
    uri: String,
    on_connected: ConnectedHook,
}

/// A handshaken transport and the session built on it.
struct Link {
    transport: StompTransport,
    session: Session,
    outbound: mpsc::UnboundedReceiver<StompItem>,
    heartbeat: Negotiated,
}

enum SessionEnd {
    /// The manager was shut down (or dropped).
    Shutdown,
    /// The session was closed deliberately.
    Closed,
    Failed(TransportError),
}

struct Control {
    driver: Option<JoinHandle<()>>,
    shut_down: bool,
}

struct ManagerInner {
    shared: Arc<Shared>,
    control: tokio::sync::Mutex<Control>,
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        // Last handle gone: make the driver release the transport.
        self.shared.cancel.cancel();
    }
}

/// Owns one STOMP session over WebSocket and its reconnection.
///
/// Cloning yields another handle to the same manager; `shutdown` may be
/// called from any of them, on any task.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

pub struct SessionManagerBuilder {
    config: ClientConfig,
    on_transport_error: Option<TransportErrorHook>,
}

impl SessionManagerBuilder {
    /// Observe transport errors (including failed reconnect attempts).
    pub fn on_transport_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&TransportError) + Send + Sync + 'static,
    {
        self.on_transport_error = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> SessionManager {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        SessionManager {
            inner: Arc::new(ManagerInner {
                shared: Arc::new(Shared {
                    config: self.config,
                    on_transport_error: self.on_transport_error,
                    state_tx,
                    session: Mutex::new(None),
                    cancel: CancellationToken::new(),
                }),
                control: tokio::sync::Mutex::new(Control {
                    driver: None,
                    shut_down: false,
                }),
            }),
        }
    }
}

impl SessionManager {
    pub fn new(config: ClientConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: ClientConfig) -> SessionManagerBuilder {
        SessionManagerBuilder {
            config,
            on_transport_error: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.shared.config
    }

    pub fn state(&self) -> SessionState {
        *self.inner.shared.state_tx.borrow()
    }

    /// Watch lifecycle transitions. Intermediate states may be coalesced.
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.inner.shared.state_tx.subscribe()
    }

    /// The current session, if one is established.
    pub fn session(&self) -> Option<Session> {
        self.inner.shared.current_session()
    }

    /// Open the WebSocket at `uri`, perform the STOMP handshake and run
    /// `on_connected` with the new session.
    ///
    /// Returns once the session is established; the session itself keeps
    /// running in the background. The attempt is bounded by
    /// `ClientConfig::connect_timeout`. A failed initial connect is not
    /// retried. After a later transport error the manager reconnects to
    /// the same `uri` and runs `on_connected` again (subscriptions of the
    /// old session are not carried over).
    pub async fn connect<F>(&self, uri: &str, on_connected: F) -> Result<(), ConnectError>
    where
        F: Fn(&Session) + Send + Sync + 'static,
    {
        let mut control = self.inner.control.lock().await;
        if control.shut_down {
            return Err(ConnectError::ShutDown);
        }
        if control.driver.as_ref().is_some_and(|d| !d.is_finished()) {
            return Err(ConnectError::AlreadyActive);
        }

        let shared = self.inner.shared.clone();
        let target = Target {
            uri: uri.to_string(),
            on_connected: Arc::new(on_connected),
        };

        shared.set_state(SessionState::Connecting);
        tracing::info!(uri, "connecting");
        let link = match establish(&shared, &target).await {
            Ok(link) => link,
            Err(e) => {
                shared.set_state(SessionState::Disconnected);
                tracing::warn!(uri, error = %e, "connection failed");
                return Err(e);
            }
        };

        control.driver = Some(tokio::spawn(drive(shared, target, link)));
        Ok(())
    }

    /// Unsubscribe everything, close the session and stop the driver.
    ///
    /// Waits for any in-flight dispatch to finish and for the transport to
    /// be released. Calling it again is a no-op; `connect` fails afterwards.
    pub async fn shutdown(&self) {
        let mut control = self.inner.control.lock().await;
        if control.shut_down {
            return;
        }
        control.shut_down = true;

        let shared = &self.inner.shared;
        if let Some(session) = shared.current_session().filter(Session::is_connected) {
            shared.set_state(SessionState::Closing);
            session.unsubscribe_all();
            session.close();
        }
        shared.cancel.cancel();

        if let Some(driver) = control.driver.take() {
            if let Err(e) = driver.await {
                tracing::warn!(error = %e, "session driver ended abnormally");
            }
        }
        shared.install(None);
        shared.set_state(SessionState::Disconnected);
        tracing::info!("session manager shut down");
    }
}

/// Map a failure seen before CONNECTED onto the connect error taxonomy.
fn handshake_error(err: TransportError) -> ConnectError {
    match err {
        TransportError::Closed(_) => ConnectError::ClosedDuringHandshake,
        TransportError::WebSocket(e) => match *e {
            tungstenite::Error::ConnectionClosed
            | tungstenite::Error::AlreadyClosed
            | tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
                ConnectError::ClosedDuringHandshake
            }
            other => other.into(),
        },
        TransportError::Codec(e) => ConnectError::Protocol(e.to_string()),
        TransportError::Server(e) => ConnectError::Rejected(e),
        other => ConnectError::Protocol(other.to_string()),
    }
}

async fn handshake(config: &ClientConfig, uri: &str) -> Result<Link, ConnectError> {
    let authority = authority_of(uri)?;
    let mut transport = StompTransport::open(uri).await?;

    let mut connect = Frame::new(Command::Connect)
        .header("accept-version", config.accept_version.as_str())
        .header("host", config.host.clone().unwrap_or(authority))
        .header("heart-beat", config.heartbeat.to_string());
    if let Some(login) = &config.login {
        connect = connect.header("login", login.as_str());
    }
    if let Some(passcode) = &config.passcode {
        connect = connect.header("passcode", passcode.as_str());
    }
    transport
        .send(StompItem::Frame(connect))
        .await
        .map_err(handshake_error)?;

    let connected = loop {
        match transport.next_item().await {
            None => return Err(ConnectError::ClosedDuringHandshake),
            Some(Err(e)) => return Err(handshake_error(e)),
            Some(Ok(StompItem::Heartbeat)) => {}
            Some(Ok(StompItem::Frame(f))) => match f.command {
                Command::Connected => break f,
                Command::Error => return Err(ConnectError::Rejected(ServerError::from_frame(&f))),
                other => tracing::debug!(command = %other, "ignoring frame before CONNECTED"),
            },
        }
    };

    let server_hb = Heartbeat::from_header(connected.get_header("heart-beat").unwrap_or("0,0"));
    let heartbeat = config.heartbeat.negotiate(server_hb);
    let (tx, outbound) = mpsc::unbounded_channel();
    let session = Session::new(
        connected.get_header("session").map(str::to_string),
        connected.get_header("version").map(str::to_string),
        tx,
    );
    tracing::info!(
        session = %session.id(),
        server_session = ?session.server_session(),
        version = ?session.version(),
        ?heartbeat,
        "STOMP session established"
    );
    Ok(Link {
        transport,
        session,
        outbound,
        heartbeat,
    })
}

/// Handshake within the connect timeout, publish the session and run the
/// application's connected hook.
async fn establish(shared: &Shared, target: &Target) -> Result<Link, ConnectError> {
    let timeout = shared.config.connect_timeout;
    let link = tokio::time::timeout(timeout, handshake(&shared.config, &target.uri))
        .await
        .map_err(|_| ConnectError::Timeout(timeout))??;
    shared.install(Some(link.session.clone()));
    shared.set_state(SessionState::Connected);
    (target.on_connected)(&link.session);
    Ok(link)
}

/// Tear down after an unexpected loss of the connection.
fn on_transport_error(shared: &Shared, session: &Session, err: &TransportError) {
    session.mark_disconnected();
    shared.install(None);
    shared.set_state(SessionState::Disconnected);
    tracing::warn!(session = %session.id(), error = %err, "transport error; session torn down");
    shared.notify(err);
}

async fn drive(shared: Arc<Shared>, target: Target, mut link: Link) {
    loop {
        let session = link.session.clone();
        match run_session(&shared, link).await {
            SessionEnd::Shutdown => {
                tracing::debug!(session = %session.id(), "driver stopping");
                break;
            }
            SessionEnd::Closed => {
                tracing::info!(session = %session.id(), "session closed");
                break;
            }
            SessionEnd::Failed(err) if session.state() == SessionState::Closing => {
                // Lost while a deliberate close was in flight.
                tracing::debug!(session = %session.id(), error = %err, "connection lost while closing");
                session.mark_disconnected();
                break;
            }
            SessionEnd::Failed(err) => {
                on_transport_error(&shared, &session, &err);
                if !shared.config.auto_reconnect {
                    break;
                }
                match reconnect(&shared, &target).await {
                    Some(next) => link = next,
                    None => break,
                }
            }
        }
    }
    shared.install(None);
    shared.set_state(SessionState::Disconnected);
}

/// Retry `establish` per the reconnect policy until it succeeds, the policy
/// gives up, or the manager is shut down.
async fn reconnect(shared: &Shared, target: &Target) -> Option<Link> {
    let policy = &shared.config.reconnect;
    let mut attempt: u32 = 0;
    loop {
        attempt = attempt.saturating_add(1);
        if !policy.allows(attempt) {
            tracing::warn!(attempts = attempt - 1, uri = %target.uri, "giving up reconnecting");
            return None;
        }

        let delay = policy.delay_for(attempt);
        if !delay.is_zero() {
            tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "waiting before reconnect");
            tokio::select! {
                _ = shared.cancel.cancelled() => return None,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        if shared.cancel.is_cancelled() {
            return None;
        }

        shared.set_state(SessionState::Connecting);
        tracing::info!(attempt, uri = %target.uri, "attempting to reconnect");
        let result = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => return None,
            result = establish(shared, target) => result,
        };
        match result {
            Ok(link) => {
                tracing::info!(attempt, session = %link.session.id(), "reconnected");
                return Some(link);
            }
            Err(source) => {
                shared.set_state(SessionState::Disconnected);
                let err = TransportError::Reconnect { attempt, source };
                tracing::warn!(error = %err, "reconnect failed");
                shared.notify(&err);
            }
        }
    }
}

/// The receipt id of an outgoing DISCONNECT, which ends the session.
fn disconnect_receipt(item: &StompItem) -> Option<String> {
    match item {
        StompItem::Frame(f) if f.command == Command::Disconnect => {
            Some(f.get_header("receipt").unwrap_or_default().to_string())
        }
        _ => None,
    }
}

async fn finish_close(sink: &mut FrameSink, stream: &mut FrameStream, receipt: &str, timeout: Duration) {
    if !receipt.is_empty() && !await_receipt(stream, receipt, timeout).await {
        tracing::debug!(receipt, "no RECEIPT for DISCONNECT; closing anyway");
    }
    sink.close().await;
}

/// Write whatever the session queued before shutdown (UNSUBSCRIBE,
/// DISCONNECT), then close the socket.
async fn flush_on_shutdown(
    sink: &mut FrameSink,
    stream: &mut FrameStream,
    outbound: &mut mpsc::UnboundedReceiver<StompItem>,
    timeout: Duration,
) {
    while let Ok(item) = outbound.try_recv() {
        let receipt = disconnect_receipt(&item);
        if sink.send(item).await.is_err() {
            break;
        }
        if let Some(receipt) = receipt {
            if !receipt.is_empty() && !await_receipt(stream, &receipt, timeout).await {
                tracing::debug!(receipt, "no RECEIPT for DISCONNECT; closing anyway");
            }
            break;
        }
    }
    sink.close().await;
}

/// Pump one established session until it ends.
async fn run_session(shared: &Shared, link: Link) -> SessionEnd {
    let Link {
        transport,
        session,
        mut outbound,
        heartbeat,
    } = link;
    let (mut sink, mut stream) = transport.into_split();
    let receipt_timeout = shared.config.receipt_timeout;

    // Disabled directions still need an interval; their branches never run.
    let idle = Duration::from_secs(86_400);
    let mut send_tick = tokio::time::interval(heartbeat.send.map_or(idle, |d| d / 2));
    let mut watchdog = tokio::time::interval(heartbeat.receive.map_or(idle, |d| d / 2));
    send_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    watchdog.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_sent = Instant::now();
    let mut last_received = Instant::now();

    loop {
        tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => {
                flush_on_shutdown(&mut sink, &mut stream, &mut outbound, receipt_timeout).await;
                session.mark_disconnected();
                return SessionEnd::Shutdown;
            }
            Some(item) = outbound.recv() => {
                let receipt = disconnect_receipt(&item);
                if let Err(e) = sink.send(item).await {
                    if receipt.is_some() {
                        tracing::debug!(session = %session.id(), error = %e, "transport gone before DISCONNECT");
                        session.mark_disconnected();
                        return SessionEnd::Closed;
                    }
                    return SessionEnd::Failed(e);
                }
                last_sent = Instant::now();
                if let Some(receipt) = receipt {
                    shared.set_state(SessionState::Closing);
                    finish_close(&mut sink, &mut stream, &receipt, receipt_timeout).await;
                    session.mark_disconnected();
                    return SessionEnd::Closed;
                }
            }
            item = stream.next_item() => {
                last_received = Instant::now();
                match item {
                    Some(Ok(StompItem::Heartbeat)) => tracing::trace!("heart-beat received"),
                    Some(Ok(StompItem::Frame(frame))) => match frame.command {
                        Command::Message => {
                            let outcome = session.dispatch(&frame);
                            tracing::trace!(?outcome, "message dispatched");
                        }
                        Command::Error => {
                            return SessionEnd::Failed(TransportError::Server(ServerError::from_frame(&frame)));
                        }
                        Command::Receipt => {
                            tracing::debug!(receipt = ?frame.get_header("receipt-id"), "receipt");
                        }
                        other => tracing::debug!(command = %other, "ignoring unexpected frame"),
                    },
                    Some(Err(e)) => return SessionEnd::Failed(e),
                    None => return SessionEnd::Failed(TransportError::Closed(None)),
                }
            }
            _ = send_tick.tick(), if heartbeat.send.is_some() => {
                if heartbeat.send.is_some_and(|every| last_sent.elapsed() >= every) {
                    if let Err(e) = sink.send(StompItem::Heartbeat).await {
                        return SessionEnd::Failed(e);
                    }
                    last_sent = Instant::now();
                }
            }
            _ = watchdog.tick(), if heartbeat.receive.is_some() => {
                if let Some(limit) = heartbeat.receive.map(|d| d * 2) {
                    if last_received.elapsed() > limit {
                        return SessionEnd::Failed(TransportError::HeartbeatTimeout(limit));
                    }
                }
            }
        }
    }
}
