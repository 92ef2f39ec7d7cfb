//! Client configuration: connection settings, reconnect policy and the
//! broker's destination layout.

use std::time::Duration;

use crate::heartbeat::Heartbeat;

/// When and how often to retry after a transport error.
///
/// Attempt `n` (1-based) waits `initial_delay * multiplier^(n-1)`, capped at
/// `max_delay`. `max_attempts: None` retries forever.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: u32,
    pub max_attempts: Option<u32>,
}

impl ReconnectPolicy {
    /// Retry at once, forever.
    pub fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1,
            max_attempts: None,
        }
    }

    /// Doubling backoff from `initial` up to `max`, forever.
    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Self {
            initial_delay: initial,
            max_delay: max,
            multiplier: 2,
            max_attempts: None,
        }
    }

    /// Give up after `attempts` consecutive failures.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt <= max)
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::exponential(Duration::from_secs(1), Duration::from_secs(30))
    }
}

/// Settings used by `SessionManager` for every connect attempt.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Upper bound for opening the WebSocket and receiving CONNECTED.
    pub connect_timeout: Duration,
    pub heartbeat: Heartbeat,
    pub accept_version: String,
    /// Virtual host for the CONNECT `host` header; defaults to the URI host.
    pub host: Option<String>,
    pub login: Option<String>,
    pub passcode: Option<String>,
    /// Reconnect after a transport error. Deliberate closes never reconnect.
    pub auto_reconnect: bool,
    pub reconnect: ReconnectPolicy,
    /// How long a closing session waits for the broker's RECEIPT.
    pub receipt_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            heartbeat: Heartbeat::default(),
            accept_version: "1.1,1.2".to_string(),
            host: None,
            login: None,
            passcode: None,
            auto_reconnect: true,
            reconnect: ReconnectPolicy::default(),
            receipt_timeout: Duration::from_secs(2),
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn heartbeat(mut self, heartbeat: Heartbeat) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn credentials(mut self, login: impl Into<String>, passcode: impl Into<String>) -> Self {
        self.login = Some(login.into());
        self.passcode = Some(passcode.into());
        self
    }

    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    pub fn reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn receipt_timeout(mut self, timeout: Duration) -> Self {
        self.receipt_timeout = timeout;
        self
    }
}

/// How the broker splits destinations and where its STOMP endpoint lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerLayout {
    /// Prefix of destinations served by the broker's relay (`/topic`).
    pub simple_broker_prefix: String,
    /// Prefix of destinations routed to application handlers (`/app`).
    pub application_prefix: String,
    /// WebSocket endpoint path of the STOMP server.
    pub endpoint: String,
}

impl Default for BrokerLayout {
    fn default() -> Self {
        Self {
            simple_broker_prefix: "/topic".to_string(),
            application_prefix: "/app".to_string(),
            endpoint: "/gs-guide-websocket".to_string(),
        }
    }
}

fn join_path(prefix: &str, path: &str) -> String {
    format!(
        "{}/{}",
        prefix.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

impl BrokerLayout {
    /// Destination for an application handler, e.g. `hello` → `/app/hello`.
    pub fn app_destination(&self, path: &str) -> String {
        join_path(&self.application_prefix, path)
    }

    /// Broker destination, e.g. `greetings` → `/topic/greetings`.
    pub fn topic(&self, name: &str) -> String {
        join_path(&self.simple_broker_prefix, name)
    }

    /// Full endpoint URI for a server base such as `ws://localhost:8080`.
    pub fn endpoint_uri(&self, base: &str) -> String {
        join_path(base, &self.endpoint)
    }
}
