use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Heart-beat settings carried in the `heart-beat` header (`"cx,cy"`).
///
/// `send_ms` is how often this side promises to send something;
/// `receive_ms` is how often it wants to hear from the peer. Zero disables
/// that direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub send_ms: u32,
    pub receive_ms: u32,
}

impl Heartbeat {
    pub fn new(send_ms: u32, receive_ms: u32) -> Self {
        Self {
            send_ms,
            receive_ms,
        }
    }

    pub fn disabled() -> Self {
        Self::new(0, 0)
    }

    /// Same interval in both directions, saturating at `u32::MAX` ms.
    pub fn from_duration(interval: Duration) -> Self {
        let ms = u32::try_from(interval.as_millis()).unwrap_or(u32::MAX);
        Self::new(ms, ms)
    }

    /// Lenient parse used for headers received from a broker: missing or
    /// unparsable fields count as `0`.
    pub fn from_header(header: &str) -> Self {
        let mut parts = header.split(',');
        let mut field = || {
            parts
                .next()
                .and_then(|s| s.trim().parse::<u32>().ok())
                .unwrap_or(0)
        };
        let send_ms = field();
        let receive_ms = field();
        Self::new(send_ms, receive_ms)
    }

    /// Negotiate against the broker's advertised values.
    ///
    /// Each direction uses the larger of the two relevant values, and is
    /// disabled when either side sent `0`.
    pub fn negotiate(&self, server: Heartbeat) -> Negotiated {
        let pick = |ours: u32, theirs: u32| {
            if ours == 0 || theirs == 0 {
                None
            } else {
                Some(Duration::from_millis(u64::from(ours.max(theirs))))
            }
        };
        Negotiated {
            send: pick(self.send_ms, server.receive_ms),
            receive: pick(self.receive_ms, server.send_ms),
        }
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new(10_000, 10_000)
    }
}

impl fmt::Display for Heartbeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.send_ms, self.receive_ms)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid heart-beat {0:?}: expected \"<send-ms>,<receive-ms>\"")]
pub struct InvalidHeartbeat(pub String);

impl FromStr for Heartbeat {
    type Err = InvalidHeartbeat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidHeartbeat(s.to_string());
        let (send, receive) = s.split_once(',').ok_or_else(invalid)?;
        let send_ms = send.trim().parse().map_err(|_| invalid())?;
        let receive_ms = receive.trim().parse().map_err(|_| invalid())?;
        Ok(Self::new(send_ms, receive_ms))
    }
}

/// Heart-beat intervals in effect for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Negotiated {
    /// How often the client must send when otherwise idle.
    pub send: Option<Duration>,
    /// How often the broker will send; silence for twice this long is a
    /// dead connection.
    pub receive: Option<Duration>,
}
