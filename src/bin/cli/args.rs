use clap::Parser;
use std::time::Duration;
use stomp_ws::{BrokerLayout, ClientConfig, Heartbeat, ReconnectPolicy};

#[derive(Parser)]
#[command(name = "stomp-ws")]
#[command(version)]
#[command(about = "STOMP over WebSocket client for the greeting service")]
pub struct Cli {
    /// WebSocket URI of the STOMP endpoint
    #[arg(
        short,
        long,
        env = "APP_WEBSOCKET",
        default_value = "ws://localhost:8080/gs-guide-websocket"
    )]
    pub websocket: String,

    /// Destinations to subscribe to on every (re)connect (repeatable or comma separated)
    #[arg(
        short,
        long,
        env = "APP_TOPIC",
        value_delimiter = ',',
        default_value = "/topic/greetings"
    )]
    pub topic: Vec<String>,

    /// Prefix of destinations handled by the application
    #[arg(long, env = "APP_APPLICATION_PREFIX", default_value = "/app")]
    pub app_prefix: String,

    /// Send a hello with this name once connected
    #[arg(long)]
    pub hello: Option<String>,

    /// Login username
    #[arg(short, long)]
    pub login: Option<String>,

    /// Passcode
    #[arg(short, long)]
    pub passcode: Option<String>,

    /// Heartbeat settings (client-send,client-receive in ms)
    #[arg(long, default_value = "10000,10000")]
    pub heartbeat: Heartbeat,

    /// Seconds to wait for the WebSocket and CONNECTED
    #[arg(long, default_value_t = 10)]
    pub connect_timeout: u64,

    /// Do not reconnect after the connection drops
    #[arg(long)]
    pub no_reconnect: bool,

    /// Give up after this many failed reconnect attempts
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Reconnect without backoff
    #[arg(long)]
    pub immediate_retry: bool,
}

impl Cli {
    pub fn client_config(&self) -> ClientConfig {
        let mut policy = if self.immediate_retry {
            ReconnectPolicy::immediate()
        } else {
            ReconnectPolicy::default()
        };
        if let Some(n) = self.max_attempts {
            policy = policy.max_attempts(n);
        }

        let mut config = ClientConfig::new()
            .connect_timeout(Duration::from_secs(self.connect_timeout))
            .heartbeat(self.heartbeat)
            .auto_reconnect(!self.no_reconnect)
            .reconnect_policy(policy);
        config.login = self.login.clone();
        config.passcode = self.passcode.clone();
        config
    }

    pub fn layout(&self) -> BrokerLayout {
        BrokerLayout {
            application_prefix: self.app_prefix.clone(),
            ..BrokerLayout::default()
        }
    }
}
