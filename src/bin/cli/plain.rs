use std::io::{self, BufRead, Write};
use stomp_ws::{ConnectError, Session, SessionManager};
use tokio::sync::mpsc;

use super::args::Cli;
use super::commands::{CommandResult, execute_command, print_help, send_hello, subscribe_greetings};
use super::exit_codes;

/// Run the client: connect, subscribe, then read commands until quit or
/// Ctrl-C.
pub async fn run(cli: &Cli) -> Result<(), (String, u8)> {
    let layout = cli.layout();
    let manager = SessionManager::builder(cli.client_config())
        .on_transport_error(|err| eprintln!("\n[TRANSPORT] {}", err))
        .build();

    // Subscriptions are re-issued on every (re)connect.
    let topics = cli.topic.clone();
    let on_connected = move |session: &Session| {
        for topic in &topics {
            match subscribe_greetings(session, topic) {
                Ok(()) => println!("Subscribed to: {}", topic),
                Err(msg) => eprintln!("{}", msg),
            }
        }
    };

    println!("Connecting to {}...", cli.websocket);
    manager
        .connect(&cli.websocket, on_connected)
        .await
        .map_err(|e| format_connect_error(&e, &cli.websocket))?;
    println!("Connected.");

    if let Some(name) = &cli.hello {
        if let Some(session) = manager.session() {
            if let Err(msg) = send_hello(&session, &layout, name) {
                eprintln!("{}", msg);
            }
        }
    }

    // Channel to receive user commands from stdin reader
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<String>(16);

    // Spawn blocking stdin reader
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(l) => {
                    if cmd_tx.blocking_send(l).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    println!();
    print_help();
    println!();

    let mut stdin_open = true;
    loop {
        if stdin_open {
            print!("> ");
            let _ = io::stdout().flush();
        }

        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = cmd_rx.recv(), if stdin_open => line,
        };
        let Some(line) = line else {
            // No terminal attached: keep listening until Ctrl-C.
            stdin_open = false;
            continue;
        };

        match execute_command(&line, &manager, &layout) {
            CommandResult::Ok => {}
            CommandResult::Quit => break,
            CommandResult::Info(msg) => println!("{}", msg),
            CommandResult::Error(msg) => eprintln!("{}", msg),
        }
    }

    println!("Disconnecting...");
    manager.shutdown().await;
    Ok(())
}

/// Format a connect error with user-friendly messaging
pub fn format_connect_error(err: &ConnectError, uri: &str) -> (String, u8) {
    match err {
        ConnectError::Io(io_err) => {
            let message = match io_err.kind() {
                io::ErrorKind::ConnectionRefused => format!("Connection refused: {}", uri),
                io::ErrorKind::TimedOut => format!("Connection timed out: {}", uri),
                _ => format!("Connection failed: {}", io_err),
            };
            (message, exit_codes::NETWORK_ERROR)
        }
        ConnectError::Timeout(after) => (
            format!("Connection timed out after {:?}: {}", after, uri),
            exit_codes::NETWORK_ERROR,
        ),
        ConnectError::WebSocket(e) => (
            format!("WebSocket handshake failed: {}", e),
            exit_codes::NETWORK_ERROR,
        ),
        ConnectError::ClosedDuringHandshake => (
            format!("Connection closed by {} before CONNECTED", uri),
            exit_codes::NETWORK_ERROR,
        ),
        ConnectError::Rejected(server_err) => {
            let mut message = format!("Connection rejected: {}", server_err.message);
            if let Some(body) = &server_err.body {
                message.push_str(&format!(" ({})", body.trim_end()));
            }
            (message, exit_codes::AUTH_ERROR)
        }
        other => (format!("Protocol error: {}", other), exit_codes::PROTOCOL_ERROR),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stomp_ws::{Command, Frame, ServerError};

    #[test]
    fn refused_connection_is_a_network_error() {
        let err = ConnectError::Io(io::Error::from(io::ErrorKind::ConnectionRefused));
        let (msg, code) = format_connect_error(&err, "ws://localhost:1/ep");
        assert_eq!(code, exit_codes::NETWORK_ERROR);
        assert!(msg.contains("refused"));
    }

    #[test]
    fn broker_rejection_is_an_auth_error() {
        let frame = Frame::new(Command::Error)
            .header("message", "bad credentials")
            .set_body(b"denied\n".to_vec());
        let err = ConnectError::Rejected(ServerError::from_frame(&frame));
        let (msg, code) = format_connect_error(&err, "ws://localhost/ep");
        assert_eq!(code, exit_codes::AUTH_ERROR);
        assert_eq!(msg, "Connection rejected: bad credentials (denied)");
    }

    #[test]
    fn invalid_uri_is_a_protocol_error() {
        let err = ConnectError::InvalidUri {
            uri: "http://x".into(),
            reason: "scheme must be ws or wss".into(),
        };
        assert_eq!(format_connect_error(&err, "http://x").1, exit_codes::PROTOCOL_ERROR);
    }
}
