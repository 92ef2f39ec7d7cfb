use stomp_ws::{BrokerLayout, Greeting, HelloMessage, Session, SessionManager};

/// Result of executing a command
pub enum CommandResult {
    /// Command executed successfully
    Ok,
    /// Command requests exit
    Quit,
    /// Output for the user
    Info(String),
    /// Error executing command
    Error(String),
}

fn current_session(manager: &SessionManager) -> Result<Session, CommandResult> {
    manager
        .session()
        .filter(Session::is_connected)
        .ok_or_else(|| CommandResult::Error(format!("Not connected ({})", manager.state())))
}

/// Print a greeting delivered on `destination`.
pub fn print_greeting(destination: &str, greeting: &Greeting) {
    tracing::debug!(destination, content = %greeting.content, "greeting received");
    println!("[{}] {}", destination, greeting.content);
}

/// Subscribe `session` to `destination`, printing every greeting.
pub fn subscribe_greetings(session: &Session, destination: &str) -> Result<(), String> {
    session
        .subscribe(destination, |dest: &str, g: Greeting| print_greeting(dest, &g))
        .map(|id| tracing::debug!(subscription = %id, destination, "greeting subscription"))
        .map_err(|e| format!("Failed to subscribe to '{}': {}", destination, e))
}

/// Send a hello for `name` to the application's hello handler.
pub fn send_hello(session: &Session, layout: &BrokerLayout, name: &str) -> Result<(), String> {
    let destination = layout.app_destination("hello");
    session
        .send(
            &destination,
            &HelloMessage {
                name: name.to_string(),
            },
        )
        .map_err(|e| format!("Send error: {}", e))
}

/// Parse and execute a command
pub fn execute_command(line: &str, manager: &SessionManager, layout: &BrokerLayout) -> CommandResult {
    let parts: Vec<&str> = line.trim().splitn(3, ' ').collect();
    if parts.is_empty() || parts[0].is_empty() {
        return CommandResult::Ok;
    }

    match parts[0] {
        "quit" | "exit" | "q" => CommandResult::Quit,

        "hello" => {
            if parts.len() < 2 {
                return CommandResult::Error("Usage: hello <name>".to_string());
            }
            let name = parts[1..].join(" ");
            let session = match current_session(manager) {
                Ok(s) => s,
                Err(e) => return e,
            };
            match send_hello(&session, layout, &name) {
                Ok(()) => CommandResult::Ok,
                Err(e) => CommandResult::Error(e),
            }
        }

        "send" => {
            if parts.len() < 3 {
                return CommandResult::Error("Usage: send <destination> <json>".to_string());
            }
            let payload: serde_json::Value = match serde_json::from_str(parts[2]) {
                Ok(v) => v,
                Err(e) => return CommandResult::Error(format!("Invalid JSON: {}", e)),
            };
            let session = match current_session(manager) {
                Ok(s) => s,
                Err(e) => return e,
            };
            match session.send(parts[1], &payload) {
                Ok(()) => CommandResult::Ok,
                Err(e) => CommandResult::Error(format!("Send error: {}", e)),
            }
        }

        "sub" | "subscribe" => {
            if parts.len() < 2 {
                return CommandResult::Error("Usage: sub <destination>".to_string());
            }
            let session = match current_session(manager) {
                Ok(s) => s,
                Err(e) => return e,
            };
            match subscribe_greetings(&session, parts[1]) {
                Ok(()) => CommandResult::Info(format!("Subscribed to: {}", parts[1])),
                Err(e) => CommandResult::Error(e),
            }
        }

        "unsub" | "unsubscribe" => {
            if parts.len() < 2 {
                return CommandResult::Error("Usage: unsub <subscription-id>".to_string());
            }
            let session = match current_session(manager) {
                Ok(s) => s,
                Err(e) => return e,
            };
            match session
                .subscriptions()
                .into_iter()
                .find(|(id, dest)| id.to_string() == parts[1] || dest == parts[1])
            {
                Some((id, dest)) => {
                    session.unsubscribe(id);
                    CommandResult::Info(format!("Unsubscribed {} ({})", id, dest))
                }
                None => CommandResult::Error(format!("No subscription '{}'", parts[1])),
            }
        }

        "subs" => {
            let subs = manager.session().map(|s| s.subscriptions()).unwrap_or_default();
            if subs.is_empty() {
                return CommandResult::Info("No subscriptions".to_string());
            }
            let lines: Vec<String> = subs
                .iter()
                .map(|(id, dest)| format!("  {}  {}", id, dest))
                .collect();
            CommandResult::Info(lines.join("\n"))
        }

        "status" => {
            let session = manager
                .session()
                .map(|s| format!(", {} (server session {})", s.id(), s.server_session().unwrap_or("-")))
                .unwrap_or_default();
            CommandResult::Info(format!("State: {}{}", manager.state(), session))
        }

        "help" | "?" => {
            print_help();
            CommandResult::Ok
        }

        _ => CommandResult::Error(format!("Unknown command: {}. Type 'help' for commands.", parts[0])),
    }
}

/// Print help text
pub fn print_help() {
    println!("Commands:");
    println!("  hello <name>                  - Send a hello to the greeting service");
    println!("  send <destination> <json>     - Send a JSON payload");
    println!("  sub <destination>             - Subscribe to greetings on a destination");
    println!("  unsub <id|destination>        - Remove a subscription");
    println!("  subs                          - List subscriptions");
    println!("  status                        - Show connection state");
    println!("  quit                          - Exit");
}
