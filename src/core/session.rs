//! Session management
//!
//! A terminal session ties one transport to one scrollback. Transport
//! handlers only queue `SessionEvent`s; `process_events` applies them in
//! arrival order on the main loop and settles a pending connect.

use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::link::{Connector, WsConnector};
use super::output::OutputProcessor;
use super::transport::{events, ConnectionStatus, Handshake, Transport, TransportError};
use crate::history::{CommandHistory, HistoryDirection};

/// Prefix marking error lines in the scrollback
pub const ERROR_MARKER: &str = "[error]";

/// Handshake timeout when none is configured
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Disconnect reason reported for a local `disconnect`
const CLIENT_DISCONNECT: &str = "io client disconnect";

/// Events queued by transport handlers
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Handshake acknowledged
    Connected,
    /// Output chunk from the remote shell
    Output(String),
    /// Error text from the server
    Error(String),
    /// System information fields
    Info(BTreeMap<String, String>),
    /// New working directory reported by the prompt
    Prompt(String),
    /// Connection ended, with reason
    Disconnected(String),
}

/// Connection settings for a session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub token: Option<String>,
    pub initial_cwd: Option<String>,
    pub connect_timeout: Option<Duration>,
    /// Event names carrying shell output
    pub output_events: Vec<String>,
    pub scrollback_limit: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            token: None,
            initial_cwd: None,
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            output_events: vec![
                "output".to_string(),
                "terminal_output".to_string(),
                "outputMessage".to_string(),
            ],
            scrollback_limit: super::output::MAX_LINES,
        }
    }
}

/// Client-side view of the connection
#[derive(Debug, Clone, Default)]
pub struct ConnectionState {
    pub is_connected: bool,
    pub current_working_directory: String,
    pub history: CommandHistory,
    pub system_info: BTreeMap<String, String>,
}

/// A connect waiting for the server's acknowledgement
struct PendingConnect {
    handshake: Handshake,
    started: Instant,
}

/// A terminal session against one server
pub struct TerminalSession<C: Connector = WsConnector> {
    transport: Transport<C>,
    output: OutputProcessor,
    state: ConnectionState,
    options: SessionOptions,
    /// Last known terminal size, re-sent after each connect
    size: Option<(u16, u16)>,
    pending: Option<PendingConnect>,
    /// Whether any connect has succeeded yet
    was_connected: bool,
    events_tx: Sender<SessionEvent>,
    events_rx: Receiver<SessionEvent>,
}

impl<C: Connector> TerminalSession<C> {
    pub fn new(transport: Transport<C>, options: SessionOptions) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        let state = ConnectionState {
            current_working_directory: options.initial_cwd.clone().unwrap_or_default(),
            ..ConnectionState::default()
        };
        Self {
            transport,
            output: OutputProcessor::with_limit(options.scrollback_limit),
            state,
            options,
            size: None,
            pending: None,
            was_connected: false,
            events_tx,
            events_rx,
        }
    }

    pub fn output(&self) -> &OutputProcessor {
        &self.output
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn status(&self) -> ConnectionStatus {
        self.transport.status()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn server(&self) -> &str {
        self.transport.server()
    }

    /// Feed a chunk into the scrollback
    pub fn append_output(&mut self, text: &str) {
        self.output.append_output(text);
    }

    pub fn clear_output(&mut self) {
        self.output.clear_output();
    }

    /// Start connecting. The handshake settles in `process_events`, which
    /// reports the outcome in the scrollback.
    ///
    /// Does nothing while connected or connecting. Errors raised before
    /// anything is opened (a missing token, a bad address) are reported and
    /// returned here.
    pub fn connect_terminal(&mut self) -> Result<(), TransportError> {
        if self.transport.status() != ConnectionStatus::Disconnected {
            debug!("connect_terminal() while {}; nothing to do", self.transport.status());
            return Ok(());
        }

        self.clear_output();
        self.register_handlers();

        let token = self.options.token.clone().unwrap_or_default();
        let cwd = self.options.initial_cwd.clone();

        match self.transport.connect(&token, cwd.as_deref()) {
            Ok(handshake) => {
                self.pending = Some(PendingConnect {
                    handshake,
                    started: Instant::now(),
                });
                Ok(())
            }
            Err(e) => {
                self.connect_failed(&e);
                Err(e)
            }
        }
    }

    /// Close the remote shell and drop the connection
    pub fn disconnect_terminal(&mut self) {
        self.pending = None;
        if self.transport.is_connected() {
            self.transport.close_session();
        }
        self.transport.disconnect();
        self.apply_events();
        self.state.is_connected = false;
        self.append_output("Disconnected from terminal server.");
    }

    /// Run a command line on the server
    pub fn execute_command(&mut self, command: &str) {
        let command = command.trim();
        if command.is_empty() {
            return;
        }
        self.state.history.add(command);
        self.state.history.reset_index();

        let new_cwd = cd_target(command, &self.state.current_working_directory);
        self.transport.exec_command(command, new_cwd.as_deref());
    }

    /// Keystrokes for an interactive program
    pub fn send_input(&mut self, text: &str) {
        self.transport.send_input(text);
    }

    pub fn resize_terminal(&mut self, cols: u16, rows: u16) {
        self.size = Some((cols, rows));
        if self.transport.is_connected() {
            self.transport.resize(cols, rows);
        }
    }

    /// Record the working directory and tell the server about it
    pub fn set_working_directory(&mut self, path: &str) {
        self.state.current_working_directory = path.to_string();
        self.transport.set_working_directory(path);
    }

    pub fn browse_history(&mut self, direction: HistoryDirection) -> Option<String> {
        self.state.history.browse(direction).map(str::to_string)
    }

    pub fn reset_history_index(&mut self) {
        self.state.history.reset_index();
    }

    /// Pump the transport, apply queued events and settle a pending
    /// connect; true if anything happened
    pub fn process_events(&mut self) -> bool {
        let polled = self.transport.poll();
        let applied = self.apply_events();
        let settled = self.settle_pending();
        polled > 0 || applied > 0 || settled
    }

    /// Resolve a pending connect once its handshake settles or times out
    fn settle_pending(&mut self) -> bool {
        let Some(pending) = self.pending.as_mut() else {
            return false;
        };

        let result = match pending.handshake.try_result() {
            Some(result) => result,
            None => match self.options.connect_timeout {
                Some(limit) if pending.started.elapsed() >= limit => {
                    warn!("Handshake timed out after {:?}", limit);
                    self.transport.disconnect();
                    Err(TransportError::Timeout)
                }
                _ => return false,
            },
        };
        self.pending = None;

        match result {
            Ok(()) => self.connect_succeeded(),
            Err(e) => self.connect_failed(&e),
        }
        true
    }

    fn connect_succeeded(&mut self) {
        if let Some((cols, rows)) = self.size {
            self.transport.resize(cols, rows);
        }
        // The server starts a fresh shell in the initial directory
        if self.was_connected && !self.state.current_working_directory.is_empty() {
            let cwd = self.state.current_working_directory.clone();
            self.set_working_directory(&cwd);
        }
        self.was_connected = true;
    }

    fn connect_failed(&mut self, e: &TransportError) {
        error!("Failed to connect to {}: {}", self.transport.server(), e);
        self.state.is_connected = false;
        self.append_error(&format!("Connection failed: {}", e));
    }

    fn register_handlers(&mut self) {
        let tx = self.events_tx.clone();
        self.transport.on(events::CONNECT, move |_| {
            let _ = tx.send(SessionEvent::Connected);
        });

        let tx = self.events_tx.clone();
        self.transport.on(events::DISCONNECT, move |reason| {
            let _ = tx.send(SessionEvent::Disconnected(payload_text(reason)));
        });

        for name in &self.options.output_events {
            let tx = self.events_tx.clone();
            self.transport.on(name, move |payload| {
                let _ = tx.send(SessionEvent::Output(payload_text(payload)));
            });
        }

        let tx = self.events_tx.clone();
        self.transport.on("error", move |payload| {
            let _ = tx.send(SessionEvent::Error(payload_text(payload)));
        });

        let tx = self.events_tx.clone();
        self.transport.on("outputInfo", move |payload| {
            let _ = tx.send(SessionEvent::Info(info_fields(payload)));
        });

        let tx = self.events_tx.clone();
        self.transport.on("prompt", move |payload| {
            if let Some(cwd) = payload.get("cwd").and_then(Value::as_str) {
                let _ = tx.send(SessionEvent::Prompt(cwd.to_string()));
            }
        });
    }

    fn apply_events(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            applied += 1;
            match event {
                SessionEvent::Connected => {
                    info!("Connected to {}", self.transport.server());
                    self.state.is_connected = true;
                    self.append_output("Connected to terminal server.");
                }
                SessionEvent::Output(text) => self.append_output(&text),
                SessionEvent::Error(text) => self.append_error(&text),
                SessionEvent::Info(fields) => {
                    if !fields.is_empty() {
                        let summary = fields
                            .iter()
                            .map(|(k, v)| format!("{}: {}", k, v))
                            .collect::<Vec<_>>()
                            .join(", ");
                        self.append_output(&format!("System info - {}", summary));
                    }
                    self.state.system_info = fields;
                }
                SessionEvent::Prompt(cwd) => {
                    self.state.current_working_directory = cwd;
                }
                SessionEvent::Disconnected(reason) => {
                    self.state.is_connected = false;
                    if reason == CLIENT_DISCONNECT {
                        // disconnect_terminal reports this itself
                        debug!("Disconnected by client");
                    } else {
                        warn!("Connection lost: {}", reason);
                        self.append_error(&format!("Disconnected: {}", reason));
                    }
                }
            }
        }
        applied
    }

    fn append_error(&mut self, message: &str) {
        self.output.append_output(&format!("{} {}", ERROR_MARKER, message));
    }
}

/// Text carried by an event payload
fn payload_text(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Object(map) => ["output", "data", "message", "error"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str))
            .map(str::to_string)
            .unwrap_or_else(|| payload.to_string()),
        other => other.to_string(),
    }
}

fn info_fields(payload: &Value) -> BTreeMap<String, String> {
    match payload {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| {
                let text = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), text)
            })
            .collect(),
        _ => BTreeMap::new(),
    }
}

/// Directory a `cd` command moves to, resolved against `cwd`.
///
/// Returns `None` for anything that is not a plain `cd <path>` or that the
/// server has to expand itself (`~`, `-`, variables).
fn cd_target(command: &str, cwd: &str) -> Option<String> {
    let mut parts = command.split_whitespace();
    if parts.next()? != "cd" {
        return None;
    }
    let target = parts.next()?;
    if parts.next().is_some() || target.starts_with('~') || target == "-" || target.contains('$') {
        return None;
    }

    let joined = if target.starts_with('/') {
        target.to_string()
    } else {
        if cwd.is_empty() {
            return None;
        }
        format!("{}/{}", cwd.trim_end_matches('/'), target)
    };

    let mut stack: Vec<&str> = Vec::new();
    for segment in joined.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            other => stack.push(other),
        }
    }
    Some(format!("/{}", stack.join("/")))
}
