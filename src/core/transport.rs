//! Session transport
//!
//! Owns one logical connection to the terminal server and multiplexes named
//! events over it. Listeners live in a registry that survives reconnects;
//! each time a connection is acknowledged the whole registry is attached
//! to it before anything else is dispatched.
//!
//! Everything here runs on the main loop thread. `connect` returns a
//! [`Handshake`] that settles while the loop calls [`Transport::poll`].

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::link::{ConnectParams, Connector, Link, LinkPoll, WsConnector};
use super::packet::{error_message, Packet};

/// Poll interval while waiting for a handshake
const HANDSHAKE_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Outbound event names
pub mod events {
    pub const EXEC: &str = "exec_terminal";
    pub const INPUT: &str = "terminal_input";
    pub const RESIZE: &str = "resize_terminal";
    pub const SET_CWD: &str = "set_cwd";
    pub const CLOSE: &str = "close_terminal";

    pub const CONNECT: &str = "connect";
    pub const CONNECT_ERROR: &str = "connect_error";
    pub const DISCONNECT: &str = "disconnect";
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("No authentication token")]
    MissingToken,

    #[error("Invalid server address: {0}")]
    Url(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Handshake rejected: {0}")]
    Handshake(String),

    #[error("Connection attempt cancelled")]
    Cancelled,

    #[error("Timed out waiting for the server")]
    Timeout,

    #[error("Connection closed: {0}")]
    Closed(String),
}

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// Event handler; receives the first event argument (or `null`)
pub type Handler = Rc<dyn Fn(&Value)>;

/// Named handler slots.
///
/// Each event name holds at most one handler and registering again
/// replaces the previous one. Callers wanting fan-out must multiplex
/// inside their own handler.
#[derive(Default, Clone)]
pub struct ListenerRegistry {
    slots: HashMap<String, Handler>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a handler, returning the one it replaced
    pub fn insert(&mut self, name: &str, handler: Handler) -> Option<Handler> {
        self.slots.insert(name.to_string(), handler)
    }

    pub fn remove(&mut self, name: &str) -> Option<Handler> {
        self.slots.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<Handler> {
        self.slots.get(name).cloned()
    }

    #[allow(dead_code)]
    pub fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.slots.keys().collect();
        names.sort();
        f.debug_struct("ListenerRegistry").field("events", &names).finish()
    }
}

/// Pending result of a `connect` call
pub struct Handshake {
    rx: Receiver<Result<(), TransportError>>,
    settled: Option<Result<(), TransportError>>,
}

impl Handshake {
    fn pending() -> (Sender<Result<(), TransportError>>, Self) {
        let (tx, rx) = mpsc::channel();
        (tx, Self { rx, settled: None })
    }

    fn resolved(result: Result<(), TransportError>) -> Self {
        let (_tx, mut handshake) = Self::pending();
        handshake.settled = Some(result);
        handshake
    }

    /// The outcome, once the transport has settled it
    pub fn try_result(&mut self) -> Option<Result<(), TransportError>> {
        if self.settled.is_none() {
            self.settled = match self.rx.try_recv() {
                Ok(result) => Some(result),
                Err(TryRecvError::Empty) => None,
                // Transport dropped without settling
                Err(TryRecvError::Disconnected) => Some(Err(TransportError::Cancelled)),
            };
        }
        self.settled.clone()
    }

    #[allow(dead_code)]
    pub fn is_settled(&mut self) -> bool {
        self.try_result().is_some()
    }
}

/// A live link plus the handlers attached to it
struct LiveConnection {
    link: Box<dyn Link>,
    attached: HashMap<String, Handler>,
}

/// Event transport to the terminal server
pub struct Transport<C: Connector = WsConnector> {
    connector: C,
    server: String,
    namespace: String,
    status: ConnectionStatus,
    registry: ListenerRegistry,
    connection: Option<LiveConnection>,
    waiters: Vec<Sender<Result<(), TransportError>>>,
}

impl Transport<WsConnector> {
    /// Transport over WebSocket links
    pub fn websocket(server: &str, namespace: &str) -> Self {
        Self::new(WsConnector, server, namespace)
    }
}

impl<C: Connector> Transport<C> {
    pub fn new(connector: C, server: &str, namespace: &str) -> Self {
        Self {
            connector,
            server: server.to_string(),
            namespace: namespace.to_string(),
            status: ConnectionStatus::Disconnected,
            registry: ListenerRegistry::new(),
            connection: None,
            waiters: Vec::new(),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    #[allow(dead_code)]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[allow(dead_code)]
    pub fn registry(&self) -> &ListenerRegistry {
        &self.registry
    }

    /// Start connecting.
    ///
    /// Connected: resolves immediately. Connecting: joins the attempt in
    /// flight. An empty token fails before anything is opened.
    pub fn connect(&mut self, token: &str, initial_cwd: Option<&str>) -> Result<Handshake, TransportError> {
        if token.trim().is_empty() {
            return Err(TransportError::MissingToken);
        }

        match self.status {
            ConnectionStatus::Connected => {
                debug!("connect() while connected; nothing to do");
                return Ok(Handshake::resolved(Ok(())));
            }
            ConnectionStatus::Connecting => {
                let (tx, handshake) = Handshake::pending();
                self.waiters.push(tx);
                return Ok(handshake);
            }
            ConnectionStatus::Disconnected => {}
        }

        let params = ConnectParams {
            server: self.server.clone(),
            namespace: self.namespace.clone(),
            token: token.to_string(),
            initial_cwd: initial_cwd.map(str::to_string),
        };
        let link = self.connector.open(&params)?;
        info!("Connecting to {} (namespace {})", self.server, self.namespace);

        self.connection = Some(LiveConnection {
            link,
            attached: HashMap::new(),
        });
        self.status = ConnectionStatus::Connecting;

        let (tx, handshake) = Handshake::pending();
        self.waiters.push(tx);
        Ok(handshake)
    }

    /// Pump until `handshake` settles or `timeout` elapses.
    ///
    /// Blocks the caller; the interactive front-end settles handshakes from
    /// its own loop instead.
    #[allow(dead_code)]
    pub fn wait(&mut self, handshake: &mut Handshake, timeout: Option<Duration>) -> Result<(), TransportError> {
        let started = Instant::now();
        loop {
            self.poll();
            if let Some(result) = handshake.try_result() {
                return result;
            }
            if let Some(limit) = timeout {
                if started.elapsed() >= limit {
                    warn!("Handshake timed out after {:?}", limit);
                    self.settle(Err(TransportError::Timeout));
                    self.disconnect();
                    return Err(TransportError::Timeout);
                }
            }
            thread::sleep(HANDSHAKE_POLL_INTERVAL);
        }
    }

    /// Tear down the connection. Safe in any state.
    pub fn disconnect(&mut self) {
        let previous = self.status;
        let Some(mut conn) = self.connection.take() else {
            self.status = ConnectionStatus::Disconnected;
            return;
        };

        if previous == ConnectionStatus::Connected {
            let _ = conn.link.send(Packet::Disconnect {
                namespace: self.namespace.clone(),
            });
        }
        conn.link.close();
        self.status = ConnectionStatus::Disconnected;
        info!("Disconnected from {}", self.server);

        match previous {
            ConnectionStatus::Connecting => self.settle(Err(TransportError::Cancelled)),
            ConnectionStatus::Connected => {
                self.dispatch_lifecycle(events::DISCONNECT, &json!("io client disconnect"))
            }
            ConnectionStatus::Disconnected => {}
        }
    }

    /// Register `handler` for `name`, replacing any previous one
    pub fn on<F>(&mut self, name: &str, handler: F)
    where
        F: Fn(&Value) + 'static,
    {
        let handler: Handler = Rc::new(handler);
        if self.registry.insert(name, handler.clone()).is_some() {
            debug!("Replaced handler for '{}'", name);
        }
        if self.status == ConnectionStatus::Connected {
            if let Some(conn) = self.connection.as_mut() {
                conn.attached.insert(name.to_string(), handler);
            }
        }
    }

    #[allow(dead_code)]
    pub fn off(&mut self, name: &str) {
        self.registry.remove(name);
        if let Some(conn) = self.connection.as_mut() {
            conn.attached.remove(name);
        }
    }

    /// Best-effort send; dropped with a warning unless connected
    pub fn emit(&mut self, name: &str, payload: Option<Value>) {
        let conn = match (self.status, self.connection.as_mut()) {
            (ConnectionStatus::Connected, Some(conn)) => conn,
            _ => {
                warn!("Dropping '{}': not connected", name);
                return;
            }
        };
        if let Err(e) = conn.link.send(Packet::event(&self.namespace, name, payload)) {
            warn!("Dropping '{}': {}", name, e);
        }
    }

    pub fn exec_command(&mut self, command: &str, new_cwd: Option<&str>) {
        let mut payload = json!({ "command": command });
        if let Some(cwd) = new_cwd {
            payload["newCwd"] = json!(cwd);
        }
        self.emit(events::EXEC, Some(payload));
    }

    pub fn send_input(&mut self, input: &str) {
        self.emit(events::INPUT, Some(json!({ "input": input })));
    }

    pub fn resize(&mut self, cols: u16, rows: u16) {
        self.emit(events::RESIZE, Some(json!({ "cols": cols, "rows": rows })));
    }

    pub fn set_working_directory(&mut self, path: &str) {
        self.emit(events::SET_CWD, Some(json!({ "cwd": path })));
    }

    pub fn close_session(&mut self) {
        self.emit(events::CLOSE, None);
    }

    /// Process every packet the link has ready; returns how many
    pub fn poll(&mut self) -> usize {
        let mut processed = 0;
        loop {
            let Some(conn) = self.connection.as_mut() else {
                break;
            };
            match conn.link.try_recv() {
                LinkPoll::Empty => break,
                LinkPoll::Closed(reason) => {
                    processed += 1;
                    self.handle_closed(reason);
                    break;
                }
                LinkPoll::Packet(packet) => {
                    processed += 1;
                    self.handle_packet(packet);
                }
            }
        }
        processed
    }

    fn handle_packet(&mut self, packet: Packet) {
        match packet {
            Packet::Connect { data, .. } => {
                if self.status != ConnectionStatus::Connecting {
                    debug!("Ignoring unexpected CONNECT in state {}", self.status);
                    return;
                }
                self.status = ConnectionStatus::Connected;
                if let Some(conn) = self.connection.as_mut() {
                    conn.attached = self.registry.slots.clone();
                }
                info!("Connected; attached {} listener(s)", self.registry.len());
                self.settle(Ok(()));
                self.dispatch_lifecycle(events::CONNECT, &data.unwrap_or(Value::Null));
            }
            Packet::ConnectError { data, .. } => {
                let message = error_message(&data);
                warn!("Connect error: {}", message);
                self.teardown();
                self.settle(Err(TransportError::Handshake(message)));
                self.dispatch_lifecycle(events::CONNECT_ERROR, &data);
            }
            Packet::Disconnect { .. } => {
                self.handle_closed("io server disconnect".to_string());
            }
            Packet::Event { name, args, .. } => {
                let handler = match (self.status, self.connection.as_ref()) {
                    (ConnectionStatus::Connected, Some(conn)) => conn.attached.get(&name).cloned(),
                    _ => None,
                };
                match handler {
                    Some(handler) => {
                        let arg = args.into_iter().next().unwrap_or(Value::Null);
                        handler(&arg);
                    }
                    None => debug!("No listener for '{}'", name),
                }
            }
            Packet::Ack { id, .. } => debug!("Ignoring ack {}", id),
        }
    }

    fn handle_closed(&mut self, reason: String) {
        let previous = self.status;
        self.teardown();
        info!("Link closed ({}) while {}", reason, previous);
        match previous {
            ConnectionStatus::Connecting => {
                self.settle(Err(TransportError::Closed(reason.clone())));
                self.dispatch_lifecycle(events::CONNECT_ERROR, &json!({ "message": reason }));
            }
            ConnectionStatus::Connected => self.dispatch_lifecycle(events::DISCONNECT, &json!(reason)),
            ConnectionStatus::Disconnected => {}
        }
    }

    /// Drop the connection handle; the registry is kept
    fn teardown(&mut self) {
        if let Some(mut conn) = self.connection.take() {
            conn.link.close();
        }
        self.status = ConnectionStatus::Disconnected;
    }

    fn settle(&mut self, result: Result<(), TransportError>) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(result.clone());
        }
    }

    fn dispatch_lifecycle(&self, name: &str, payload: &Value) {
        if let Some(handler) = self.registry.get(name) {
            handler(payload);
        }
    }
}
