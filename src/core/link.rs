//! Connection links
//!
//! A `Link` is one physical connection to the terminal server. The
//! transport only ever sees Socket.IO packets; Engine.IO framing and
//! heartbeats are handled here.
//!
//! The WebSocket link runs an I/O thread that owns the socket. The thread
//! also resolves the host, connects and performs the upgrade, so opening a
//! link returns at once. Outgoing packets reach it over a channel and
//! incoming packets come back the same way, so the main loop never blocks
//! on the network.

use std::io;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde_json::json;
use tracing::{debug, info, warn};
use tungstenite::client::IntoClientRequest;
use tungstenite::handshake::client::Request;
use tungstenite::http::HeaderValue;
use tungstenite::{Error as WsError, Message, WebSocket};
use url::Url;

use super::packet::{Frame, Packet};
use super::transport::TransportError;

/// How long the I/O thread blocks in a socket read before servicing the
/// outgoing queue
const READ_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Limit for the TCP connect and for each read during the upgrade
const OPEN_TIMEOUT: Duration = Duration::from_secs(10);

/// Parameters for opening a link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    /// Server base URL (`http://`, `https://`, `ws://` or `wss://`)
    pub server: String,
    /// Socket.IO namespace, e.g. `/terminal`
    pub namespace: String,
    /// Bearer credential
    pub token: String,
    /// Working directory requested for the remote shell
    pub initial_cwd: Option<String>,
}

impl ConnectParams {
    /// Build the Engine.IO WebSocket endpoint URL
    pub fn endpoint(&self) -> Result<Url, TransportError> {
        let mut url = Url::parse(&self.server).map_err(|e| TransportError::Url(e.to_string()))?;
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(TransportError::Url(format!("unsupported scheme: {}", other))),
        };
        url.set_scheme(scheme)
            .map_err(|_| TransportError::Url(format!("cannot use scheme {}", scheme)))?;

        let path = format!("{}/socket.io/", url.path().trim_end_matches('/'));
        url.set_path(&path);
        {
            let mut query = url.query_pairs_mut();
            query.clear();
            query.append_pair("EIO", "4");
            query.append_pair("transport", "websocket");
            if let Some(cwd) = &self.initial_cwd {
                query.append_pair("cwd", cwd);
            }
        }
        Ok(url)
    }
}

/// Result of a non-blocking receive
#[derive(Debug, Clone, PartialEq)]
pub enum LinkPoll {
    Packet(Packet),
    Empty,
    /// The link is gone; carries the reason
    Closed(String),
}

/// One physical connection carrying Socket.IO packets
pub trait Link {
    fn send(&mut self, packet: Packet) -> Result<(), TransportError>;
    fn try_recv(&mut self) -> LinkPoll;
    fn close(&mut self);
}

/// Opens links; the seam tests replace with an in-memory pair
pub trait Connector {
    fn open(&mut self, params: &ConnectParams) -> Result<Box<dyn Link>, TransportError>;
}

/// Connector producing WebSocket links
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn open(&mut self, params: &ConnectParams) -> Result<Box<dyn Link>, TransportError> {
        Ok(Box::new(WsLink::open(params)?))
    }
}

/// WebSocket link backed by an I/O thread
pub struct WsLink {
    outgoing: Sender<Packet>,
    incoming: Receiver<LinkPoll>,
    running: Arc<AtomicBool>,
    /// Set once the upgrade has completed
    established: Arc<AtomicBool>,
    io_thread: Option<JoinHandle<()>>,
    closed: bool,
}

impl WsLink {
    /// Validate the endpoint and start the I/O thread.
    ///
    /// Resolving, connecting and the WebSocket upgrade all happen on the
    /// thread; a failure there surfaces as `LinkPoll::Closed`. The
    /// Socket.IO handshake then completes as a `Connect` or `ConnectError`
    /// packet.
    pub fn open(params: &ConnectParams) -> Result<Self, TransportError> {
        let url = params.endpoint()?;
        if url.scheme() == "wss" {
            return Err(TransportError::Url("TLS endpoints are not supported".to_string()));
        }
        info!("Opening link to {}", url);

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::WebSocket(e.to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", params.token))
            .map_err(|e| TransportError::Url(e.to_string()))?;
        request.headers_mut().insert("Authorization", bearer);

        let (out_tx, out_rx) = mpsc::channel::<Packet>();
        let (in_tx, in_rx) = mpsc::channel::<LinkPoll>();
        let running = Arc::new(AtomicBool::new(true));
        let established = Arc::new(AtomicBool::new(false));

        let namespace = params.namespace.clone();
        let auth = json!({ "token": params.token });
        let thread_running = running.clone();
        let thread_established = established.clone();
        let io_thread = thread::spawn(move || {
            let reason = match upgrade(&url, request) {
                Ok(mut socket) if thread_running.load(Ordering::SeqCst) => {
                    thread_established.store(true, Ordering::SeqCst);
                    let reason = run_io(&mut socket, &namespace, auth, &out_rx, &in_tx, &thread_running);
                    let _ = socket.close(None);
                    let _ = socket.flush();
                    reason
                }
                Ok(_) => "io client disconnect".to_string(),
                Err(reason) => {
                    warn!("Could not open {}: {}", url, reason);
                    reason
                }
            };
            thread_running.store(false, Ordering::SeqCst);
            let _ = in_tx.send(LinkPoll::Closed(reason));
        });

        Ok(Self {
            outgoing: out_tx,
            incoming: in_rx,
            running,
            established,
            io_thread: Some(io_thread),
            closed: false,
        })
    }
}

impl Link for WsLink {
    fn send(&mut self, packet: Packet) -> Result<(), TransportError> {
        if self.closed || !self.running.load(Ordering::SeqCst) {
            return Err(TransportError::Closed("link is closed".to_string()));
        }
        self.outgoing
            .send(packet)
            .map_err(|_| TransportError::Closed("I/O thread has exited".to_string()))
    }

    fn try_recv(&mut self) -> LinkPoll {
        if self.closed {
            return LinkPoll::Closed("io client disconnect".to_string());
        }
        match self.incoming.try_recv() {
            Ok(poll) => {
                if matches!(poll, LinkPoll::Closed(_)) {
                    self.closed = true;
                }
                poll
            }
            Err(TryRecvError::Empty) => LinkPoll::Empty,
            Err(TryRecvError::Disconnected) => {
                self.closed = true;
                LinkPoll::Closed("transport close".to_string())
            }
        }
    }

    fn close(&mut self) {
        self.closed = true;
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.io_thread.take() {
            // A thread still connecting is left to finish on its own
            if self.established.load(Ordering::SeqCst) {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for WsLink {
    fn drop(&mut self) {
        self.close();
    }
}

/// Resolve, connect and perform the WebSocket upgrade
fn upgrade(url: &Url, request: Request) -> Result<WebSocket<TcpStream>, String> {
    let addrs = url
        .socket_addrs(|| None)
        .map_err(|e| format!("cannot resolve {}: {}", url, e))?;

    let mut last_error = format!("no address for {}", url);
    for addr in addrs {
        let stream = match TcpStream::connect_timeout(&addr, OPEN_TIMEOUT) {
            Ok(stream) => stream,
            Err(e) => {
                debug!("Connect to {} failed: {}", addr, e);
                last_error = format!("cannot reach {}: {}", addr, e);
                continue;
            }
        };
        stream
            .set_read_timeout(Some(OPEN_TIMEOUT))
            .map_err(|e| format!("transport error: {}", e))?;

        let (socket, _response) =
            tungstenite::client(request, stream).map_err(|e| format!("upgrade failed: {}", e))?;
        socket
            .get_ref()
            .set_read_timeout(Some(READ_POLL_INTERVAL))
            .map_err(|e| format!("transport error: {}", e))?;
        return Ok(socket);
    }
    Err(last_error)
}

/// I/O thread body. Returns the close reason.
fn run_io(
    socket: &mut WebSocket<TcpStream>,
    namespace: &str,
    auth: serde_json::Value,
    outgoing: &Receiver<Packet>,
    incoming: &Sender<LinkPoll>,
    running: &AtomicBool,
) -> String {
    let mut auth = Some(auth);

    loop {
        // Queued packets (a final DISCONNECT included) go out before stopping
        let stopping = !running.load(Ordering::SeqCst);

        loop {
            match outgoing.try_recv() {
                Ok(packet) => {
                    let text = Frame::Message(packet).encode();
                    debug!("-> {}", text);
                    if let Err(e) = socket.send(Message::text(text)) {
                        return format!("transport error: {}", e);
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return "io client disconnect".to_string(),
            }
        }

        if stopping {
            return "io client disconnect".to_string();
        }

        let message = match socket.read() {
            Ok(message) => message,
            Err(WsError::Io(e)) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                continue;
            }
            Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => {
                return "transport close".to_string();
            }
            Err(e) => return format!("transport error: {}", e),
        };

        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => return "transport close".to_string(),
            // Pings are answered by tungstenite on the next write/flush
            _ => continue,
        };
        debug!("<- {}", text.as_str());

        match Frame::decode(text.as_str()) {
            Ok(Frame::Open(info)) => {
                debug!("Engine.IO open: sid={} ping={}ms", info.sid, info.ping_interval);
                if let Some(data) = auth.take() {
                    let connect = Frame::Message(Packet::Connect {
                        namespace: namespace.to_string(),
                        data: Some(data),
                    });
                    if let Err(e) = socket.send(Message::text(connect.encode())) {
                        return format!("transport error: {}", e);
                    }
                }
            }
            Ok(Frame::Ping) => {
                if let Err(e) = socket.send(Message::text(Frame::Pong.encode())) {
                    return format!("transport error: {}", e);
                }
            }
            Ok(Frame::Pong) => {}
            Ok(Frame::Close) => return "transport close".to_string(),
            Ok(Frame::Message(packet)) => {
                if packet.namespace() != namespace {
                    debug!("Ignoring packet for namespace {}", packet.namespace());
                    continue;
                }
                if incoming.send(LinkPoll::Packet(packet)).is_err() {
                    return "io client disconnect".to_string();
                }
            }
            Err(e) => warn!("Skipping malformed frame {:?}: {}", text.as_str(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(server: &str, cwd: Option<&str>) -> ConnectParams {
        ConnectParams {
            server: server.to_string(),
            namespace: "/terminal".to_string(),
            token: "t".to_string(),
            initial_cwd: cwd.map(str::to_string),
        }
    }

    #[test]
    fn test_endpoint_http() {
        let url = params("http://localhost:5000", None).endpoint().unwrap();
        assert_eq!(url.as_str(), "ws://localhost:5000/socket.io/?EIO=4&transport=websocket");
    }

    #[test]
    fn test_endpoint_with_path_and_cwd() {
        let url = params("https://example.com/api/", Some("/home/me/my project"))
            .endpoint()
            .unwrap();
        assert_eq!(
            url.as_str(),
            "wss://example.com/api/socket.io/?EIO=4&transport=websocket&cwd=%2Fhome%2Fme%2Fmy+project"
        );
    }

    #[test]
    fn test_open_rejects_tls_endpoint() {
        assert!(matches!(
            WsLink::open(&params("https://example.com", None)),
            Err(TransportError::Url(_))
        ));
    }

    #[test]
    fn test_unreachable_server_reports_close() {
        // Nothing listens on port 1; the failure arrives through the link
        let mut link = WsLink::open(&params("http://127.0.0.1:1", None)).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        let reason = loop {
            match link.try_recv() {
                LinkPoll::Closed(reason) => break reason,
                LinkPoll::Empty if std::time::Instant::now() < deadline => {
                    thread::sleep(Duration::from_millis(10));
                }
                other => panic!("unexpected poll result: {:?}", other),
            }
        };
        assert!(reason.starts_with("cannot reach"), "reason: {}", reason);
    }

    #[test]
    fn test_endpoint_rejects_unknown_scheme() {
        assert!(matches!(
            params("ftp://example.com", None).endpoint(),
            Err(TransportError::Url(_))
        ));
    }
}
