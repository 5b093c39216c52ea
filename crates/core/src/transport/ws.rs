use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tungstenite::protocol::Role;
use tungstenite::{Message, WebSocket};

use super::assets;
use crate::connection::{Connection, ConnectionId, ConnectionState, Transport, TransportEvent};
use crate::error::{CastError, Result, SendError};
use crate::protocol::{HttpRequest, HttpResponse, UpgradeOutcome, upgrade};

/// Subprotocol name browsers use to ask for the frame stream.
pub const DEFAULT_SUBPROTOCOL: &str = "webcam-stream";

const POLL_STEP: Duration = Duration::from_millis(1);
const REPLY_TIMEOUT: Duration = Duration::from_secs(1);
const READ_CHUNK: usize = 2048;

/// WebSocket transport configuration.
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Directory served for plain HTTP requests. `None` answers them with 404.
    pub assets_dir: Option<PathBuf>,
    /// Document served for directory paths such as `/`.
    pub index_file: String,
    /// Subprotocol echoed back when a client offers it.
    pub subprotocol: String,
    /// A client must finish its HTTP request head within this time.
    pub handshake_timeout: Duration,
    /// Largest accepted HTTP request head.
    pub max_request_bytes: usize,
    /// Concurrent static asset workers; further requests get 503.
    pub max_asset_workers: usize,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            assets_dir: None,
            index_file: "index.html".to_string(),
            subprotocol: DEFAULT_SUBPROTOCOL.to_string(),
            handshake_timeout: Duration::from_secs(5),
            max_request_bytes: 8 * 1024,
            max_asset_workers: 8,
        }
    }
}

/// Non-blocking WebSocket server.
///
/// Everything happens inside [`Transport::service`] on the dispatch
/// thread: accepting TCP clients, buffering their HTTP request heads
/// (the `Connecting` state), upgrading, reading client messages, flushing
/// queued frames and reporting writability.
pub struct WsTransport {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: Arc<WsConfig>,
    pending: Vec<PendingClient>,
    sockets: Vec<Arc<Mutex<WsSocket>>>,
    asset_workers: Arc<AtomicUsize>,
}

impl WsTransport {
    /// Bind the listening socket. Failure here is fatal for startup.
    pub fn bind(addr: &str, config: WsConfig) -> Result<Self> {
        if let Some(dir) = &config.assets_dir
            && !dir.is_dir()
        {
            return Err(CastError::TransportInit(format!(
                "assets directory {} does not exist",
                dir.display()
            )));
        }

        let listener = TcpListener::bind(addr)
            .map_err(|e| CastError::TransportInit(format!("cannot bind {addr}: {e}")))?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        tracing::info!(
            addr = %local_addr,
            assets = ?config.assets_dir,
            subprotocol = %config.subprotocol,
            "WebSocket transport listening"
        );

        Ok(Self {
            listener,
            local_addr,
            config: Arc::new(config),
            pending: Vec::new(),
            sockets: Vec::new(),
            asset_workers: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn accept_clients(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nonblocking(true) {
                        tracing::warn!(%peer, error = %e, "failed to make socket non-blocking");
                        continue;
                    }
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!(%peer, error = %e, "failed to set TCP_NODELAY");
                    }
                    tracing::debug!(%peer, "TCP connection accepted");
                    self.pending.push(PendingClient {
                        stream,
                        peer,
                        head: Vec::new(),
                        since: Instant::now(),
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    tracing::warn!(error = %e, "TCP accept error");
                    return;
                }
            }
        }
    }

    fn advance_handshakes(&mut self, events: &mut Vec<TransportEvent>) {
        let mut i = 0;
        while i < self.pending.len() {
            let client = &mut self.pending[i];
            let status = if client.since.elapsed() > self.config.handshake_timeout {
                HeadStatus::TimedOut
            } else {
                client.read_head(self.config.max_request_bytes)
            };

            match status {
                HeadStatus::Incomplete => i += 1,
                HeadStatus::Complete(len) => {
                    let client = self.pending.swap_remove(i);
                    self.finish_handshake(client, len, events);
                }
                HeadStatus::TooLarge => {
                    let mut client = self.pending.swap_remove(i);
                    tracing::debug!(peer = %client.peer, "request head too large");
                    reply(&mut client.stream, &HttpResponse::request_header_too_large());
                }
                HeadStatus::TimedOut => {
                    let client = self.pending.swap_remove(i);
                    tracing::debug!(peer = %client.peer, "handshake timed out");
                }
                HeadStatus::Gone(reason) => {
                    let client = self.pending.swap_remove(i);
                    tracing::debug!(peer = %client.peer, reason, "client left during handshake");
                }
            }
        }
    }

    fn finish_handshake(
        &mut self,
        client: PendingClient,
        head_len: usize,
        events: &mut Vec<TransportEvent>,
    ) {
        let PendingClient {
            mut stream,
            peer,
            mut head,
            ..
        } = client;
        let leftover = head.split_off(head_len);

        let request = match HttpRequest::parse_bytes(&head) {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!(%peer, error = %e, "malformed request");
                reply(&mut stream, &HttpResponse::bad_request());
                return;
            }
        };

        if !request.is_websocket_upgrade() {
            self.serve_plain(stream, peer, request);
            return;
        }

        match upgrade(&request, &self.config.subprotocol) {
            UpgradeOutcome::Reject(response) => {
                tracing::warn!(%peer, status = response.status_code, "upgrade rejected");
                reply(&mut stream, &response);
            }
            UpgradeOutcome::Accept {
                response,
                subprotocol,
            } => {
                if let Err(e) = write_blocking(&mut stream, &response.serialize()) {
                    tracing::debug!(%peer, error = %e, "failed to complete upgrade");
                    return;
                }

                let id = ConnectionId::next();
                let ws = WebSocket::from_partially_read(stream, leftover, Role::Server, None);
                let socket = Arc::new(Mutex::new(WsSocket {
                    id,
                    peer,
                    ws,
                    state: ConnectionState::Open,
                    writable_requested: false,
                }));
                self.sockets.push(socket.clone());

                tracing::debug!(
                    conn = %id,
                    %peer,
                    path = %request.path(),
                    subprotocol = subprotocol.as_deref().unwrap_or("-"),
                    "WebSocket upgrade complete"
                );
                events.push(TransportEvent::Accepted(Box::new(WsConnection {
                    id,
                    peer,
                    socket,
                })));
            }
        }
    }

    fn serve_plain(&self, mut stream: TcpStream, peer: SocketAddr, request: HttpRequest) {
        let Some(root) = self.config.assets_dir.clone() else {
            tracing::debug!(%peer, path = %request.path(), "no assets configured");
            reply(&mut stream, &HttpResponse::not_found());
            return;
        };

        let Some(worker) = WorkerSlot::claim(&self.asset_workers, self.config.max_asset_workers)
        else {
            tracing::warn!(%peer, path = %request.path(), "asset workers busy");
            reply(&mut stream, &HttpResponse::service_unavailable());
            return;
        };

        let config = self.config.clone();
        let spawned = thread::Builder::new()
            .name("framecast-asset".to_string())
            .spawn(move || {
                let _worker = worker;
                assets::serve(stream, peer, request, &root, &config.index_file);
            });

        if let Err(e) = spawned {
            tracing::warn!(%peer, error = %e, "failed to spawn asset thread");
        }
    }

    fn poll_sockets(&mut self, events: &mut Vec<TransportEvent>) {
        self.sockets.retain(|socket| socket.lock().poll(events));
    }
}

impl Transport for WsTransport {
    fn service(&mut self, timeout: Duration, events: &mut Vec<TransportEvent>) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            self.accept_clients();
            self.advance_handshakes(events);
            self.poll_sockets(events);

            let now = Instant::now();
            if !events.is_empty() || now >= deadline {
                return Ok(());
            }
            thread::sleep(POLL_STEP.min(deadline - now));
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        Some(self.local_addr)
    }

    fn shutdown(&mut self) {
        self.pending.clear();
        for socket in self.sockets.drain(..) {
            socket.lock().close();
        }
        tracing::info!(addr = %self.local_addr, "WebSocket transport stopped");
    }
}

/// One claimed asset worker; released on drop.
struct WorkerSlot(Arc<AtomicUsize>);

impl WorkerSlot {
    fn claim(active: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .ok()
            .map(|_| Self(active.clone()))
    }
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

struct PendingClient {
    stream: TcpStream,
    peer: SocketAddr,
    head: Vec<u8>,
    since: Instant,
}

enum HeadStatus {
    Incomplete,
    /// Head complete; value is its length including the blank line.
    Complete(usize),
    TooLarge,
    TimedOut,
    Gone(&'static str),
}

impl PendingClient {
    fn read_head(&mut self, max: usize) -> HeadStatus {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return HeadStatus::Gone("eof"),
                Ok(n) => {
                    let scan_from = self.head.len().saturating_sub(3);
                    self.head.extend_from_slice(&chunk[..n]);
                    if let Some(end) = find_head_end(&self.head, scan_from) {
                        if end > max {
                            return HeadStatus::TooLarge;
                        }
                        return HeadStatus::Complete(end);
                    }
                    if self.head.len() > max {
                        return HeadStatus::TooLarge;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return HeadStatus::Incomplete,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => return HeadStatus::Gone("read error"),
            }
        }
    }
}

fn find_head_end(buf: &[u8], from: usize) -> Option<usize> {
    buf[from..]
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| from + pos + 4)
}

/// Write a short response on a non-blocking socket, waiting up to
/// [`REPLY_TIMEOUT`] for it to drain.
fn write_blocking(stream: &mut TcpStream, bytes: &[u8]) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_write_timeout(Some(REPLY_TIMEOUT))?;
    stream.write_all(bytes)?;
    stream.set_write_timeout(None)?;
    stream.set_nonblocking(true)
}

fn reply(stream: &mut TcpStream, response: &HttpResponse) {
    if let Err(e) = write_blocking(stream, &response.serialize()) {
        tracing::trace!(error = %e, "failed to send HTTP reply");
    }
}

/// Transport-side state of one upgraded client.
struct WsSocket {
    id: ConnectionId,
    peer: SocketAddr,
    ws: WebSocket<TcpStream>,
    state: ConnectionState,
    writable_requested: bool,
}

impl WsSocket {
    /// Drive I/O for this socket. Returns `false` once it should be dropped.
    fn poll(&mut self, events: &mut Vec<TransportEvent>) -> bool {
        if self.state == ConnectionState::Closed {
            return false;
        }

        loop {
            match self.ws.read() {
                Ok(msg @ (Message::Text(_) | Message::Binary(_))) => {
                    events.push(TransportEvent::DataReceived(self.id, msg.into_data()));
                }
                // Ping, pong and close frames are answered by tungstenite.
                Ok(_) => {}
                Err(tungstenite::Error::Io(e)) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return self.lost(events, &e),
            }
        }

        match self.ws.flush() {
            Ok(()) => {
                if self.writable_requested {
                    self.writable_requested = false;
                    events.push(TransportEvent::Writable(self.id));
                }
                true
            }
            Err(tungstenite::Error::Io(e)) if e.kind() == io::ErrorKind::WouldBlock => true,
            Err(e) => self.lost(events, &e),
        }
    }

    fn lost(&mut self, events: &mut Vec<TransportEvent>, error: &tungstenite::Error) -> bool {
        self.state = ConnectionState::Closed;
        match error {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                tracing::debug!(conn = %self.id, peer = %self.peer, "WebSocket closed by peer");
            }
            e => tracing::debug!(conn = %self.id, peer = %self.peer, error = %e, "WebSocket failed"),
        }
        events.push(TransportEvent::Closed(self.id));
        false
    }

    fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.state = ConnectionState::Closed;
        if let Err(e) = self.ws.close(None).and_then(|()| self.ws.flush()) {
            tracing::trace!(conn = %self.id, error = %e, "close frame not delivered");
        }
    }
}

/// Map a write/flush error; `None` means the data is buffered and will be
/// flushed on a later poll.
fn send_error(error: tungstenite::Error) -> Option<SendError> {
    match error {
        tungstenite::Error::Io(e) if e.kind() == io::ErrorKind::WouldBlock => None,
        tungstenite::Error::Io(e) => Some(SendError::Io(e)),
        tungstenite::Error::WriteBufferFull(_) => Some(SendError::Backpressure),
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            Some(SendError::Closed)
        }
        e => Some(SendError::Protocol(e.to_string())),
    }
}

/// Handle to an upgraded WebSocket client.
///
/// The socket itself stays owned by [`WsTransport`]; the handle and the
/// transport share it, and only the dispatch thread ever touches either.
pub struct WsConnection {
    id: ConnectionId,
    peer: SocketAddr,
    socket: Arc<Mutex<WsSocket>>,
}

impl Connection for WsConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        Some(self.peer)
    }

    fn send(&mut self, payload: &Bytes) -> std::result::Result<(), SendError> {
        let mut socket = self.socket.lock();
        if socket.state != ConnectionState::Open {
            return Err(SendError::Closed);
        }

        if let Err(e) = socket.ws.write(Message::Binary(payload.clone()))
            && let Some(err) = send_error(e)
        {
            return Err(err);
        }
        match socket.ws.flush() {
            Ok(()) => Ok(()),
            Err(e) => send_error(e).map_or(Ok(()), Err),
        }
    }

    fn request_writable(&mut self) {
        self.socket.lock().writable_requested = true;
    }

    fn close(&mut self) {
        self.socket.lock().close();
    }
}
