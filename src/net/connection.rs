//! Connection lifecycle and the per-connection read loop.
//!
//! # Responsibilities
//! - Own one secured byte stream, split into a frame reader and a locked writer
//! - Generate unique connection IDs for tracing
//! - Intercept `ping`/`close` control frames before anything else sees them
//! - Hand every other frame to a [`FrameHandler`] in arrival order
//! - Fire the disconnect callback exactly once per connection
//! - Track live connections so shutdown can close them

use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use rustls::pki_types::CertificateDer;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use crate::auth::session::Session;
use crate::net::codec::{FrameCodec, FrameError};
use crate::observability::metrics;
use crate::protocol::Message;

/// Payload of the keepalive control frame.
pub const PING: &[u8] = b"ping";

/// Payload of the graceful-shutdown control frame.
pub const CLOSE: &[u8] = b"close";

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Transport-level control signal carried as a frame payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Ping,
    Close,
}

impl Control {
    /// Match a payload against the reserved sentinels (exact, case-sensitive).
    pub fn from_payload(payload: &[u8]) -> Option<Self> {
        match payload {
            PING => Some(Control::Ping),
            CLOSE => Some(Control::Close),
            _ => None,
        }
    }
}

/// Why a connection stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer ended the stream cleanly.
    PeerClosed,
    /// Peer sent a `close` control frame.
    CloseFrame,
    /// Closed locally (shutdown, failed write, explicit `close()`).
    Local,
    /// Frame handler asked for the connection to be dropped.
    Rejected,
    /// Malformed, oversized or truncated frame.
    ProtocolViolation(&'static str),
    /// Transport read error.
    ReadError,
    /// No frame arrived within the idle timeout.
    IdleTimeout,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::PeerClosed => f.write_str("peer closed"),
            CloseReason::CloseFrame => f.write_str("close frame"),
            CloseReason::Local => f.write_str("closed locally"),
            CloseReason::Rejected => f.write_str("rejected"),
            CloseReason::ProtocolViolation(reason) => write!(f, "protocol violation ({})", reason),
            CloseReason::ReadError => f.write_str("read error"),
            CloseReason::IdleTimeout => f.write_str("idle timeout"),
        }
    }
}

/// Errors surfaced by connection writes.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connection is closed")]
    Closed,

    #[error("write did not complete within {0:?}")]
    WriteTimeout(Duration),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// What the read loop should do after a frame was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Continue,
    Close,
}

/// Consumer of non-control frames.
#[async_trait]
pub trait FrameHandler: Send + Sync {
    async fn handle_frame(&self, conn: &Connection, session: &mut Session, payload: Bytes) -> Disposition;
}

/// Connection lifecycle callbacks.
pub trait ConnectionEvents: Send + Sync {
    fn connected(&self, _conn: &Connection, _session: &Session) {}

    fn disconnected(&self, _conn: &Connection, _session: &Session, _reason: CloseReason) {}
}

/// Callbacks that only log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEvents;

impl ConnectionEvents for LogEvents {
    fn connected(&self, conn: &Connection, _session: &Session) {
        tracing::debug!(
            connection_id = %conn.id(),
            peer_addr = %conn.peer_addr(),
            client_cert = conn.has_peer_certificate(),
            "Client connected"
        );
    }

    fn disconnected(&self, conn: &Connection, session: &Session, reason: CloseReason) {
        tracing::debug!(
            connection_id = %conn.id(),
            user_id = session.user_id().unwrap_or("-"),
            idle_ms = conn.idle_for().as_millis() as u64,
            %reason,
            "Client disconnected"
        );
    }
}

/// Per-connection tunables.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub max_frame_size: usize,
    pub write_timeout: Duration,
    pub idle_timeout: Option<Duration>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            max_frame_size: crate::net::codec::DEFAULT_MAX_FRAME_SIZE,
            write_timeout: Duration::from_secs(10),
            idle_timeout: None,
        }
    }
}

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Read side of a connection, consumed by [`drive`].
pub type FrameReader = FramedRead<BoxedReader, FrameCodec>;

/// One secured client connection.
pub struct Connection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    peer_certificates: Vec<CertificateDer<'static>>,
    writer: Mutex<FramedWrite<BoxedWriter, FrameCodec>>,
    options: ConnectionOptions,
    created_at: Instant,
    /// Milliseconds after `created_at` of the last inbound frame.
    last_activity_ms: AtomicU64,
    cancel: CancellationToken,
}

impl Connection {
    /// Wrap a stream. Returns the shared connection and its frame reader.
    pub fn new<S>(
        stream: S,
        peer_addr: SocketAddr,
        peer_certificates: Vec<CertificateDer<'static>>,
        options: ConnectionOptions,
    ) -> (Arc<Self>, FrameReader)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let reader = FramedRead::new(
            Box::new(read_half) as BoxedReader,
            FrameCodec::new(options.max_frame_size),
        );
        let writer = FramedWrite::new(
            Box::new(write_half) as BoxedWriter,
            FrameCodec::new(options.max_frame_size),
        );

        let conn = Arc::new(Self {
            id: ConnectionId::new(),
            peer_addr,
            peer_certificates,
            writer: Mutex::new(writer),
            options,
            created_at: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        });
        (conn, reader)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Client certificate chain verified during the TLS handshake, leaf first.
    pub fn peer_certificates(&self) -> &[CertificateDer<'static>] {
        &self.peer_certificates
    }

    pub fn has_peer_certificate(&self) -> bool {
        !self.peer_certificates.is_empty()
    }

    /// Refresh the last-activity timestamp.
    pub fn touch(&self) {
        let elapsed = self.created_at.elapsed().as_millis() as u64;
        self.last_activity_ms.store(elapsed, Ordering::Relaxed);
    }

    /// Time since the last inbound frame (or since accept).
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_activity_ms.load(Ordering::Relaxed));
        self.created_at.elapsed().saturating_sub(last)
    }

    /// Close the connection. Pending reads and writes are released; idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token cancelled when the connection closes.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Write one frame. Any failure, including a timeout, closes the connection.
    pub async fn send(&self, payload: Bytes) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }

        let write = async {
            let mut writer = self.writer.lock().await;
            writer.send(payload).await
        };

        let result = tokio::select! {
            _ = self.cancel.cancelled() => Err(ConnectionError::Closed),
            res = tokio::time::timeout(self.options.write_timeout, write) => match res {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(ConnectionError::Frame(e)),
                Err(_) => Err(ConnectionError::WriteTimeout(self.options.write_timeout)),
            },
        };

        if let Err(e) = &result {
            if !matches!(e, ConnectionError::Closed) {
                tracing::warn!(connection_id = %self.id, error = %e, "Write failed, closing connection");
                self.close();
            }
        }
        result
    }

    /// Serialize and write an envelope.
    pub async fn send_message(&self, message: &Message) -> Result<(), ConnectionError> {
        let payload = message.to_vec()?;
        self.send(Bytes::from(payload)).await
    }

    async fn shutdown_writer(&self) {
        let flush = async {
            let mut writer = self.writer.lock().await;
            let _ = writer.close().await;
        };
        let _ = tokio::time::timeout(self.options.write_timeout, flush).await;
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("peer_certificates", &self.peer_certificates.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

enum ReadEvent {
    Frame(Result<Bytes, FrameError>),
    End,
    Cancelled,
    Idle,
}

async fn next_frame(conn: &Connection, reader: &mut FrameReader) -> ReadEvent {
    let read = async {
        match conn.options.idle_timeout {
            Some(idle) => match tokio::time::timeout(idle, reader.next()).await {
                Ok(frame) => frame.map(ReadEvent::Frame).unwrap_or(ReadEvent::End),
                Err(_) => ReadEvent::Idle,
            },
            None => reader
                .next()
                .await
                .map(ReadEvent::Frame)
                .unwrap_or(ReadEvent::End),
        }
    };

    tokio::select! {
        biased;
        _ = conn.cancel.cancelled() => ReadEvent::Cancelled,
        event = read => event,
    }
}

/// Frames buffered while an unauthenticated frame is in flight.
const MAX_PENDING_FRAMES: usize = 32;

/// Run `handler` on an unauthenticated frame while still reading.
///
/// A peer that hangs up mid-handshake closes the connection, so cancellable
/// auth work stops before applying anything. Frames read meanwhile are queued
/// in `pending` for the read loop. Returns the handler's disposition and the
/// hang-up reason, if any.
async fn handle_watching(
    conn: &Connection,
    reader: &mut FrameReader,
    handler: &dyn FrameHandler,
    session: &mut Session,
    payload: Bytes,
    pending: &mut VecDeque<Result<Bytes, FrameError>>,
) -> (Disposition, Option<CloseReason>) {
    let mut handling = handler.handle_frame(conn, session, payload);
    let mut hangup = None;

    loop {
        let watching = hangup.is_none()
            && pending.len() < MAX_PENDING_FRAMES
            && !matches!(pending.back(), Some(Err(_)));

        tokio::select! {
            biased;
            disposition = &mut handling => return (disposition, hangup),
            frame = reader.next(), if watching => match frame {
                Some(Ok(frame)) => pending.push_back(Ok(frame)),
                Some(Err(e)) if e.is_protocol_violation() => pending.push_back(Err(e)),
                Some(Err(e)) => {
                    tracing::debug!(connection_id = %conn.id, error = %e, "Read failed during authentication");
                    hangup = Some(CloseReason::ReadError);
                    conn.close();
                }
                None => {
                    tracing::debug!(connection_id = %conn.id, "Peer hung up during authentication");
                    hangup = Some(CloseReason::PeerClosed);
                    conn.close();
                }
            },
        }
    }
}

/// Run the read loop of one connection until it closes.
///
/// Calls `events.connected` first and `events.disconnected` exactly once at
/// the end, whatever ended the loop.
pub async fn drive(
    conn: Arc<Connection>,
    mut reader: FrameReader,
    mut session: Session,
    handler: Arc<dyn FrameHandler>,
    events: Arc<dyn ConnectionEvents>,
) -> CloseReason {
    events.connected(&conn, &session);

    let mut pending = VecDeque::new();
    let reason = loop {
        let event = match pending.pop_front() {
            Some(frame) => ReadEvent::Frame(frame),
            None => next_frame(&conn, &mut reader).await,
        };
        let payload = match event {
            ReadEvent::Frame(Ok(payload)) => payload,
            ReadEvent::Frame(Err(e)) if e.is_protocol_violation() => {
                tracing::warn!(connection_id = %conn.id, error = %e, "Protocol violation");
                metrics::record_protocol_violation(e.reason());
                break CloseReason::ProtocolViolation(e.reason());
            }
            ReadEvent::Frame(Err(e)) => {
                tracing::debug!(connection_id = %conn.id, error = %e, "Read failed");
                break CloseReason::ReadError;
            }
            ReadEvent::End => break CloseReason::PeerClosed,
            ReadEvent::Cancelled => break CloseReason::Local,
            ReadEvent::Idle => break CloseReason::IdleTimeout,
        };

        conn.touch();

        match Control::from_payload(&payload) {
            Some(Control::Ping) => {
                metrics::record_frame("ping");
                tracing::trace!(connection_id = %conn.id, "Ping");
                continue;
            }
            Some(Control::Close) => {
                metrics::record_frame("close");
                break CloseReason::CloseFrame;
            }
            None => metrics::record_frame("message"),
        }

        let disposition = if session.is_authenticated() {
            handler.handle_frame(&conn, &mut session, payload).await
        } else {
            let (disposition, hangup) =
                handle_watching(&conn, &mut reader, handler.as_ref(), &mut session, payload, &mut pending).await;
            if let Some(reason) = hangup {
                break reason;
            }
            disposition
        };

        if conn.is_closed() {
            break CloseReason::Local;
        }
        if disposition == Disposition::Close {
            break CloseReason::Rejected;
        }
    };

    conn.close();
    drop(reader);
    conn.shutdown_writer().await;
    events.disconnected(&conn, &session, reason);
    reason
}

/// Registry of live connections for shutdown and drain.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    live: Arc<DashMap<ConnectionId, Arc<Connection>>>,
}

impl ConnectionTracker {
    /// Create a new connection tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a live connection. Returns a guard that unregisters on drop.
    pub fn track(&self, conn: Arc<Connection>) -> ConnectionGuard {
        let id = conn.id();
        self.live.insert(id, conn);
        metrics::record_connection_opened(self.live.len());
        ConnectionGuard {
            live: Arc::clone(&self.live),
            id,
        }
    }

    /// Get current active connection count.
    pub fn active_count(&self) -> usize {
        self.live.len()
    }

    /// Close every live connection.
    pub fn close_all(&self) {
        for entry in self.live.iter() {
            entry.value().close();
        }
    }

    /// Wait until all connections are gone. Returns `false` on timeout.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.live.is_empty() {
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        true
    }
}

/// Guard that tracks a connection's lifetime.
#[derive(Debug)]
pub struct ConnectionGuard {
    live: Arc<DashMap<ConnectionId, Arc<Connection>>>,
    id: ConnectionId,
}

impl ConnectionGuard {
    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.live.remove(&self.id);
        metrics::record_connection_closed(self.live.len());
        tracing::trace!(connection_id = %self.id, "Connection untracked");
    }
}
