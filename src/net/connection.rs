//! One accepted connection's state.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Global atomic counter for connection IDs.
/// Relaxed ordering is sufficient since we only need uniqueness.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Byte stream a connection runs over.
///
/// Accepted sockets use `TcpStream`; tests use `tokio::io::duplex` pipes.
pub trait Stream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Stream for T {}

/// An accepted connection.
///
/// Owned by the acceptor side for its entire life; the broker only ever
/// holds a weak association to it. `reuse_count` counts how many
/// keep-alive requests the underlying socket has served beyond the first.
///
/// Close must be able to interrupt a pending read (the shutdown sweep
/// closes connections whose workers are blocked waiting for a request),
/// so every I/O operation races against the close token.
pub struct Connection {
    id: ConnectionId,
    peer_addr: Option<SocketAddr>,
    stream: Mutex<Option<Box<dyn Stream>>>,
    reuse_count: AtomicU32,
    closed: CancellationToken,
}

impl Connection {
    pub fn new(stream: Box<dyn Stream>, peer_addr: Option<SocketAddr>) -> Self {
        Self {
            id: ConnectionId::new(),
            peer_addr,
            stream: Mutex::new(Some(stream)),
            reuse_count: AtomicU32::new(0),
            closed: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn reuse_count(&self) -> u32 {
        self.reuse_count.load(Ordering::Relaxed)
    }

    /// Record one more keep-alive request on this socket; returns the new count.
    pub fn increment_reuse(&self) -> u32 {
        self.reuse_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Read into `buf`, returning the number of bytes read.
    ///
    /// Fails with `NotConnected` once the connection is closed, including
    /// a close that lands while the read is pending.
    pub async fn read(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut guard = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(not_connected()),
            guard = self.stream.lock() => guard,
        };
        let Some(stream) = guard.as_mut() else {
            return Err(not_connected());
        };
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(not_connected()),
            result = stream.read(buf) => result,
        }
    }

    /// Write all of `data` to the peer.
    pub async fn write_all(&self, data: &[u8]) -> std::io::Result<()> {
        let mut guard = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(not_connected()),
            guard = self.stream.lock() => guard,
        };
        let Some(stream) = guard.as_mut() else {
            return Err(not_connected());
        };
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(not_connected()),
            result = stream.write_all(data) => result,
        }
    }

    pub async fn flush(&self) -> std::io::Result<()> {
        let mut guard = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(not_connected()),
            guard = self.stream.lock() => guard,
        };
        let Some(stream) = guard.as_mut() else {
            return Err(not_connected());
        };
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(not_connected()),
            result = stream.flush() => result,
        }
    }

    /// Half-close then close, swallowing errors. Idempotent.
    ///
    /// Cancels any pending I/O first so the stream lock frees promptly.
    pub async fn close(&self) {
        self.closed.cancel();
        let mut guard = self.stream.lock().await;
        if let Some(mut stream) = guard.take() {
            let _ = stream.shutdown().await;
        }
    }
}

fn not_connected() -> std::io::Error {
    std::io::ErrorKind::NotConnected.into()
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("reuse_count", &self.reuse_count.load(Ordering::Relaxed))
            .field("closed", &self.is_closed())
            .finish()
    }
}
