//! Listening socket ownership, the accept loop, and dispatch.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::ServerError;
use crate::http::response::send_error_response;
use crate::net::{Connection, ConnectionRegistry};
use crate::routing::RouteTable;
use crate::server::worker::{Worker, WorkerFactory};

/// Listen backlog for the accept socket.
const LISTEN_BACKLOG: u32 = 500;

/// Linger grace period applied to accepted sockets.
const LINGER_GRACE: Duration = Duration::from_secs(15);

/// Pause before retrying accept after fd/buffer exhaustion, giving open
/// connections a chance to finish and release descriptors.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Lifecycle of one server instance. Strictly forward-moving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Created,
    Listening,
    Running,
    Stopping,
    Stopped,
}

struct ServerInner {
    routes: Arc<RouteTable>,
    registry: Arc<ConnectionRegistry>,
    factory: Arc<dyn WorkerFactory>,
    /// Initialization failure reported to the first connection(s), then cleared.
    startup_fault: Mutex<Option<String>>,
    /// Fatal runtime failure (an unrecoverable accept error) that forced
    /// shutdown; readable after `stopped()` returns.
    fault: Mutex<Option<ServerError>>,
    cancel: CancellationToken,
    state: watch::Sender<ServerState>,
    local_addr: OnceLock<SocketAddr>,
}

/// The connection acceptor and dispatcher.
///
/// Owns the listening socket and the registry of accepted connections;
/// everything request-shaped is delegated to the worker factory and the
/// route table.
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Server {
    pub fn new(routes: Arc<RouteTable>, factory: Arc<dyn WorkerFactory>) -> Self {
        let (state, _) = watch::channel(ServerState::Created);
        Self {
            inner: Arc::new(ServerInner {
                routes,
                registry: Arc::new(ConnectionRegistry::new()),
                factory,
                startup_fault: Mutex::new(None),
                fault: Mutex::new(None),
                cancel: CancellationToken::new(),
                state,
                local_addr: OnceLock::new(),
            }),
        }
    }

    /// Record an initialization failure that happened before the server
    /// could accept traffic. It is reported to the first connection(s) as
    /// a synthesized 500 and cleared after being reported once.
    pub fn record_startup_fault(&self, detail: impl Into<String>) {
        *self.inner.startup_fault.lock().unwrap() = Some(detail.into());
    }

    pub fn state(&self) -> ServerState {
        *self.inner.state.borrow()
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.inner.registry
    }

    pub fn routes(&self) -> &Arc<RouteTable> {
        &self.inner.routes
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            inner: self.inner.clone(),
        }
    }

    /// Bind, listen, and launch the accept loop.
    ///
    /// Returns the bound address (useful when `addr` carries port 0).
    /// Must be called within a tokio runtime. Fails with `AlreadyStarted`
    /// if invoked twice.
    pub fn start(&self, addr: SocketAddr) -> Result<SocketAddr, ServerError> {
        let mut claimed = false;
        self.inner.state.send_if_modified(|s| {
            if *s == ServerState::Created {
                *s = ServerState::Listening;
                claimed = true;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(ServerError::AlreadyStarted);
        }

        let listener = match bind_listener(addr) {
            Ok(listener) => listener,
            Err(source) => {
                let _ = self.inner.state.send_replace(ServerState::Created);
                return Err(ServerError::Bind { addr, source });
            }
        };
        let local = listener.local_addr().map_err(|source| {
            let _ = self.inner.state.send_replace(ServerState::Created);
            ServerError::Bind { addr, source }
        })?;
        let _ = self.inner.local_addr.set(local);

        tracing::info!(address = %local, backlog = LISTEN_BACKLOG, "listener bound");
        tokio::spawn(self.inner.clone().accept_loop(listener));
        Ok(local)
    }

    /// Begin shutdown: cancel the accept loop and run the teardown sweep
    /// (close registered connections, unload tenant contexts) on its own
    /// task so the caller is not blocked.
    ///
    /// A second call while already stopping or stopped is a no-op; calling
    /// before `start` is an error.
    pub fn stop(&self) -> Result<(), ServerError> {
        match self.inner.begin_stop() {
            StopOutcome::NotStarted => Err(ServerError::NotStarted),
            StopOutcome::AlreadyStopping | StopOutcome::Begin => Ok(()),
        }
    }

    /// Wait until teardown has finished.
    pub async fn stopped(&self) {
        let mut rx = self.inner.state.subscribe();
        let _ = rx.wait_for(|s| *s == ServerState::Stopped).await;
    }

    /// The fatal failure that forced shutdown, if any. `None` after a
    /// normal `stop()`.
    pub fn take_fault(&self) -> Option<ServerError> {
        self.inner.fault.lock().unwrap().take()
    }
}

enum StopOutcome {
    Begin,
    AlreadyStopping,
    NotStarted,
}

fn bind_listener(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(LISTEN_BACKLOG)
}

/// What the accept loop does after an accept error.
#[derive(Debug, PartialEq, Eq)]
enum AcceptDisposition {
    /// The error was per-connection or momentary; keep accepting.
    Continue,
    /// The listener is unusable; shutdown has been initiated.
    Shutdown,
}

/// Errors raised for one failed connection rather than the listener
/// itself: the aborted handshake variants plus descriptor/buffer
/// exhaustion (EMFILE, ENFILE, ENOBUFS, ENOMEM), which clears as open
/// connections finish.
fn is_transient_accept_error(e: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(
        e.kind(),
        ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionRefused
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
    ) || is_exhaustion_error(e)
}

fn is_exhaustion_error(e: &std::io::Error) -> bool {
    // ENFILE, EMFILE, ENOMEM, ENOBUFS
    matches!(e.raw_os_error(), Some(23 | 24 | 12 | 105))
}

impl ServerInner {
    fn begin_stop(self: &Arc<Self>) -> StopOutcome {
        let mut outcome = StopOutcome::Begin;
        self.state.send_if_modified(|s| match *s {
            ServerState::Created => {
                outcome = StopOutcome::NotStarted;
                false
            }
            ServerState::Stopping | ServerState::Stopped => {
                outcome = StopOutcome::AlreadyStopping;
                false
            }
            _ => {
                *s = ServerState::Stopping;
                outcome = StopOutcome::Begin;
                true
            }
        });

        if matches!(outcome, StopOutcome::Begin) {
            tracing::info!("stopping server");
            self.cancel.cancel();
            let inner = self.clone();
            tokio::spawn(async move {
                inner.registry.shutdown_all().await;
                inner.routes.unload_all();
                let _ = inner.state.send_replace(ServerState::Stopped);
                tracing::info!("server stopped");
            });
        }
        outcome
    }

    /// Classify an accept error. Transient ones leave the loop running
    /// (with a short pause for exhaustion); anything else records the
    /// fault and drives the normal teardown so waiters observe `Stopped`.
    async fn handle_accept_error(self: &Arc<Self>, e: std::io::Error) -> AcceptDisposition {
        if is_transient_accept_error(&e) {
            tracing::warn!(error = %e, "accept failed, retrying");
            if is_exhaustion_error(&e) {
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
            }
            return AcceptDisposition::Continue;
        }

        tracing::error!(error = %e, "accept failed, shutting down");
        *self.fault.lock().unwrap() = Some(ServerError::Accept(e));
        self.begin_stop();
        AcceptDisposition::Shutdown
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        self.state.send_if_modified(|s| {
            if *s == ServerState::Listening {
                *s = ServerState::Running;
                true
            } else {
                false
            }
        });

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = listener.accept() => match result {
                    Ok((stream, peer)) => {
                        // Hand off before the next accept so the listener
                        // is re-armed independent of processing time.
                        self.handle_accepted(stream, peer);
                    }
                    Err(e) => {
                        if self.cancel.is_cancelled() {
                            break;
                        }
                        if self.handle_accept_error(e).await == AcceptDisposition::Shutdown {
                            break;
                        }
                    }
                }
            }
        }
        // Dropping the listener closes the listening socket.
        tracing::debug!("accept loop exited");
    }

    fn handle_accepted(self: &Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        set_socket_options(&stream);
        let conn = Arc::new(Connection::new(Box::new(stream), Some(peer)));
        tracing::debug!(peer_addr = %peer, connection_id = %conn.id(), "connection accepted");

        if !self.registry.add(conn.clone()) {
            // Shutdown has begun; refuse the connection.
            tokio::spawn(async move { conn.close().await });
            return;
        }
        self.dispatch(conn, 0);
    }

    fn dispatch(self: &Arc<Self>, conn: Arc<Connection>, reuse_count: u32) {
        if let Some(detail) = self.startup_fault.lock().unwrap().take() {
            tracing::warn!(connection_id = %conn.id(), detail = %detail, "reporting startup fault");
            let registry = self.registry.clone();
            tokio::spawn(async move {
                send_error_response(&conn, &detail).await;
                conn.close().await;
                registry.remove(conn.id());
            });
            return;
        }

        let handle = ServerHandle {
            inner: self.clone(),
        };
        match self.factory.create(conn.clone(), reuse_count, handle) {
            Ok(worker) => {
                tracing::trace!(
                    connection_id = %conn.id(),
                    suspending = worker.supports_suspension(),
                    "worker dispatched"
                );
                match worker {
                    Worker::Suspending(task) => {
                        tokio::spawn(task);
                    }
                    Worker::Pooled(job) => {
                        tokio::task::spawn_blocking(job);
                    }
                }
            }
            Err(e) => {
                // Best-effort teardown; secondary errors are swallowed
                // inside close().
                tracing::warn!(
                    connection_id = %conn.id(),
                    reuse_count,
                    error = %e,
                    "worker dispatch failed"
                );
                let registry = self.registry.clone();
                tokio::spawn(async move {
                    conn.close().await;
                    registry.remove(conn.id());
                });
            }
        }
    }
}

/// Best-effort socket options for an accepted connection; lack of platform
/// support for an option is not fatal.
fn set_socket_options(stream: &TcpStream) {
    if let Err(e) = stream.set_linger(Some(LINGER_GRACE)) {
        tracing::trace!(error = %e, "set_linger unsupported");
    }
    if let Err(e) = stream.set_nodelay(true) {
        tracing::trace!(error = %e, "set_nodelay unsupported");
    }
}

/// Cloneable handle workers use to act on the server: keep-alive re-entry,
/// connection teardown, and route resolution.
#[derive(Clone)]
pub struct ServerHandle {
    inner: Arc<ServerInner>,
}

impl ServerHandle {
    pub fn routes(&self) -> &Arc<RouteTable> {
        &self.inner.routes
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.inner.registry
    }

    pub fn local_port(&self) -> Option<u16> {
        self.inner.local_addr.get().map(|addr| addr.port())
    }

    /// Re-enter dispatch for a keep-alive connection.
    ///
    /// Increments the connection's reuse count; bind/listen logic never
    /// re-runs and registry membership is preserved.
    pub fn reuse_connection(&self, conn: Arc<Connection>) {
        if self.inner.registry.is_shutting_down() {
            tracing::trace!(connection_id = %conn.id(), "shutdown in progress, not reusing");
            tokio::spawn(async move { conn.close().await });
            return;
        }
        let reuse_count = conn.increment_reuse();
        tracing::trace!(connection_id = %conn.id(), reuse_count, "reusing connection");
        self.inner.dispatch(conn, reuse_count);
    }

    /// Close the connection and drop it from the registry.
    pub async fn finish_connection(&self, conn: &Arc<Connection>) {
        conn.close().await;
        self.inner.registry.remove(conn.id());
    }
}
