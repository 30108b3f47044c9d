//! Parley chat server.
//!
//! Production server using plain TCP for transport, a single-threaded Tokio
//! event loop, and system time with cryptographic RNG.
//!
//! # Architecture
//!
//! This crate provides production "glue" around the [`ServerDriver`], which
//! follows the Sans-IO pattern: it consumes [`ServerEvent`]s and returns
//! [`ServerAction`]s without touching sockets or clocks. [`Server`] owns the
//! listener and executes those actions.
//!
//! All driver state lives on one task. Per-connection reader and writer tasks
//! only move bytes: readers forward [`ServerEvent::BytesReceived`] over a
//! channel, writers drain a queue of outbound buffers. There are no locks
//! around the directory.
//!
//! # Components
//!
//! - [`ServerDriver`]: Action-based orchestrator (pure logic, no I/O)
//! - [`SessionDirectory`]: Users, rooms, and membership
//! - [`router::route`]: Per-message dispatch rules
//! - [`Server`]: Production runtime that executes driver actions
//! - [`SystemEnv`]: Production environment (real time, crypto RNG)

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod directory;
mod driver;
mod error;
pub mod router;
mod server_error;
mod session;

use std::{collections::HashMap, future::Future, io, net::SocketAddr, time::Duration};

use bytes::{Bytes, BytesMut};
pub use directory::{DirectoryError, RemovedUser, Room, SessionDirectory, UserEntry};
pub use driver::{
    LogLevel, MAX_USERNAME_CHARS, SERVER_SENDER_ID, ServerAction, ServerConfig as DriverConfig,
    ServerDriver, ServerEvent,
};
pub use error::ServerError;
pub use parley_core::SystemEnv;
pub use router::{RouteAction, RouteError};
pub use server_error::DriverError;
pub use session::Session;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::mpsc,
    task::JoinHandle,
    time::MissedTickBehavior,
};

/// Read buffer size per connection.
const READ_CHUNK: usize = 16 * 1024;

/// Pause after a failed accept. Errors like EMFILE repeat immediately
/// until a descriptor frees up.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g., "0.0.0.0:16482")
    pub bind_address: String,
    /// Upper bound between ticks when no I/O arrives
    pub poll_interval: Duration,
    /// Driver configuration (password, timeouts, limits)
    pub driver: DriverConfig,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:16482".to_string(),
            poll_interval: Duration::from_millis(250),
            driver: DriverConfig::default(),
        }
    }
}

/// Runtime side of one accepted connection.
struct ConnectionHandle {
    /// Outbound queue drained by the writer task. Dropping it ends the
    /// writer, which then shuts the socket down.
    outbound: mpsc::UnboundedSender<Bytes>,
    /// Reader task, aborted when the driver closes the connection
    reader: JoinHandle<()>,
}

/// Live connections owned by the event loop.
struct Connections {
    handles: HashMap<u64, ConnectionHandle>,
    next_descriptor: u64,
    /// Cloned into every reader task
    events: mpsc::UnboundedSender<ServerEvent>,
}

impl Connections {
    fn new(events: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self { handles: HashMap::new(), next_descriptor: 1, events }
    }
}

/// Production Parley server.
///
/// Wraps `ServerDriver` with a TCP listener and system environment.
pub struct Server {
    /// The action-based server driver
    driver: ServerDriver<SystemEnv>,
    /// Listening socket
    listener: TcpListener,
    /// Tick period when idle
    poll_interval: Duration,
}

impl Server {
    /// Create and bind a new server.
    pub async fn bind(config: ServerRuntimeConfig) -> Result<Self, ServerError> {
        let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
            ServerError::Config(format!("invalid bind address '{}': {e}", config.bind_address))
        })?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Transport(format!("failed to bind {addr}: {e}")))?;

        tracing::info!("TCP listener bound to {}", addr);

        let driver = ServerDriver::new(SystemEnv::new(), config.driver);
        Ok(Self { driver, listener, poll_interval: config.poll_interval })
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Run the server until the process is killed.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server until `shutdown` resolves, then close every
    /// connection.
    ///
    /// Accept failures are logged and retried; they never end the loop.
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        tracing::info!("Server starting on {}", self.local_addr()?);

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let mut connections = Connections::new(events_tx);

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                () = &mut shutdown => break,

                accepted = self.listener.accept() => {
                    if !self.on_accept(accepted, &mut connections) {
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },

                Some(event) = events_rx.recv() => {
                    self.apply(event, &mut connections.handles);
                    while let Ok(event) = events_rx.try_recv() {
                        self.apply(event, &mut connections.handles);
                    }
                },

                _ = ticker.tick() => {},
            }

            self.apply(ServerEvent::Tick, &mut connections.handles);
        }

        let actions = self.driver.shutdown();
        execute_actions(actions, &mut connections.handles);
        tracing::info!("Server stopped");

        Ok(())
    }

    /// Register an accepted socket with the driver. Returns `false` when
    /// accept failed and the loop should back off.
    fn on_accept(
        &mut self,
        accepted: io::Result<(TcpStream, SocketAddr)>,
        connections: &mut Connections,
    ) -> bool {
        let (stream, addr) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::error!("Accept error: {}", e);
                return false;
            },
        };

        let descriptor = connections.next_descriptor;
        connections.next_descriptor += 1;

        let handle = spawn_connection(descriptor, stream, connections.events.clone());
        connections.handles.insert(descriptor, handle);

        self.apply(ServerEvent::ConnectionAccepted { descriptor, addr }, &mut connections.handles);
        true
    }

    /// Feed one event to the driver and execute what it returns.
    fn apply(&mut self, event: ServerEvent, connections: &mut HashMap<u64, ConnectionHandle>) {
        if let ServerEvent::ConnectionClosed { descriptor, .. } = &event {
            connections.remove(descriptor);
        }

        match self.driver.process_event(event) {
            Ok(actions) => execute_actions(actions, connections),
            Err(DriverError::SessionNotFound(descriptor)) => {
                tracing::debug!("Event for closed connection {}", descriptor);
            },
            Err(e) => tracing::warn!("Event processing error: {}", e),
        }
    }
}

/// Start the reader and writer tasks for a new connection.
fn spawn_connection(
    descriptor: u64,
    stream: TcpStream,
    events: mpsc::UnboundedSender<ServerEvent>,
) -> ConnectionHandle {
    let (read_half, write_half) = stream.into_split();
    let (outbound, outbound_rx) = mpsc::unbounded_channel();

    tokio::spawn(write_loop(descriptor, write_half, outbound_rx));
    let reader = tokio::spawn(read_loop(descriptor, read_half, events));

    ConnectionHandle { outbound, reader }
}

/// Forward socket bytes to the event loop until EOF or error.
async fn read_loop(
    descriptor: u64,
    mut stream: OwnedReadHalf,
    events: mpsc::UnboundedSender<ServerEvent>,
) {
    let mut buf = BytesMut::with_capacity(READ_CHUNK);

    let reason = loop {
        buf.reserve(READ_CHUNK);
        match stream.read_buf(&mut buf).await {
            Ok(0) => break "peer closed".to_string(),
            Ok(_) => {
                let data = buf.split().freeze();
                if events.send(ServerEvent::BytesReceived { descriptor, data }).is_err() {
                    return;
                }
            },
            Err(e) => break e.to_string(),
        }
    };

    let _ = events.send(ServerEvent::ConnectionClosed { descriptor, reason });
}

/// Write queued buffers in order. Ends when the queue is dropped.
async fn write_loop(
    descriptor: u64,
    mut stream: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
) {
    while let Some(data) = outbound.recv().await {
        if let Err(e) = stream.write_all(&data).await {
            tracing::debug!("Write to connection {} failed: {}", descriptor, e);
            return;
        }
    }

    let _ = stream.shutdown().await;
}

/// Execute server actions.
fn execute_actions(actions: Vec<ServerAction>, connections: &mut HashMap<u64, ConnectionHandle>) {
    for action in actions {
        match action {
            ServerAction::Write { descriptor, data } => {
                if let Some(handle) = connections.get(&descriptor) {
                    // Writer gone means the reader will report the close
                    let _ = handle.outbound.send(data);
                } else {
                    tracing::debug!("Write to unknown connection {}", descriptor);
                }
            },

            ServerAction::Close { descriptor, reason } => {
                tracing::debug!("Closing connection {}: {}", descriptor, reason);
                if let Some(handle) = connections.remove(&descriptor) {
                    handle.reader.abort();
                }
            },

            ServerAction::Log { level, message } => match level {
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
        }
    }
}
