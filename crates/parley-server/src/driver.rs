//! Server driver.
//!
//! Ties together per-connection sessions (channel + handshake), the session
//! directory, and the router. Pure logic: the runtime feeds it
//! [`ServerEvent`]s and executes the [`ServerAction`]s it returns, so the same
//! driver runs under tokio and under the simulation harness.
//!
//! # Tick
//!
//! Every loop iteration ends with a [`ServerEvent::Tick`], which
//!
//! 1. sweeps timed-out handshakes and dead or idle authenticated sessions,
//! 2. promotes sessions whose handshake completed into the authenticated
//!    partition,
//! 3. sends at most one `CACHE_REFRESH` if anything changed membership since
//!    the last tick.
//!
//! Batching the refresh per tick means a burst of joins produces one
//! broadcast, and the snapshot always reflects every mutation before it.

use std::{collections::BTreeMap, net::SocketAddr, time::Duration};

use bytes::Bytes;
use parley_core::{Environment, HandshakeProgress};
use parley_crypto::DEFAULT_TRANSFER_LIMIT;
use parley_proto::{Action, Message, MessageFlags};

use crate::{
    directory::SessionDirectory,
    router::{self, RouteAction},
    server_error::DriverError,
    session::Session,
};

/// Sender ID stamped on server-originated messages. User and room IDs start
/// at 1, so it never collides.
pub const SERVER_SENDER_ID: u64 = 0;

/// Longest accepted username, in characters.
pub const MAX_USERNAME_CHARS: usize = 32;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Shared password every client must prove knowledge of
    pub password: String,
    /// Window for a new connection to finish its handshake
    pub handshake_timeout: Duration,
    /// Authenticated sessions silent for longer than this are dropped
    pub idle_timeout: Duration,
    /// Plaintext bytes per session before it must re-authenticate
    pub transfer_limit: u64,
    /// Maximum concurrent connections
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            password: String::new(),
            handshake_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(60),
            transfer_limit: DEFAULT_TRANSFER_LIMIT,
            max_connections: 10_000,
        }
    }
}

/// Events that the server driver processes.
///
/// These are produced by the external runtime (simulation or production).
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A new connection was accepted
    ConnectionAccepted {
        /// Runtime-assigned connection handle
        descriptor: u64,
        /// Peer address
        addr: SocketAddr,
    },

    /// Bytes were read from a connection
    BytesReceived {
        /// Connection the bytes came from
        descriptor: u64,
        /// Raw bytes, in stream order
        data: Bytes,
    },

    /// A connection was closed by the peer or failed
    ConnectionClosed {
        /// Connection that was closed
        descriptor: u64,
        /// Reason for closure
        reason: String,
    },

    /// Periodic tick: sweep, promote, refresh
    Tick,
}

/// Actions that the server driver produces.
///
/// These are executed by runtime-specific code (production or simulation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerAction {
    /// Queue bytes on a connection
    Write {
        /// Target connection
        descriptor: u64,
        /// Bytes to write, in order
        data: Bytes,
    },

    /// Close a connection
    Close {
        /// Connection to close
        descriptor: u64,
        /// Reason for closure
        reason: String,
    },

    /// Log a message (for debugging/monitoring)
    Log {
        /// Log level
        level: LogLevel,
        /// Message to log
        message: String,
    },
}

/// Log levels for server actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug information
    Debug,
    /// Informational message
    Info,
    /// Warning
    Warn,
    /// Error
    Error,
}

/// Action-based server driver.
pub struct ServerDriver<E>
where
    E: Environment,
{
    /// Live sessions by user ID
    sessions: BTreeMap<u64, Session<E::Instant>>,
    /// Authoritative users and rooms
    directory: SessionDirectory,
    /// Membership changed since the last refresh broadcast
    refresh_pending: bool,
    /// Environment (time, RNG)
    env: E,
    /// Server configuration
    config: ServerConfig,
}

impl<E> ServerDriver<E>
where
    E: Environment,
{
    /// Create a new server driver.
    pub fn new(env: E, config: ServerConfig) -> Self {
        Self {
            sessions: BTreeMap::new(),
            directory: SessionDirectory::new(),
            refresh_pending: false,
            env,
            config,
        }
    }

    /// Process a server event and return actions to execute.
    ///
    /// Outbound bytes for every session are collected at the end, so one
    /// event yields at most one `Write` per connection.
    pub fn process_event(&mut self, event: ServerEvent) -> Result<Vec<ServerAction>, DriverError> {
        let mut actions = Vec::new();

        match event {
            ServerEvent::ConnectionAccepted { descriptor, addr } => {
                self.handle_connection_accepted(descriptor, addr, &mut actions)?;
            },
            ServerEvent::BytesReceived { descriptor, data } => {
                self.handle_bytes_received(descriptor, &data, &mut actions)?;
            },
            ServerEvent::ConnectionClosed { descriptor, reason } => {
                self.handle_connection_closed(descriptor, &reason, &mut actions);
            },
            ServerEvent::Tick => self.handle_tick(&mut actions)?,
        }

        self.flush(&mut actions);
        Ok(actions)
    }

    /// Close every session. Called once when the runtime stops.
    pub fn shutdown(&mut self) -> Vec<ServerAction> {
        let mut actions = Vec::new();
        self.flush(&mut actions);

        let ids: Vec<u64> = self.sessions.keys().copied().collect();
        for id in ids {
            if let Some(session) = self.sessions.remove(&id) {
                self.directory.remove_user(id);
                actions.push(ServerAction::Close {
                    descriptor: session.descriptor(),
                    reason: "server shutting down".to_string(),
                });
            }
        }
        self.refresh_pending = false;

        actions
    }

    /// Authoritative directory.
    pub fn directory(&self) -> &SessionDirectory {
        &self.directory
    }

    /// Number of open sessions, authenticated or not.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Session for a user ID.
    pub fn session(&self, user_id: u64) -> Option<&Session<E::Instant>> {
        self.sessions.get(&user_id)
    }

    /// Driver configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    fn handle_connection_accepted(
        &mut self,
        descriptor: u64,
        addr: SocketAddr,
        actions: &mut Vec<ServerAction>,
    ) -> Result<(), DriverError> {
        if self.directory.id_for_descriptor(descriptor).is_some() {
            return Err(DriverError::DescriptorInUse(descriptor));
        }

        let conflicts: Vec<u64> = self
            .sessions
            .values()
            .filter(|session| session.addr() == addr)
            .map(Session::id)
            .collect();
        for id in conflicts {
            log(actions, LogLevel::Info, format!("disconnecting {addr} due to address conflict"));
            self.disconnect(id, "address conflict", actions);
        }

        if self.sessions.len() >= self.config.max_connections {
            actions.push(ServerAction::Close {
                descriptor,
                reason: "max connections exceeded".to_string(),
            });
            return Ok(());
        }

        let now = self.env.now();
        let id = self.directory.new_user(descriptor, addr.to_string());
        let session = Session::new(
            id,
            descriptor,
            addr,
            now,
            self.config.password.as_bytes(),
            self.config.handshake_timeout,
            self.config.transfer_limit,
        );
        self.sessions.insert(id, session);

        log(actions, LogLevel::Info, format!("{addr} connected as user {id}"));
        Ok(())
    }

    fn handle_bytes_received(
        &mut self,
        descriptor: u64,
        data: &[u8],
        actions: &mut Vec<ServerAction>,
    ) -> Result<(), DriverError> {
        let id = self
            .directory
            .id_for_descriptor(descriptor)
            .ok_or(DriverError::SessionNotFound(descriptor))?;
        let session = self.sessions.get_mut(&id).ok_or(DriverError::SessionNotFound(descriptor))?;

        session.touch(self.env.now());
        session.channel_mut().feed(data);

        if session.is_promoted() {
            self.drain_messages(id, actions);
        } else {
            self.advance_handshake(id, actions);
        }
        Ok(())
    }

    fn handle_connection_closed(
        &mut self,
        descriptor: u64,
        reason: &str,
        actions: &mut Vec<ServerAction>,
    ) {
        // Already gone if the driver closed it first
        let Some(id) = self.directory.id_for_descriptor(descriptor) else {
            return;
        };
        self.remove_session(id, reason, actions);
    }

    fn handle_tick(&mut self, actions: &mut Vec<ServerAction>) -> Result<(), DriverError> {
        self.sweep(actions);
        self.promote(actions)?;
        if self.refresh_pending {
            self.push_refresh(actions)?;
        }
        Ok(())
    }

    /// Feed buffered handshake frames. Promotion waits for the next tick.
    fn advance_handshake(&mut self, id: u64, actions: &mut Vec<ServerAction>) {
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };

        let (handshake, channel) = session.handshake_parts();
        if handshake.poll(channel, &self.env) == HandshakeProgress::Failed {
            let (detail, reason) = handshake
                .error()
                .map_or(("unknown".to_string(), "authentication failed"), |err| {
                    (err.to_string(), err.coarse_reason())
                });
            log(actions, LogLevel::Warn, format!("handshake failed for user {id}: {detail}"));
            self.disconnect(id, reason, actions);
        }
    }

    /// Decrypt and route every complete frame buffered for a promoted
    /// session.
    fn drain_messages(&mut self, id: u64, actions: &mut Vec<ServerAction>) {
        loop {
            let Some(session) = self.sessions.get_mut(&id) else {
                return;
            };
            if !session.is_live() {
                return;
            }

            match session.channel_mut().read() {
                Ok(Some(message)) => self.dispatch(id, message, actions),
                Ok(None) => return,
                Err(err) => {
                    log(actions, LogLevel::Warn, format!("dropping user {id}: {err}"));
                    self.disconnect(id, "channel error", actions);
                    return;
                },
            }
        }
    }

    fn dispatch(&mut self, sender: u64, message: Message, actions: &mut Vec<ServerAction>) {
        let action = message.action;
        let now_secs = self.env.wall_clock_secs();

        let route_actions = match router::route(&mut self.directory, sender, message, now_secs) {
            Ok(route_actions) => route_actions,
            Err(err) => {
                log(actions, LogLevel::Debug, format!("dropped {action:?} from {sender}: {err}"));
                return;
            },
        };

        for route_action in route_actions {
            match route_action {
                RouteAction::Deliver { recipient, message } => {
                    self.deliver(recipient, &message, actions);
                },
                RouteAction::Disconnect { user_id } => {
                    self.disconnect(user_id, "logout", actions);
                },
                RouteAction::DirectoryChanged => self.refresh_pending = true,
            }
        }
    }

    /// Encrypt onto a session's channel. A failed write marks the session
    /// dead; the next sweep removes it.
    fn deliver(&mut self, recipient: u64, message: &Message, actions: &mut Vec<ServerAction>) {
        let Some(session) = self.sessions.get_mut(&recipient) else {
            return;
        };
        if let Err(err) = session.channel_mut().write(message) {
            session.mark_dead();
            log(actions, LogLevel::Warn, format!("delivery to user {recipient} failed: {err}"));
        }
    }

    /// Send one message per authenticated user, addressed to that user.
    fn broadcast(
        &mut self,
        sender: u64,
        action: Action,
        data: &[u8],
        flags: MessageFlags,
        actions: &mut Vec<ServerAction>,
    ) -> usize {
        let now_secs = self.env.wall_clock_secs();
        let recipients: Vec<u64> = self.directory.authenticated_ids().collect();

        for &recipient in &recipients {
            let message = Message::new(action, recipient, data.to_vec())
                .with_sender(sender)
                .with_send_time(now_secs)
                .with_flags(flags);
            self.deliver(recipient, &message, actions);
        }
        recipients.len()
    }

    /// Remove a session and close its connection.
    fn disconnect(&mut self, id: u64, reason: &str, actions: &mut Vec<ServerAction>) {
        if let Some(descriptor) = self.remove_session(id, reason, actions) {
            actions.push(ServerAction::Close { descriptor, reason: reason.to_string() });
        }
    }

    /// Remove a session from the map and the directory. Authenticated users
    /// get a `LOGOUT` broadcast and a pending refresh. Returns the
    /// descriptor if a session was removed.
    fn remove_session(
        &mut self,
        id: u64,
        reason: &str,
        actions: &mut Vec<ServerAction>,
    ) -> Option<u64> {
        let session = self.sessions.remove(&id)?;
        let removed = self.directory.remove_user(id);

        let addr = session.addr();
        log(actions, LogLevel::Info, format!("disconnecting {addr} (user {id}): {reason}"));

        if removed.is_some_and(|user| user.was_authenticated) {
            self.broadcast(id, Action::Logout, &[], MessageFlags::RENDER, actions);
            self.refresh_pending = true;
        }
        Some(session.descriptor())
    }

    fn sweep(&mut self, actions: &mut Vec<ServerAction>) {
        let now = self.env.now();
        let idle_timeout = self.config.idle_timeout;

        let mut stale = Vec::new();
        for (id, session) in &mut self.sessions {
            let reason = if session.is_promoted() {
                if !session.is_live() {
                    Some("connection lost")
                } else if session.idle_for(now) > idle_timeout {
                    Some("idle timeout")
                } else {
                    None
                }
            } else if session.check_handshake_timeout(now) {
                Some("handshake timeout")
            } else if !session.is_live() || session.handshake().error().is_some() {
                Some("handshake failed")
            } else {
                None
            };

            if let Some(reason) = reason {
                stale.push((*id, reason));
            }
        }

        if !stale.is_empty() {
            log(actions, LogLevel::Debug, format!("sweeping {} sessions", stale.len()));
        }
        for (id, reason) in stale {
            self.disconnect(id, reason, actions);
        }
    }

    fn promote(&mut self, actions: &mut Vec<ServerAction>) -> Result<(), DriverError> {
        let ready: Vec<u64> = self
            .sessions
            .values()
            .filter(|session| !session.is_promoted() && session.handshake().is_authenticated())
            .map(Session::id)
            .collect();

        for id in ready {
            let Some(session) = self.sessions.get_mut(&id) else {
                continue;
            };
            let name = display_name(session.handshake().username(), session.addr());
            session.set_promoted();

            self.directory.authenticate(id)?;
            self.directory.rename(id, name.clone())?;
            self.refresh_pending = true;
            log(actions, LogLevel::Info, format!("user {id} authenticated as {name}"));

            // Frames the client pipelined behind its credentials
            self.drain_messages(id, actions);
        }
        Ok(())
    }

    fn push_refresh(&mut self, actions: &mut Vec<ServerAction>) -> Result<(), DriverError> {
        let data = self.directory.to_snapshot().to_bytes()?;
        self.refresh_pending = false;

        let sent = self.broadcast(
            SERVER_SENDER_ID,
            Action::CacheRefresh,
            &data,
            MessageFlags::NONE,
            actions,
        );
        log(actions, LogLevel::Debug, format!("directory refresh sent to {sent} users"));
        Ok(())
    }

    fn flush(&mut self, actions: &mut Vec<ServerAction>) {
        for session in self.sessions.values_mut() {
            let descriptor = session.descriptor();
            if let Some(data) = session.channel_mut().take_outbound() {
                actions.push(ServerAction::Write { descriptor, data });
            }
        }
    }
}

fn log(actions: &mut Vec<ServerAction>, level: LogLevel, message: String) {
    actions.push(ServerAction::Log { level, message });
}

/// Requested username if usable, else the peer address.
fn display_name(requested: Option<&str>, addr: SocketAddr) -> String {
    let trimmed = requested.map(str::trim).unwrap_or_default();
    let valid = !trimmed.is_empty()
        && trimmed.chars().count() <= MAX_USERNAME_CHARS
        && !trimmed.chars().any(char::is_control);

    if valid { trimmed.to_string() } else { addr.to_string() }
}
