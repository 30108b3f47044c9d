//! Client state machine.
//!
//! The `Client` owns one framed channel to the server, runs the initiator
//! side of the handshake over it, and afterwards turns decrypted messages
//! into [`ClientEvent`]s. It never touches a socket: the caller feeds inbound
//! bytes, drains outbound bytes, and calls [`Client::tick`] periodically.

use std::{fmt, time::Duration};

use bytes::Bytes;
use parley_core::{
    DEFAULT_HANDSHAKE_TIMEOUT, Environment, FramedChannel, HandshakeProgress, Initiator,
    InitiatorState,
};
use parley_crypto::{CipherState, DEFAULT_TRANSFER_LIMIT, NonceParity};
use parley_proto::{Action, DirectorySnapshot, Message, MessageFlags};

use crate::{
    error::{AuthFailure, ClientError},
    event::ClientEvent,
    mirror::DirectoryMirror,
};

/// Default interval between heartbeats once authenticated.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Requested display name
    pub username: String,
    /// Shared server password
    pub password: String,
    /// Window for the handshake to finish
    pub handshake_timeout: Duration,
    /// Send a `PING` after this much outbound silence
    pub heartbeat_interval: Duration,
    /// Plaintext bytes before the session must be renegotiated
    pub transfer_limit: u64,
}

impl ClientConfig {
    /// Defaults with the given credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self { username: username.into(), password: password.into(), ..Self::default() }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            transfer_limit: DEFAULT_TRANSFER_LIMIT,
        }
    }
}

/// Connection status for presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    /// `begin` not called yet
    Idle,
    /// Handshake in progress, with a human-readable step
    Authenticating(&'static str),
    /// Ready for messages
    Authenticated,
    /// Handshake failed or the connection dropped
    Failed(AuthFailure),
    /// Logged out or closed after authenticating
    Closed,
}

impl fmt::Display for ClientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("Not connected"),
            Self::Authenticating(step) => f.write_str(step),
            Self::Authenticated => f.write_str("Connected"),
            Self::Failed(reason) => write!(f, "Failed: {reason}"),
            Self::Closed => f.write_str("Disconnected"),
        }
    }
}

/// Sans-IO chat client.
pub struct Client<E: Environment> {
    /// Environment for randomness and time
    env: E,
    config: ClientConfig,
    channel: FramedChannel,
    handshake: Initiator<E::Instant>,
    /// Our own ID, learned from the first directory refresh
    user_id: Option<u64>,
    directory: DirectoryMirror,
    /// Last time we queued anything, for heartbeats
    last_sent: E::Instant,
    failure: Option<AuthFailure>,
    started: bool,
    closed: bool,
}

impl<E: Environment> Client<E> {
    /// Create a client. Nothing is sent until [`Client::begin`].
    pub fn new(env: E, config: ClientConfig) -> Self {
        let now = env.now();
        let cipher = CipherState::new(NonceParity::Odd).with_transfer_limit(config.transfer_limit);
        let handshake = Initiator::new(
            now,
            config.username.clone(),
            config.password.as_bytes(),
            config.handshake_timeout,
        );

        Self {
            env,
            config,
            channel: FramedChannel::new(cipher),
            handshake,
            user_id: None,
            directory: DirectoryMirror::new(),
            last_sent: now,
            failure: None,
            started: false,
            closed: false,
        }
    }

    /// Queue the client hello. Call once, right after connecting.
    pub fn begin(&mut self) -> Result<(), ClientError> {
        self.handshake.start(&mut self.channel, &self.env)?;
        self.started = true;
        self.last_sent = self.env.now();
        Ok(())
    }

    /// Feed bytes read from the socket.
    pub fn handle_bytes(&mut self, data: &[u8]) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        if self.is_finished() {
            return events;
        }

        self.channel.feed(data);

        if !self.handshake.is_authenticated() {
            match self.handshake.poll(&mut self.channel, &self.env) {
                HandshakeProgress::Pending => return events,
                HandshakeProgress::Failed => {
                    let reason = self.handshake.error().map_or(AuthFailure::Failed, Into::into);
                    self.fail(reason, &mut events);
                    return events;
                },
                HandshakeProgress::Authenticated => events.push(ClientEvent::Authenticated),
            }
        }

        self.drain_messages(&mut events);
        events
    }

    /// The socket closed.
    ///
    /// Before authentication this is a handshake failure. A server that
    /// rejects our credentials simply hangs up, so a close while waiting for
    /// its proof means the password was wrong.
    pub fn handle_disconnect(&mut self) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        if self.is_finished() {
            return events;
        }

        if self.handshake.is_authenticated() {
            self.closed = true;
            let reason = AuthFailure::ConnectionLost.to_string();
            events.push(ClientEvent::ServerError { reason });
        } else {
            let reason = match self.handshake.state() {
                InitiatorState::AwaitingServerProof { .. } => AuthFailure::InvalidCredentials,
                _ => AuthFailure::ConnectionLost,
            };
            self.fail(reason, &mut events);
        }
        events
    }

    /// Drive timeouts and heartbeats.
    pub fn tick(&mut self) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        if self.is_finished() || !self.started {
            return events;
        }

        let now = self.env.now();
        if !self.handshake.is_authenticated() {
            if self.handshake.check_timeout(now) {
                self.fail(AuthFailure::Timeout, &mut events);
            }
            return events;
        }

        if now - self.last_sent >= self.config.heartbeat_interval {
            let ping = Message::new(Action::Ping, 0, Vec::new());
            if let Err(err) = self.write(&ping) {
                events.push(ClientEvent::ServerError { reason: err.to_string() });
            }
        }
        events
    }

    /// Send a text message to a user or room.
    pub fn send_message(&mut self, recipient_id: u64, text: &str) -> Result<(), ClientError> {
        self.write(&Message::text(recipient_id, text))
    }

    /// Ask the server to create a room. The new room arrives in the next
    /// directory refresh.
    pub fn create_room(&mut self, name: &str) -> Result<(), ClientError> {
        self.write(&Message::new(Action::CreateRoom, 0, name.as_bytes()))
    }

    /// Join an existing room.
    pub fn join_room(&mut self, room_id: u64) -> Result<(), ClientError> {
        self.write(&Message::new(Action::JoinRoom, room_id, Vec::new()))
    }

    /// Leave a room.
    pub fn leave_room(&mut self, room_id: u64) -> Result<(), ClientError> {
        self.write(&Message::new(Action::LeaveRoom, room_id, Vec::new()))
    }

    /// Queue a logout. The session is closed afterwards; flush
    /// [`Client::take_outbound`] before dropping the socket.
    pub fn logout(&mut self) -> Result<(), ClientError> {
        self.write(&Message::new(Action::Logout, 0, Vec::new()))?;
        self.closed = true;
        Ok(())
    }

    /// Bytes to write to the socket, if any.
    pub fn take_outbound(&mut self) -> Option<Bytes> {
        self.channel.take_outbound()
    }

    /// Current status.
    pub fn status(&self) -> ClientStatus {
        if let Some(reason) = self.failure {
            ClientStatus::Failed(reason)
        } else if self.closed {
            ClientStatus::Closed
        } else if self.handshake.is_authenticated() {
            ClientStatus::Authenticated
        } else if self.started {
            ClientStatus::Authenticating(self.handshake.status_text())
        } else {
            ClientStatus::Idle
        }
    }

    /// Mirror of the server directory.
    pub fn directory(&self) -> &DirectoryMirror {
        &self.directory
    }

    /// Our user ID, once the server has sent a directory refresh.
    pub fn user_id(&self) -> Option<u64> {
        self.user_id
    }

    /// True while the session can send messages.
    pub fn is_authenticated(&self) -> bool {
        self.handshake.is_authenticated() && !self.is_finished()
    }

    /// Client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn is_finished(&self) -> bool {
        self.closed || self.failure.is_some()
    }

    fn fail(&mut self, reason: AuthFailure, events: &mut Vec<ClientEvent>) {
        self.failure = Some(reason);
        events.push(ClientEvent::AuthenticationFailed { reason });
    }

    fn write(&mut self, message: &Message) -> Result<(), ClientError> {
        if self.is_finished() {
            return Err(ClientError::Closed);
        }
        if !self.handshake.is_authenticated() {
            return Err(ClientError::NotAuthenticated);
        }

        let stamped = message.clone().with_send_time(self.env.wall_clock_secs());
        if let Err(err) = self.channel.write(&stamped) {
            if err.requires_reauthentication() {
                self.closed = true;
            }
            return Err(err.into());
        }
        self.last_sent = self.env.now();
        Ok(())
    }

    fn drain_messages(&mut self, events: &mut Vec<ClientEvent>) {
        loop {
            match self.channel.read() {
                Ok(Some(message)) => self.handle_message(message, events),
                Ok(None) => return,
                Err(err) => {
                    self.closed = true;
                    events.push(ClientEvent::ServerError { reason: err.to_string() });
                    return;
                },
            }
        }
    }

    fn handle_message(&mut self, message: Message, events: &mut Vec<ClientEvent>) {
        match message.action {
            Action::Message => events.push(ClientEvent::Message {
                sender_id: message.sender_id,
                recipient_id: message.recipient_id,
                text: String::from_utf8_lossy(&message.data).into_owned(),
                send_time: message.send_time,
            }),
            Action::Logout => events.push(ClientEvent::Logout {
                user_id: message.sender_id,
                render: message.flags.contains(MessageFlags::RENDER),
            }),
            Action::JoinRoom | Action::LeaveRoom => events.push(ClientEvent::RoomMembership {
                room_id: message.recipient_id,
                user_id: message.sender_id,
                joined: message.action == Action::JoinRoom,
            }),
            Action::CacheRefresh => match DirectorySnapshot::from_bytes(&message.data) {
                Ok(snapshot) => {
                    self.user_id = Some(message.recipient_id);
                    let revision = self.directory.replace(snapshot);
                    events.push(ClientEvent::DirectoryRefreshed { revision });
                },
                Err(err) => events.push(ClientEvent::ServerError {
                    reason: format!("bad directory snapshot: {err}"),
                }),
            },
            Action::Error => events.push(ClientEvent::ServerError {
                reason: String::from_utf8_lossy(&message.data).into_owned(),
            }),
            Action::Ping => {
                let pong = Message::new(Action::Pong, message.sender_id, Vec::new());
                if let Err(err) = self.write(&pong) {
                    events.push(ClientEvent::ServerError { reason: err.to_string() });
                }
            },
            // Server never originates these
            Action::Pong | Action::CreateRoom => {},
        }
    }
}
