//! TCP transport for the client.
//!
//! Provides [`ConnectedClient`], which owns a socket and a Sans-IO
//! [`Client`]. This is a thin layer that only moves bytes; protocol logic
//! stays in the state machine.

use std::{collections::VecDeque, net::SocketAddr, time::Duration};

use parley_core::SystemEnv;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

use crate::{
    client::{Client, ClientConfig},
    error::{AuthFailure, ClientError},
    event::ClientEvent,
    mirror::DirectoryMirror,
};

/// How often `tick` runs while waiting on the socket.
const TICK_INTERVAL: Duration = Duration::from_millis(250);

/// Read buffer size.
const READ_CHUNK: usize = 16 * 1024;

/// Authenticated connection to a Parley server.
pub struct ConnectedClient {
    client: Client<SystemEnv>,
    stream: TcpStream,
    /// Events received during the handshake or not yet returned
    pending: VecDeque<ClientEvent>,
    /// Socket reported EOF or an error
    disconnected: bool,
}

impl ConnectedClient {
    /// Connect and run the handshake to completion.
    ///
    /// Failures are coarse on purpose: the caller learns whether the server
    /// was unreachable, rejected the credentials, or timed out, and nothing
    /// else.
    pub async fn authenticate(
        addr: SocketAddr,
        config: ClientConfig,
    ) -> Result<Self, AuthFailure> {
        let stream = TcpStream::connect(addr).await.map_err(|e| {
            tracing::debug!("Connect to {} failed: {}", addr, e);
            AuthFailure::Unreachable
        })?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Could not set TCP_NODELAY: {}", e);
        }

        let mut client = Client::new(SystemEnv::new(), config);
        client.begin().map_err(|_| AuthFailure::Failed)?;

        let mut this = Self { client, stream, pending: VecDeque::new(), disconnected: false };

        loop {
            this.flush().await.map_err(|_| AuthFailure::ConnectionLost)?;

            for event in this.wait_for_events().await {
                match event {
                    ClientEvent::Authenticated => {},
                    ClientEvent::AuthenticationFailed { reason } => return Err(reason),
                    other => this.pending.push_back(other),
                }
            }

            if this.client.is_authenticated() {
                this.flush().await.map_err(|_| AuthFailure::ConnectionLost)?;
                tracing::debug!("Authenticated to {}", addr);
                return Ok(this);
            }
            if this.disconnected {
                return Err(AuthFailure::ConnectionLost);
            }
        }
    }

    /// Send a text message to a user or room.
    pub async fn send_message(&mut self, recipient_id: u64, text: &str) -> Result<(), ClientError> {
        self.client.send_message(recipient_id, text)?;
        self.flush().await
    }

    /// Create a room.
    pub async fn create_room(&mut self, name: &str) -> Result<(), ClientError> {
        self.client.create_room(name)?;
        self.flush().await
    }

    /// Join a room.
    pub async fn join_room(&mut self, room_id: u64) -> Result<(), ClientError> {
        self.client.join_room(room_id)?;
        self.flush().await
    }

    /// Leave a room.
    pub async fn leave_room(&mut self, room_id: u64) -> Result<(), ClientError> {
        self.client.leave_room(room_id)?;
        self.flush().await
    }

    /// Drain whatever the socket has buffered right now. Never waits for
    /// new data.
    pub async fn poll(&mut self) -> Result<Vec<ClientEvent>, ClientError> {
        let mut events: Vec<ClientEvent> = self.pending.drain(..).collect();

        let mut buf = vec![0u8; READ_CHUNK];
        while !self.disconnected {
            match self.stream.try_read(&mut buf) {
                Ok(0) => {
                    self.disconnected = true;
                    events.extend(self.client.handle_disconnect());
                },
                Ok(n) => events.extend(self.client.handle_bytes(&buf[..n])),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    tracing::debug!("Read failed: {}", e);
                    self.disconnected = true;
                    events.extend(self.client.handle_disconnect());
                },
            }
        }

        events.extend(self.client.tick());
        if !self.disconnected {
            self.flush().await?;
        }
        Ok(events)
    }

    /// Wait until at least one event is available.
    ///
    /// Returns `ClientError::Closed` once the connection is gone and every
    /// event has been handed out.
    pub async fn next_events(&mut self) -> Result<Vec<ClientEvent>, ClientError> {
        loop {
            if !self.pending.is_empty() {
                return Ok(self.pending.drain(..).collect());
            }
            if self.disconnected {
                return Err(ClientError::Closed);
            }

            let events = self.wait_for_events().await;
            self.flush().await?;
            if !events.is_empty() {
                return Ok(events);
            }
        }
    }

    /// Log out and close the socket.
    pub async fn close(mut self) -> Result<(), ClientError> {
        if self.client.is_authenticated() {
            self.client.logout()?;
            self.flush().await?;
        }
        let _ = self.stream.shutdown().await;
        Ok(())
    }

    /// Our user ID, once known.
    pub fn user_id(&self) -> Option<u64> {
        self.client.user_id()
    }

    /// Mirror of the server directory.
    pub fn directory(&self) -> &DirectoryMirror {
        self.client.directory()
    }

    /// Underlying state machine.
    pub fn client(&self) -> &Client<SystemEnv> {
        &self.client
    }

    /// Block for up to one tick on the socket, then run the client's tick.
    async fn wait_for_events(&mut self) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        let mut buf = vec![0u8; READ_CHUNK];

        match tokio::time::timeout(TICK_INTERVAL, self.stream.read(&mut buf)).await {
            Ok(Ok(0)) => {
                self.disconnected = true;
                events.extend(self.client.handle_disconnect());
            },
            Ok(Ok(n)) => events.extend(self.client.handle_bytes(&buf[..n])),
            Ok(Err(e)) => {
                tracing::debug!("Read failed: {}", e);
                self.disconnected = true;
                events.extend(self.client.handle_disconnect());
            },
            Err(_) => {},
        }

        events.extend(self.client.tick());
        events
    }

    async fn flush(&mut self) -> Result<(), ClientError> {
        while let Some(data) = self.client.take_outbound() {
            if let Err(e) = self.stream.write_all(&data).await {
                tracing::debug!("Write failed: {}", e);
                self.disconnected = true;
                return Err(ClientError::Closed);
            }
        }
        Ok(())
    }
}
