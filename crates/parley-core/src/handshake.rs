//! Four-phase handshake state machines.
//!
//! [`Initiator`] (client) and [`Responder`] (server) each hold an explicit
//! state enum; phase-local data such as the client's salt lives inside the
//! state variant that needs it. Payloads travel as plain frames on the
//! [`FramedChannel`], and the machines install keys into the channel's cipher
//! as they go, so once both reach `Authenticated` the channel is ready for
//! encrypted traffic.
//!
//! Both machines are pure: they read frames that are already buffered, queue
//! replies, and return. Time is passed in explicitly for the timeout check.

use std::{ops::Sub, time::Duration};

use parley_crypto::{SALT_SIZE, bump_salt, hash_secret, hashes_match};
use parley_proto::{ClientHello, Credentials, HandshakePayload, KeyTransport, ServerProof};
use zeroize::Zeroizing;

use crate::{channel::FramedChannel, env::Environment, error::HandshakeError};

/// Time allowed for a handshake to reach a terminal state.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Coarse authentication phase, as tracked by the session directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPhase {
    /// Nothing received from the peer yet, or the handshake failed
    Unauthenticated,
    /// Handshake in progress
    Authenticating,
    /// Handshake completed
    Authenticated,
}

/// Result of feeding a handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeProgress {
    /// Waiting for the peer's next payload
    Pending,
    /// Terminal success
    Authenticated,
    /// Terminal failure; the session must be torn down
    Failed,
}

/// Client-side handshake state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitiatorState {
    /// Not started
    Start,
    /// Public key sent, waiting for the sealed session key
    AwaitingSessionKey,
    /// Credentials sent, waiting for the server's proof over `salt+1`
    AwaitingServerProof {
        /// Salt our credentials were hashed with
        salt: Vec<u8>,
    },
    /// Server proved knowledge of the password
    Authenticated,
    /// Handshake failed
    Failed(HandshakeError),
}

/// Client side of the handshake.
#[derive(Debug)]
pub struct Initiator<I> {
    state: InitiatorState,
    username: String,
    password: Zeroizing<Vec<u8>>,
    started_at: I,
    timeout: Duration,
}

impl<I> Initiator<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Create an initiator in [`InitiatorState::Start`].
    pub fn new(now: I, username: impl Into<String>, password: &[u8], timeout: Duration) -> Self {
        Self {
            state: InitiatorState::Start,
            username: username.into(),
            password: Zeroizing::new(password.to_vec()),
            started_at: now,
            timeout,
        }
    }

    /// Phase 1: generate a key pair and send the public half.
    ///
    /// # Errors
    ///
    /// - `HandshakeError::InvalidState` if already started
    pub fn start<E: Environment>(
        &mut self,
        channel: &mut FramedChannel,
        env: &E,
    ) -> Result<(), HandshakeError> {
        if self.state != InitiatorState::Start {
            return Err(HandshakeError::InvalidState {
                state: self.state_name(),
                operation: "start",
            });
        }

        let seed: [u8; 64] = env.random_array();
        let cipher = channel.cipher_mut();
        cipher.generate_key_pair(&seed);
        let hello = ClientHello { public_key: cipher.export_public_key()?.to_vec() };
        channel.write_plain(&hello.to_bytes()?)?;

        self.state = InitiatorState::AwaitingSessionKey;
        Ok(())
    }

    /// Consume every buffered handshake frame.
    ///
    /// Stops as soon as a terminal state is reached, so encrypted frames that
    /// follow the handshake stay buffered in the channel.
    pub fn poll<E: Environment>(
        &mut self,
        channel: &mut FramedChannel,
        env: &E,
    ) -> HandshakeProgress {
        while self.is_waiting() {
            match channel.read_plain() {
                Ok(Some(frame)) => {
                    self.handle_payload(&frame, channel, env);
                },
                Ok(None) => break,
                Err(err) => self.state = InitiatorState::Failed(err.into()),
            }
        }
        self.progress()
    }

    /// Advance by one payload from the server.
    pub fn handle_payload<E: Environment>(
        &mut self,
        payload: &[u8],
        channel: &mut FramedChannel,
        env: &E,
    ) -> HandshakeProgress {
        let next = match &self.state {
            InitiatorState::AwaitingSessionKey => self.on_session_key(payload, channel, env),
            InitiatorState::AwaitingServerProof { salt } => self.on_server_proof(payload, salt),
            InitiatorState::Start | InitiatorState::Authenticated | InitiatorState::Failed(_) => {
                Err(HandshakeError::InvalidState {
                    state: self.state_name(),
                    operation: "handle_payload",
                })
            },
        };

        self.state = next.unwrap_or_else(InitiatorState::Failed);
        self.progress()
    }

    /// Phase 2 received; phase 3 sent.
    fn on_session_key<E: Environment>(
        &self,
        payload: &[u8],
        channel: &mut FramedChannel,
        env: &E,
    ) -> Result<InitiatorState, HandshakeError> {
        let transport = KeyTransport::from_bytes(payload)
            .map_err(|err| HandshakeError::MalformedPeerData(err.to_string()))?;
        channel.cipher_mut().import_symmetric_key_from_peer(&transport.sealed_key)?;

        let salt: [u8; SALT_SIZE] = env.random_array();
        let salt = salt.to_vec();
        let hash = hash_secret(&self.password, &salt);
        let token = channel.cipher().compute_auth_token(&self.password, salt.clone())?;

        let credentials = Credentials {
            username: self.username.clone(),
            salt: salt.clone(),
            hash: hash.to_vec(),
            token: token.to_bytes(),
        };
        channel.write_plain(&credentials.to_bytes()?)?;

        Ok(InitiatorState::AwaitingServerProof { salt })
    }

    /// Phase 4: the server must answer with `hash(password ‖ salt+1)`.
    fn on_server_proof(
        &self,
        payload: &[u8],
        salt: &[u8],
    ) -> Result<InitiatorState, HandshakeError> {
        let proof = ServerProof::from_bytes(payload)
            .map_err(|err| HandshakeError::MalformedPeerData(err.to_string()))?;

        let expected = hash_secret(&self.password, &bump_salt(salt));
        if !hashes_match(&expected, &proof.hash) {
            return Err(HandshakeError::CredentialMismatch);
        }
        Ok(InitiatorState::Authenticated)
    }

    /// Fail the handshake if it has been running longer than the timeout.
    ///
    /// Returns true if this call moved the machine to `Failed`.
    pub fn check_timeout(&mut self, now: I) -> bool {
        if self.is_terminal() {
            return false;
        }
        let elapsed = now - self.started_at;
        if elapsed > self.timeout {
            self.state = InitiatorState::Failed(HandshakeError::Timeout { elapsed });
            return true;
        }
        false
    }

    /// Force the machine into `Failed`, e.g. when the transport drops.
    pub fn fail(&mut self, err: HandshakeError) {
        if !self.is_terminal() {
            self.state = InitiatorState::Failed(err);
        }
    }

    /// Current state.
    pub fn state(&self) -> &InitiatorState {
        &self.state
    }

    /// Failure reason, if failed.
    pub fn error(&self) -> Option<&HandshakeError> {
        match &self.state {
            InitiatorState::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// Coarse phase for the directory and UI.
    pub fn auth_phase(&self) -> AuthPhase {
        match self.state {
            InitiatorState::Start | InitiatorState::Failed(_) => AuthPhase::Unauthenticated,
            InitiatorState::AwaitingSessionKey | InitiatorState::AwaitingServerProof { .. } => {
                AuthPhase::Authenticating
            },
            InitiatorState::Authenticated => AuthPhase::Authenticated,
        }
    }

    /// Status line for the presentation layer.
    pub fn status_text(&self) -> &'static str {
        match &self.state {
            InitiatorState::Start => "Setting up connection",
            InitiatorState::AwaitingSessionKey => "Waiting for server key",
            InitiatorState::AwaitingServerProof { .. } => "Verifying the server's identity",
            InitiatorState::Authenticated => "Authenticated",
            InitiatorState::Failed(err) => err.coarse_reason(),
        }
    }

    /// True once the server's proof verified.
    pub fn is_authenticated(&self) -> bool {
        self.state == InitiatorState::Authenticated
    }

    /// True after `start`, before a terminal state.
    fn is_waiting(&self) -> bool {
        matches!(
            self.state,
            InitiatorState::AwaitingSessionKey | InitiatorState::AwaitingServerProof { .. }
        )
    }

    fn is_terminal(&self) -> bool {
        matches!(self.state, InitiatorState::Authenticated | InitiatorState::Failed(_))
    }

    fn progress(&self) -> HandshakeProgress {
        match self.state {
            InitiatorState::Authenticated => HandshakeProgress::Authenticated,
            InitiatorState::Failed(_) => HandshakeProgress::Failed,
            _ => HandshakeProgress::Pending,
        }
    }

    fn state_name(&self) -> &'static str {
        match self.state {
            InitiatorState::Start => "start",
            InitiatorState::AwaitingSessionKey => "awaiting session key",
            InitiatorState::AwaitingServerProof { .. } => "awaiting server proof",
            InitiatorState::Authenticated => "authenticated",
            InitiatorState::Failed(_) => "failed",
        }
    }
}

/// Server-side handshake state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponderState {
    /// Waiting for the client's public key
    AwaitingClientKey,
    /// Session key sent, waiting for credentials
    AwaitingCredentials,
    /// Client proved knowledge of the password
    Authenticated {
        /// Display name the client asked for
        username: String,
    },
    /// Handshake failed
    Failed(HandshakeError),
}

/// Server side of the handshake.
#[derive(Debug)]
pub struct Responder<I> {
    state: ResponderState,
    password: Zeroizing<Vec<u8>>,
    started_at: I,
    timeout: Duration,
}

impl<I> Responder<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Create a responder for a just-accepted connection.
    pub fn new(now: I, password: &[u8], timeout: Duration) -> Self {
        Self {
            state: ResponderState::AwaitingClientKey,
            password: Zeroizing::new(password.to_vec()),
            started_at: now,
            timeout,
        }
    }

    /// Consume every buffered handshake frame.
    ///
    /// Stops at a terminal state; anything the client pipelined after its
    /// credentials stays buffered for the router.
    pub fn poll<E: Environment>(
        &mut self,
        channel: &mut FramedChannel,
        env: &E,
    ) -> HandshakeProgress {
        while self.is_waiting() {
            match channel.read_plain() {
                Ok(Some(frame)) => {
                    self.handle_payload(&frame, channel, env);
                },
                Ok(None) => break,
                Err(err) => self.state = ResponderState::Failed(err.into()),
            }
        }
        self.progress()
    }

    /// Advance by one payload from the client.
    pub fn handle_payload<E: Environment>(
        &mut self,
        payload: &[u8],
        channel: &mut FramedChannel,
        env: &E,
    ) -> HandshakeProgress {
        let next = match self.state {
            ResponderState::AwaitingClientKey => Self::on_client_key(payload, channel, env),
            ResponderState::AwaitingCredentials => self.on_credentials(payload, channel),
            ResponderState::Authenticated { .. } | ResponderState::Failed(_) => {
                Err(HandshakeError::InvalidState {
                    state: self.state_name(),
                    operation: "handle_payload",
                })
            },
        };

        self.state = next.unwrap_or_else(ResponderState::Failed);
        self.progress()
    }

    /// Phase 1 received; phase 2 sent.
    fn on_client_key<E: Environment>(
        payload: &[u8],
        channel: &mut FramedChannel,
        env: &E,
    ) -> Result<ResponderState, HandshakeError> {
        let hello = ClientHello::from_bytes(payload)
            .map_err(|err| HandshakeError::MalformedPeerData(err.to_string()))?;

        let cipher = channel.cipher_mut();
        cipher.import_peer_public_key(&hello.public_key)?;
        cipher.generate_symmetric_key(env.random_array());
        let sealed_key = cipher.export_symmetric_key_for_peer(env.random_array())?;

        channel.write_plain(&KeyTransport { sealed_key }.to_bytes()?)?;
        Ok(ResponderState::AwaitingCredentials)
    }

    /// Phase 3 received; phase 4 sent.
    ///
    /// The hash must match AND the token must be signed by the key that
    /// received the session key over the same salt.
    fn on_credentials(
        &self,
        payload: &[u8],
        channel: &mut FramedChannel,
    ) -> Result<ResponderState, HandshakeError> {
        let credentials = Credentials::from_bytes(payload)
            .map_err(|err| HandshakeError::MalformedPeerData(err.to_string()))?;

        if credentials.salt.len() != SALT_SIZE {
            return Err(HandshakeError::MalformedPeerData(format!(
                "salt must be {SALT_SIZE} bytes, got {}",
                credentials.salt.len()
            )));
        }

        let expected = hash_secret(&self.password, &credentials.salt);
        let token_bound = credentials.token.ends_with(&credentials.salt)
            && channel.cipher().verify_auth_token(&self.password, &credentials.token);
        if !hashes_match(&expected, &credentials.hash) || !token_bound {
            return Err(HandshakeError::CredentialMismatch);
        }

        let proof = ServerProof {
            hash: hash_secret(&self.password, &bump_salt(&credentials.salt)).to_vec(),
        };
        channel.write_plain(&proof.to_bytes()?)?;

        Ok(ResponderState::Authenticated { username: credentials.username })
    }

    /// Fail the handshake if it has been running longer than the timeout.
    ///
    /// Returns true if this call moved the machine to `Failed`.
    pub fn check_timeout(&mut self, now: I) -> bool {
        if self.is_terminal() {
            return false;
        }
        let elapsed = now - self.started_at;
        if elapsed > self.timeout {
            self.state = ResponderState::Failed(HandshakeError::Timeout { elapsed });
            return true;
        }
        false
    }

    /// Current state.
    pub fn state(&self) -> &ResponderState {
        &self.state
    }

    /// Requested username once authenticated.
    pub fn username(&self) -> Option<&str> {
        match &self.state {
            ResponderState::Authenticated { username } => Some(username),
            _ => None,
        }
    }

    /// Failure reason, if failed.
    pub fn error(&self) -> Option<&HandshakeError> {
        match &self.state {
            ResponderState::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// Coarse phase for the directory.
    pub fn auth_phase(&self) -> AuthPhase {
        match self.state {
            ResponderState::AwaitingClientKey | ResponderState::Failed(_) => {
                AuthPhase::Unauthenticated
            },
            ResponderState::AwaitingCredentials => AuthPhase::Authenticating,
            ResponderState::Authenticated { .. } => AuthPhase::Authenticated,
        }
    }

    /// Status line for logs.
    pub fn status_text(&self) -> &'static str {
        match &self.state {
            ResponderState::AwaitingClientKey => "Waiting for client key",
            ResponderState::AwaitingCredentials => "Waiting for credentials",
            ResponderState::Authenticated { .. } => "Authenticated",
            ResponderState::Failed(err) => err.coarse_reason(),
        }
    }

    /// True once the client's credentials verified.
    pub fn is_authenticated(&self) -> bool {
        matches!(self.state, ResponderState::Authenticated { .. })
    }

    fn is_waiting(&self) -> bool {
        matches!(
            self.state,
            ResponderState::AwaitingClientKey | ResponderState::AwaitingCredentials
        )
    }

    fn is_terminal(&self) -> bool {
        !self.is_waiting()
    }

    fn progress(&self) -> HandshakeProgress {
        match self.state {
            ResponderState::Authenticated { .. } => HandshakeProgress::Authenticated,
            ResponderState::Failed(_) => HandshakeProgress::Failed,
            _ => HandshakeProgress::Pending,
        }
    }

    fn state_name(&self) -> &'static str {
        match self.state {
            ResponderState::AwaitingClientKey => "awaiting client key",
            ResponderState::AwaitingCredentials => "awaiting credentials",
            ResponderState::Authenticated { .. } => "authenticated",
            ResponderState::Failed(_) => "failed",
        }
    }
}
