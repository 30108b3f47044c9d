//! Error types for the Parley protocol core.
//!
//! Two layers: [`ChannelError`] for a single frame that failed to decrypt or
//! decode, and [`HandshakeError`] for the authentication state machines. Both
//! are fatal for the session that produced them and nothing else.

use std::time::Duration;

use parley_crypto::CryptoError;
use parley_proto::ProtocolError;
use thiserror::Error;

/// Errors from reading or writing a framed, encrypted channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Encryption, decryption, or nonce check failed
    #[error("cipher error: {0}")]
    Crypto(#[from] CryptoError),

    /// Frame or payload did not decode
    #[error("decode error: {0}")]
    Decode(#[from] ProtocolError),
}

impl ChannelError {
    /// True if the session should be renegotiated rather than treated as
    /// hostile.
    pub fn requires_reauthentication(&self) -> bool {
        matches!(self, Self::Crypto(err) if err.requires_reauthentication())
    }
}

/// Errors that end a handshake.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// Handshake did not complete within the configured window
    #[error("handshake timeout after {elapsed:?}")]
    Timeout {
        /// How long we waited
        elapsed: Duration,
    },

    /// Password hash, auth token, or server proof did not match
    #[error("credential mismatch")]
    CredentialMismatch,

    /// Peer sent a payload that does not fit the current phase
    #[error("malformed peer data: {0}")]
    MalformedPeerData(String),

    /// Operation not valid in the current state
    #[error("invalid state: cannot {operation} while {state}")]
    InvalidState {
        /// Current state when the error occurred
        state: &'static str,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// Cryptographic step failed
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Frame layer failed
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl HandshakeError {
    /// Returns true if this error is transient and a fresh attempt may
    /// succeed.
    ///
    /// Only timeouts qualify. A credential mismatch will mismatch again, and
    /// malformed data indicates a broken or malicious peer.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Short, oracle-free reason suitable for showing a user.
    ///
    /// Never includes cryptographic detail.
    pub fn coarse_reason(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "authentication timeout",
            Self::CredentialMismatch => "invalid credentials",
            Self::MalformedPeerData(_)
            | Self::InvalidState { .. }
            | Self::Crypto(_)
            | Self::Protocol(_) => "authentication failed",
        }
    }
}

impl From<ChannelError> for HandshakeError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::Crypto(err) => Self::Crypto(err),
            ChannelError::Decode(err) => Self::Protocol(err),
        }
    }
}
