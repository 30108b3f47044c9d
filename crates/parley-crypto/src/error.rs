//! Cipher engine errors.

use thiserror::Error;

/// Errors from key handling and session encryption.
///
/// Any of these during an established session is fatal for that session
/// only. The caller tears the connection down and never retries in place.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Bytes do not decode to a valid public key
    #[error("malformed public key")]
    MalformedKey,

    /// Key transport requested before the peer's public key was registered
    #[error("peer public key not registered")]
    NoPeerKey,

    /// Operation needs a local key pair or session key that does not exist yet
    #[error("local key material not initialized")]
    NoLocalKey,

    /// Sealed session key could not be opened
    #[error("session key decryption failed")]
    DecryptionFailed,

    /// Integrity tag or frame layout did not verify
    #[error("authentication failed")]
    AuthenticationFailed,

    /// Nonce of the wrong parity or not above the last accepted one
    #[error("replayed nonce {nonce}")]
    ReplayedNonce {
        /// Offending counter value
        nonce: u64,
    },

    /// Transfer ceiling reached; a new handshake is required
    #[error("reauthentication required after {transferred} bytes (limit {limit})")]
    ReauthenticationRequired {
        /// Bytes processed so far
        transferred: u64,
        /// Configured ceiling
        limit: u64,
    },
}

impl CryptoError {
    /// True if the error asks for a fresh handshake rather than signalling a
    /// broken or hostile peer.
    pub fn requires_reauthentication(&self) -> bool {
        matches!(self, Self::ReauthenticationRequired { .. })
    }
}
