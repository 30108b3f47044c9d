//! Client error types.

use parley_core::{ChannelError, HandshakeError};
use thiserror::Error;

/// Errors from client operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Operation needs a completed handshake
    #[error("not authenticated")]
    NotAuthenticated,

    /// Session was closed by logout, failure, or the server
    #[error("session closed")]
    Closed,

    /// Handshake could not be started or progressed
    #[error("handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    /// Frame could not be encrypted or decoded
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),
}

/// Why a client is not (or no longer) authenticated.
///
/// Deliberately coarse: shown to users, and never distinguishes a wrong
/// password from a server that failed to prove its own.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// Password rejected by the server, or the server's proof was wrong
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Handshake did not finish in time
    #[error("authentication timeout")]
    Timeout,

    /// TCP connection could not be established
    #[error("server unreachable")]
    Unreachable,

    /// Connection dropped mid-session
    #[error("connection lost")]
    ConnectionLost,

    /// Any other handshake failure
    #[error("authentication failed")]
    Failed,
}

impl From<&HandshakeError> for AuthFailure {
    fn from(err: &HandshakeError) -> Self {
        match err {
            HandshakeError::Timeout { .. } => Self::Timeout,
            HandshakeError::CredentialMismatch => Self::InvalidCredentials,
            _ => Self::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn handshake_errors_collapse_to_coarse_reasons() {
        let timeout = HandshakeError::Timeout { elapsed: Duration::from_secs(31) };
        assert_eq!(AuthFailure::from(&timeout), AuthFailure::Timeout);
        assert_eq!(
            AuthFailure::from(&HandshakeError::CredentialMismatch),
            AuthFailure::InvalidCredentials
        );
        assert_eq!(
            AuthFailure::from(&HandshakeError::MalformedPeerData("x".to_string())),
            AuthFailure::Failed
        );
    }

    #[test]
    fn display_strings() {
        assert_eq!(AuthFailure::InvalidCredentials.to_string(), "invalid credentials");
        assert_eq!(AuthFailure::Timeout.to_string(), "authentication timeout");
        assert_eq!(AuthFailure::Unreachable.to_string(), "server unreachable");
        assert_eq!(AuthFailure::ConnectionLost.to_string(), "connection lost");
    }
}
