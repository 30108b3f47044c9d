//! Driver error types.
//!
//! Errors here describe events the driver could not apply at all. Failures
//! that belong to one session (bad frames, failed handshakes, write errors)
//! never surface as a `DriverError`; the driver tears that session down and
//! carries on.

use std::fmt;

use crate::directory::DirectoryError;

/// Errors from [`crate::ServerDriver::process_event`].
#[derive(Debug)]
pub enum DriverError {
    /// Event names a descriptor with no live session.
    ///
    /// Expected briefly after the driver closes a connection whose reader
    /// had already queued more bytes. Safe to log and ignore.
    SessionNotFound(u64),

    /// `ConnectionAccepted` reused a descriptor that is still registered.
    ///
    /// The runtime must never hand out the same descriptor twice. Indicates
    /// a bug.
    DescriptorInUse(u64),

    /// Directory rejected a mutation the driver believed valid.
    ///
    /// The directory and the session map disagree. Indicates a bug.
    Directory(DirectoryError),

    /// Encoding a server-originated payload failed.
    Protocol(String),
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionNotFound(descriptor) => {
                write!(f, "no session for descriptor {descriptor}")
            },
            Self::DescriptorInUse(descriptor) => {
                write!(f, "descriptor already registered: {descriptor}")
            },
            Self::Directory(err) => write!(f, "directory error: {err}"),
            Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
        }
    }
}

impl std::error::Error for DriverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Directory(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DirectoryError> for DriverError {
    fn from(err: DirectoryError) -> Self {
        Self::Directory(err)
    }
}

impl From<parley_proto::ProtocolError> for DriverError {
    fn from(err: parley_proto::ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}
