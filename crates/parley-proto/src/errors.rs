//! Protocol error types.

use thiserror::Error;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while framing or (de)serializing wire data.
///
/// None of these are transient. A peer that produces one is either broken or
/// hostile, and the session it came from should be torn down.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame body exceeds [`crate::MAX_FRAME_SIZE`]
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Size declared by the length prefix or requested by the caller
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// CBOR serialization failed
    #[error("CBOR encode failed: {0}")]
    CborEncode(String),

    /// CBOR deserialization failed (malformed bytes or wrong shape)
    #[error("CBOR decode failed: {0}")]
    CborDecode(String),

    /// Action byte does not name a known [`crate::Action`]
    #[error("unknown action: {0}")]
    UnknownAction(u8),
}
