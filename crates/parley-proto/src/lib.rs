//! Parley wire protocol.
//!
//! Everything that crosses a socket lives here: the length-prefixed framing
//! layer, the application [`Message`] with its [`Action`] and
//! [`MessageFlags`], the plain-text handshake payloads, and the
//! [`DirectorySnapshot`] broadcast on every membership change.
//!
//! # Framing
//!
//! ```text
//! ┌──────────────┬─────────────────────────────┐
//! │ length (u32) │ body (length bytes)         │
//! │ big-endian   │ plain CBOR or sealed bytes  │
//! └──────────────┴─────────────────────────────┘
//! ```
//!
//! Handshake frames carry a CBOR payload in the clear. Once a session key is
//! established every body is `counter (u64 BE) ‖ ciphertext ‖ tag` and decrypts
//! to a CBOR-encoded [`Message`]. This crate knows nothing about the cipher;
//! it only moves bytes in and out of frames.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod codec;
pub mod errors;
pub mod frame;
pub mod handshake;
pub mod message;
pub mod snapshot;

pub use errors::{ProtocolError, Result};
pub use frame::{FrameBuffer, LENGTH_PREFIX_SIZE, MAX_FRAME_SIZE, encode_frame};
pub use handshake::{ClientHello, Credentials, HandshakePayload, KeyTransport, ServerProof};
pub use message::{Action, Message, MessageFlags};
pub use snapshot::{DirectorySnapshot, RoomEntry};
