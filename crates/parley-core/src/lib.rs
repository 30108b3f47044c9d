//! Parley protocol core.
//!
//! Pure state machines for one Parley session: the [`FramedChannel`] that
//! turns a byte stream into encrypted [`parley_proto::Message`]s, and the
//! four-phase [`Initiator`]/[`Responder`] handshake that takes a fresh
//! connection to an authenticated, encrypted session.
//!
//! # Sans-IO
//!
//! Nothing in this crate touches a socket or a clock. Callers push received
//! bytes in with [`FramedChannel::feed`], drain bytes to send with
//! [`FramedChannel::take_outbound`], and pass time and randomness through an
//! [`Environment`]. The same code runs under the tokio server and under the
//! deterministic simulation harness.
//!
//! # Handshake
//!
//! ```text
//! Initiator                                   Responder
//! Start ──── ClientHello ──────────────────> AwaitingClientKey
//! AwaitingSessionKey <────── KeyTransport ── AwaitingCredentials
//! AwaitingServerProof ─── Credentials ─────>     │ verify hash + token
//! Authenticated <─────────── ServerProof ─── Authenticated
//! ```
//!
//! Any verification failure, malformed payload, or timeout moves the machine
//! to `Failed`, which always means the session is torn down.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod channel;
pub mod env;
pub mod error;
pub mod handshake;
pub mod system_env;

pub use channel::FramedChannel;
pub use env::Environment;
pub use error::{ChannelError, HandshakeError};
pub use handshake::{
    AuthPhase, DEFAULT_HANDSHAKE_TIMEOUT, HandshakeProgress, Initiator, InitiatorState, Responder,
    ResponderState,
};
pub use system_env::SystemEnv;
