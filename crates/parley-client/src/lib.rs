//! Client
//!
//! Action-based client state machine for the Parley chat protocol. Runs the
//! initiator side of the handshake, encrypts outgoing requests, and turns
//! server traffic into events.
//!
//! # Architecture
//!
//! The client follows the same Sans-IO pattern as [`parley_core`]. The caller
//! feeds socket bytes into [`Client::handle_bytes`], drains
//! [`Client::take_outbound`], and calls [`Client::tick`] periodically; every
//! call returns the [`ClientEvent`]s it produced.
//!
//! # Components
//!
//! - [`Client`]: The state machine
//! - [`DirectoryMirror`]: Read-only copy of the server's users and rooms
//! - [`ClientEvent`]: Events for the application
//! - [`MessageHandler`] and [`dispatch`]: Callback-style event handling
//!
//! # Transport (optional)
//!
//! With the `transport` feature enabled, this crate also provides
//! [`transport::ConnectedClient`], a tokio TCP wrapper around [`Client`].

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod client;
mod error;
mod event;
mod handler;
mod mirror;

#[cfg(feature = "transport")]
pub mod transport;

pub use client::{Client, ClientConfig, ClientStatus, DEFAULT_HEARTBEAT_INTERVAL};
pub use error::{AuthFailure, ClientError};
pub use event::ClientEvent;
pub use handler::{MessageHandler, dispatch};
pub use mirror::DirectoryMirror;
pub use parley_core::{Environment, SystemEnv};
