//! Parley cipher engine.
//!
//! Confidentiality, integrity and mutual-authentication primitives for one
//! session. Everything here is transport-agnostic and deterministic: callers
//! provide all random bytes (key seeds, salts, ephemeral secrets), which keeps
//! the handshake reproducible under simulation.
//!
//! # Session Lifecycle
//!
//! ```text
//! KeyPair (X25519 + Ed25519)
//!        │ export public key
//!        ▼
//! Key transport: ephemeral X25519 → HKDF-SHA256 → ChaCha20-Poly1305
//!        │ 32-byte session key
//!        ▼
//! CipherState::encrypt / decrypt (ChaCha20-Poly1305, counter nonces)
//! ```
//!
//! # Security
//!
//! Nonces:
//! - The 96-bit nonce is four zero bytes followed by a 64-bit counter
//! - The counter advances by 2 before every encryption, never backwards
//! - The responder uses even counters, the initiator odd ones, so the two
//!   directions never collide under the shared key
//! - A received counter of the wrong parity, or not strictly above the last
//!   accepted one, is rejected as a replay
//!
//! Volume:
//! - Plaintext bytes through a `CipherState` are counted in both directions
//! - Past the configured ceiling, `encrypt` refuses with
//!   `ReauthenticationRequired` and a fresh handshake is needed
//!
//! Authentication:
//! - Password proofs are `SHA-512(secret ‖ salt)`, compared in constant time
//! - Auth tokens sign that hash with Ed25519, binding it to the key pair that
//!   received the session key
//! - Secret material is zeroized on drop

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod auth;
pub mod cipher;
pub mod error;
pub mod keys;
pub mod transport;

pub use auth::{
    AuthToken, HASH_SIZE, SALT_SIZE, SIGNATURE_SIZE, bump_salt, hash_secret, hashes_match,
};
pub use cipher::{CipherState, DEFAULT_TRANSFER_LIMIT, NonceParity, SEALED_OVERHEAD};
pub use error::CryptoError;
pub use keys::{KEY_PAIR_SEED_SIZE, KeyPair, PUBLIC_KEY_SIZE, PublicKey};
pub use transport::{SEALED_KEY_SIZE, SYMMETRIC_KEY_SIZE, SymmetricKey, open_key, seal_key};
