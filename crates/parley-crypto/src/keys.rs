//! Long-term key pairs.
//!
//! A Parley key pair is two curve keys used for different jobs: an X25519
//! static secret that session keys are sealed to, and an Ed25519 signing key
//! that signs auth tokens. The exported public key is both public halves
//! concatenated.

use std::fmt;

use ed25519_dalek::{SigningKey, VerifyingKey};
use x25519_dalek::{PublicKey as ExchangePublic, StaticSecret};

use crate::error::CryptoError;

/// Seed bytes needed to build a [`KeyPair`] (32 for each curve).
pub const KEY_PAIR_SEED_SIZE: usize = 64;

/// Length of an exported [`PublicKey`]: X25519 public ‖ Ed25519 verifying key.
pub const PUBLIC_KEY_SIZE: usize = 64;

/// Local key pair. Both secrets are zeroized on drop by their own types.
pub struct KeyPair {
    exchange: StaticSecret,
    signing: SigningKey,
}

impl KeyPair {
    /// Derive a key pair from caller-provided random bytes.
    ///
    /// The first 32 bytes seed the X25519 secret, the last 32 the Ed25519
    /// signing key. Production callers MUST pass cryptographically secure
    /// random bytes.
    pub fn from_seed(seed: &[u8; KEY_PAIR_SEED_SIZE]) -> Self {
        let mut exchange_seed = [0u8; 32];
        let mut signing_seed = [0u8; 32];
        exchange_seed.copy_from_slice(&seed[..32]);
        signing_seed.copy_from_slice(&seed[32..]);

        Self {
            exchange: StaticSecret::from(exchange_seed),
            signing: SigningKey::from_bytes(&signing_seed),
        }
    }

    /// Public half of this key pair.
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            exchange: ExchangePublic::from(&self.exchange),
            verifying: self.signing.verifying_key(),
        }
    }

    pub(crate) fn exchange_secret(&self) -> &StaticSecret {
        &self.exchange
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair").field("public", &self.public_key()).finish_non_exhaustive()
    }
}

/// Public half of a [`KeyPair`], as exchanged in phase 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicKey {
    exchange: ExchangePublic,
    verifying: VerifyingKey,
}

impl PublicKey {
    /// Canonical wire encoding.
    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        let mut out = [0u8; PUBLIC_KEY_SIZE];
        out[..32].copy_from_slice(self.exchange.as_bytes());
        out[32..].copy_from_slice(self.verifying.as_bytes());
        out
    }

    /// Parse the wire encoding.
    ///
    /// # Errors
    ///
    /// - `CryptoError::MalformedKey` if the length is wrong or the Ed25519
    ///   half is not a valid curve point
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != PUBLIC_KEY_SIZE {
            return Err(CryptoError::MalformedKey);
        }

        let mut exchange = [0u8; 32];
        let mut verifying = [0u8; 32];
        exchange.copy_from_slice(&bytes[..32]);
        verifying.copy_from_slice(&bytes[32..]);

        let verifying =
            VerifyingKey::from_bytes(&verifying).map_err(|_| CryptoError::MalformedKey)?;

        Ok(Self { exchange: ExchangePublic::from(exchange), verifying })
    }

    pub(crate) fn exchange_key(&self) -> &ExchangePublic {
        &self.exchange
    }

    pub(crate) fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying
    }
}
