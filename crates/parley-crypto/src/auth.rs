//! Password proofs and auth tokens.
//!
//! Both sides prove knowledge of the shared server password without sending
//! it: the client sends `hash(password ‖ salt)` and the server answers with
//! `hash(password ‖ salt+1)`. An auth token additionally signs the hash with
//! the sender's Ed25519 key, tying the proof to the key pair that received the
//! session key.

use ed25519_dalek::{Signature, Signer, Verifier};
use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;

use crate::keys::{KeyPair, PublicKey};

/// Salt length used by the handshake.
pub const SALT_SIZE: usize = 64;

/// Output length of [`hash_secret`] (SHA-512).
pub const HASH_SIZE: usize = 64;

/// Ed25519 signature length.
pub const SIGNATURE_SIZE: usize = 64;

/// `SHA-512(secret ‖ salt)`.
pub fn hash_secret(secret: &[u8], salt: &[u8]) -> [u8; HASH_SIZE] {
    let mut hasher = Sha512::new();
    hasher.update(secret);
    hasher.update(salt);

    let mut out = [0u8; HASH_SIZE];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Constant-time equality for password hashes.
///
/// Length mismatch returns `false` without comparing contents.
pub fn hashes_match(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

/// The salt+1 derivation: increment the final byte modulo 256.
///
/// Deliberately cheap. It only needs to give the server's reply a different
/// hash than the client's request while staying tied to the same exchange. An
/// empty salt is returned unchanged.
pub fn bump_salt(salt: &[u8]) -> Vec<u8> {
    let mut bumped = salt.to_vec();
    if let Some(last) = bumped.last_mut() {
        *last = last.wrapping_add(1);
    }
    bumped
}

/// Signed password hash: `signature (64) ‖ salt` on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken {
    /// Ed25519 signature over `hash_secret(secret, salt)`
    pub signature: [u8; SIGNATURE_SIZE],
    /// Salt the hash was computed with
    pub salt: Vec<u8>,
}

impl AuthToken {
    /// Sign `hash_secret(secret, salt)` with the local key pair.
    pub fn sign(secret: &[u8], salt: Vec<u8>, keypair: &KeyPair) -> Self {
        let hash = hash_secret(secret, &salt);
        let signature = keypair.signing_key().sign(&hash);
        Self { signature: signature.to_bytes(), salt }
    }

    /// Recompute the hash and check the signature against `signer`.
    ///
    /// Never errors. Any mismatch is simply `false`.
    pub fn verify(&self, secret: &[u8], signer: &PublicKey) -> bool {
        let hash = hash_secret(secret, &self.salt);
        let signature = Signature::from_bytes(&self.signature);
        signer.verifying_key().verify(&hash, &signature).is_ok()
    }

    /// Wire encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(SIGNATURE_SIZE + self.salt.len());
        out.extend_from_slice(&self.signature);
        out.extend_from_slice(&self.salt);
        out
    }

    /// Parse the wire encoding. `None` if too short to hold a signature and a
    /// non-empty salt.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() <= SIGNATURE_SIZE {
            return None;
        }

        let mut signature = [0u8; SIGNATURE_SIZE];
        signature.copy_from_slice(&bytes[..SIGNATURE_SIZE]);
        Some(Self { signature, salt: bytes[SIGNATURE_SIZE..].to_vec() })
    }
}
