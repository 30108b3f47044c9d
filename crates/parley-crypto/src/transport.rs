//! Session key transport.
//!
//! The server seals the 32-byte session key to the client's X25519 public
//! key: an ephemeral X25519 secret performs ECDH with the recipient, HKDF
//! stretches the shared secret into a wrapping key, and ChaCha20-Poly1305
//! seals the session key under it.
//!
//! Wire format: `ephemeral_public (32) ‖ ciphertext (32) ‖ tag (16)`.

use std::fmt;

use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, KeyInit},
};
use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::{PublicKey as ExchangePublic, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{
    error::CryptoError,
    keys::{KeyPair, PublicKey},
};

/// Length of a session key.
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Length of a sealed session key on the wire.
pub const SEALED_KEY_SIZE: usize = 32 + SYMMETRIC_KEY_SIZE + 16;

const KEY_TRANSPORT_INFO: &[u8] = b"parley key transport v1";

/// A 32-byte ChaCha20-Poly1305 session key. Zeroized on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; SYMMETRIC_KEY_SIZE]);

impl SymmetricKey {
    /// Wrap caller-provided random bytes.
    pub fn from_bytes(bytes: [u8; SYMMETRIC_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; SYMMETRIC_KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

/// Seal `key` so only the holder of `recipient`'s key pair can open it.
///
/// `ephemeral_seed` MUST be fresh random bytes; reusing it across calls
/// reuses the wrapping key.
pub fn seal_key(key: &SymmetricKey, recipient: &PublicKey, ephemeral_seed: [u8; 32]) -> Vec<u8> {
    let ephemeral = StaticSecret::from(ephemeral_seed);
    let ephemeral_public = ExchangePublic::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(recipient.exchange_key());

    let wrapping = derive_wrapping_key(
        shared.as_bytes(),
        ephemeral_public.as_bytes(),
        recipient.exchange_key().as_bytes(),
    );
    let cipher = ChaCha20Poly1305::new(wrapping.as_bytes().into());

    // Fresh wrapping key per seal, so a fixed nonce is never reused under it
    let Ok(sealed) = cipher.encrypt(Nonce::from_slice(&[0u8; 12]), key.as_bytes().as_slice())
    else {
        unreachable!("ChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };

    let mut out = Vec::with_capacity(SEALED_KEY_SIZE);
    out.extend_from_slice(ephemeral_public.as_bytes());
    out.extend_from_slice(&sealed);
    out
}

/// Open a sealed session key with the local key pair.
///
/// # Errors
///
/// - `CryptoError::DecryptionFailed` if the input has the wrong length, the
///   ephemeral key is a low-order point, or the tag does not verify
pub fn open_key(sealed: &[u8], keypair: &KeyPair) -> Result<SymmetricKey, CryptoError> {
    if sealed.len() != SEALED_KEY_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let mut ephemeral_bytes = [0u8; 32];
    ephemeral_bytes.copy_from_slice(&sealed[..32]);
    let ephemeral_public = ExchangePublic::from(ephemeral_bytes);

    let shared = keypair.exchange_secret().diffie_hellman(&ephemeral_public);
    if !shared.was_contributory() {
        return Err(CryptoError::DecryptionFailed);
    }

    let local_public = ExchangePublic::from(keypair.exchange_secret());
    let wrapping =
        derive_wrapping_key(shared.as_bytes(), &ephemeral_bytes, local_public.as_bytes());
    let cipher = ChaCha20Poly1305::new(wrapping.as_bytes().into());

    let mut plain = cipher
        .decrypt(Nonce::from_slice(&[0u8; 12]), &sealed[32..])
        .map_err(|_| CryptoError::DecryptionFailed)?;

    if plain.len() != SYMMETRIC_KEY_SIZE {
        plain.zeroize();
        return Err(CryptoError::DecryptionFailed);
    }

    let mut key = [0u8; SYMMETRIC_KEY_SIZE];
    key.copy_from_slice(&plain);
    plain.zeroize();

    Ok(SymmetricKey(key))
}

/// HKDF-SHA256 over the ECDH output, salted with both public keys so the
/// wrapping key is bound to this exact exchange.
fn derive_wrapping_key(
    shared: &[u8; 32],
    ephemeral: &[u8; 32],
    recipient: &[u8; 32],
) -> SymmetricKey {
    let mut salt = [0u8; 64];
    salt[..32].copy_from_slice(ephemeral);
    salt[32..].copy_from_slice(recipient);

    let hk = Hkdf::<Sha256>::new(Some(&salt), shared);
    let mut okm = [0u8; SYMMETRIC_KEY_SIZE];
    let Ok(()) = hk.expand(KEY_TRANSPORT_INFO, &mut okm) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };

    SymmetricKey(okm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KEY_PAIR_SEED_SIZE;

    fn pair(byte: u8) -> KeyPair {
        KeyPair::from_seed(&[byte; KEY_PAIR_SEED_SIZE])
    }

    #[test]
    fn seal_open_roundtrip() {
        let recipient = pair(1);
        let key = SymmetricKey::from_bytes([0x42; 32]);

        let sealed = seal_key(&key, &recipient.public_key(), [5u8; 32]);
        assert_eq!(sealed.len(), SEALED_KEY_SIZE);

        let opened = open_key(&sealed, &recipient).unwrap();
        assert_eq!(opened, key);
    }

    #[test]
    fn wrong_recipient_cannot_open() {
        let recipient = pair(1);
        let other = pair(2);
        let key = SymmetricKey::from_bytes([0x42; 32]);

        let sealed = seal_key(&key, &recipient.public_key(), [5u8; 32]);
        assert_eq!(open_key(&sealed, &other), Err(CryptoError::DecryptionFailed));
    }

    #[test]
    fn tampered_ciphertext_rejected() {
        let recipient = pair(1);
        let key = SymmetricKey::from_bytes([0x42; 32]);

        let mut sealed = seal_key(&key, &recipient.public_key(), [5u8; 32]);
        sealed[40] ^= 0x01;

        assert_eq!(open_key(&sealed, &recipient), Err(CryptoError::DecryptionFailed));
    }

    #[test]
    fn truncated_input_rejected() {
        let recipient = pair(1);
        assert_eq!(open_key(&[0u8; 10], &recipient), Err(CryptoError::DecryptionFailed));
    }

    #[test]
    fn low_order_ephemeral_rejected() {
        let recipient = pair(1);
        // All-zero public key is a low-order point
        let sealed = vec![0u8; SEALED_KEY_SIZE];
        assert_eq!(open_key(&sealed, &recipient), Err(CryptoError::DecryptionFailed));
    }

    #[test]
    fn debug_is_redacted() {
        let key = SymmetricKey::from_bytes([0x42; 32]);
        assert_eq!(format!("{key:?}"), "SymmetricKey(..)");
    }
}
