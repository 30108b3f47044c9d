//! Per-session cipher state.
//!
//! [`CipherState`] collects everything one session needs: the local key pair,
//! the peer's public key, the session key, and the nonce and volume counters.
//! It lives exactly as long as its session. A new handshake always means a
//! new `CipherState`.

use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, KeyInit},
};

use crate::{
    auth::AuthToken,
    error::CryptoError,
    keys::{KEY_PAIR_SEED_SIZE, KeyPair, PUBLIC_KEY_SIZE, PublicKey},
    transport::{SYMMETRIC_KEY_SIZE, SymmetricKey, open_key, seal_key},
};

/// Default transfer ceiling before a new handshake is required (64 GiB).
pub const DEFAULT_TRANSFER_LIMIT: u64 = 1 << 36;

/// Bytes a sealed frame adds to its plaintext: counter (8) + tag (16).
pub const SEALED_OVERHEAD: usize = NONCE_COUNTER_SIZE + TAG_SIZE;

const NONCE_COUNTER_SIZE: usize = 8;
const TAG_SIZE: usize = 16;

/// Which half of the nonce space this side encrypts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceParity {
    /// Responder (server): counters 2, 4, 6, ...
    Even,
    /// Initiator (client): counters 3, 5, 7, ...
    Odd,
}

impl NonceParity {
    fn initial(self) -> u64 {
        match self {
            Self::Even => 0,
            Self::Odd => 1,
        }
    }

    fn matches(self, counter: u64) -> bool {
        counter % 2 == self.initial()
    }
}

/// Cipher state for one session.
///
/// Both directions share one session key. Nonce parity keeps the two counter
/// streams disjoint, so no (key, nonce) pair is ever used twice.
#[derive(Debug)]
pub struct CipherState {
    parity: NonceParity,
    keypair: Option<KeyPair>,
    peer_public: Option<PublicKey>,
    local_key: Option<SymmetricKey>,
    peer_key: Option<SymmetricKey>,
    nonce: u64,
    last_peer_nonce: Option<u64>,
    bytes_transferred: u64,
    transfer_limit: u64,
}

impl CipherState {
    /// Fresh state encrypting with the given nonce parity.
    pub fn new(parity: NonceParity) -> Self {
        Self {
            parity,
            keypair: None,
            peer_public: None,
            local_key: None,
            peer_key: None,
            nonce: parity.initial(),
            last_peer_nonce: None,
            bytes_transferred: 0,
            transfer_limit: DEFAULT_TRANSFER_LIMIT,
        }
    }

    /// Override the transfer ceiling.
    #[must_use]
    pub fn with_transfer_limit(mut self, limit: u64) -> Self {
        self.transfer_limit = limit;
        self
    }

    /// Generate the local key pair from caller-provided random bytes,
    /// replacing any previous pair.
    pub fn generate_key_pair(&mut self, seed: &[u8; KEY_PAIR_SEED_SIZE]) {
        self.keypair = Some(KeyPair::from_seed(seed));
    }

    /// Export the local public key.
    ///
    /// # Errors
    ///
    /// - `CryptoError::NoLocalKey` before [`Self::generate_key_pair`]
    pub fn export_public_key(&self) -> Result<[u8; PUBLIC_KEY_SIZE], CryptoError> {
        let pair = self.keypair.as_ref().ok_or(CryptoError::NoLocalKey)?;
        Ok(pair.public_key().to_bytes())
    }

    /// Register the peer's public key.
    ///
    /// # Errors
    ///
    /// - `CryptoError::MalformedKey` if `bytes` is not a valid public key
    pub fn import_peer_public_key(&mut self, bytes: &[u8]) -> Result<(), CryptoError> {
        self.peer_public = Some(PublicKey::from_bytes(bytes)?);
        Ok(())
    }

    /// Install a freshly generated session key for both directions.
    ///
    /// `key` MUST come from a cryptographically secure source.
    pub fn generate_symmetric_key(&mut self, key: [u8; SYMMETRIC_KEY_SIZE]) {
        let key = SymmetricKey::from_bytes(key);
        self.peer_key = Some(key.clone());
        self.local_key = Some(key);
    }

    /// Seal the local session key to the peer's public key.
    ///
    /// # Errors
    ///
    /// - `CryptoError::NoPeerKey` if no peer key is registered
    /// - `CryptoError::NoLocalKey` if no session key exists
    pub fn export_symmetric_key_for_peer(
        &self,
        ephemeral_seed: [u8; 32],
    ) -> Result<Vec<u8>, CryptoError> {
        let peer = self.peer_public.as_ref().ok_or(CryptoError::NoPeerKey)?;
        let key = self.local_key.as_ref().ok_or(CryptoError::NoLocalKey)?;
        Ok(seal_key(key, peer, ephemeral_seed))
    }

    /// Open a sealed session key from the peer and adopt it for both
    /// directions.
    ///
    /// # Errors
    ///
    /// - `CryptoError::NoLocalKey` before [`Self::generate_key_pair`]
    /// - `CryptoError::DecryptionFailed` on corrupt or forged input
    pub fn import_symmetric_key_from_peer(&mut self, sealed: &[u8]) -> Result<(), CryptoError> {
        let pair = self.keypair.as_ref().ok_or(CryptoError::NoLocalKey)?;
        let key = open_key(sealed, pair)?;
        self.local_key = Some(key.clone());
        self.peer_key = Some(key);
        Ok(())
    }

    /// Sign `hash(secret ‖ salt)` with the local key pair.
    ///
    /// # Errors
    ///
    /// - `CryptoError::NoLocalKey` before [`Self::generate_key_pair`]
    pub fn compute_auth_token(
        &self,
        secret: &[u8],
        salt: Vec<u8>,
    ) -> Result<AuthToken, CryptoError> {
        let pair = self.keypair.as_ref().ok_or(CryptoError::NoLocalKey)?;
        Ok(AuthToken::sign(secret, salt, pair))
    }

    /// Check an encoded auth token against the peer's public key.
    ///
    /// Never errors: a missing peer key, undecodable token, or bad signature
    /// all yield `false`.
    pub fn verify_auth_token(&self, secret: &[u8], token: &[u8]) -> bool {
        let Some(peer) = self.peer_public.as_ref() else {
            return false;
        };
        AuthToken::from_bytes(token).is_some_and(|token| token.verify(secret, peer))
    }

    /// Encrypt a plaintext into `counter (u64 BE) ‖ ciphertext ‖ tag`.
    ///
    /// # Errors
    ///
    /// - `CryptoError::ReauthenticationRequired` once the transfer ceiling is
    ///   reached or the counter would overflow
    /// - `CryptoError::NoLocalKey` if no session key exists
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if self.bytes_transferred >= self.transfer_limit {
            return Err(self.reauthentication_required());
        }
        let key = self.local_key.as_ref().ok_or(CryptoError::NoLocalKey)?;
        let next = self.nonce.checked_add(2).ok_or_else(|| self.reauthentication_required())?;

        self.nonce = next;
        let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
        let Ok(ciphertext) = cipher.encrypt(Nonce::from_slice(&build_nonce(next)), plaintext)
        else {
            unreachable!("ChaCha20-Poly1305 encryption cannot fail with valid inputs");
        };

        self.bytes_transferred = self.bytes_transferred.saturating_add(plaintext.len() as u64);

        let mut out = Vec::with_capacity(NONCE_COUNTER_SIZE + ciphertext.len());
        out.extend_from_slice(&next.to_be_bytes());
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt a sealed frame from the peer.
    ///
    /// # Errors
    ///
    /// - `CryptoError::AuthenticationFailed` if the frame is too short or the
    ///   tag does not verify
    /// - `CryptoError::ReplayedNonce` if the counter has our parity or is not
    ///   above the last accepted one
    /// - `CryptoError::NoLocalKey` if no session key exists
    pub fn decrypt(&mut self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < SEALED_OVERHEAD {
            return Err(CryptoError::AuthenticationFailed);
        }
        let key = self.peer_key.as_ref().ok_or(CryptoError::NoLocalKey)?;

        let mut counter = [0u8; NONCE_COUNTER_SIZE];
        counter.copy_from_slice(&sealed[..NONCE_COUNTER_SIZE]);
        let counter = u64::from_be_bytes(counter);

        let fresh = self.last_peer_nonce.is_none_or(|last| counter > last);
        if self.parity.matches(counter) || !fresh {
            return Err(CryptoError::ReplayedNonce { nonce: counter });
        }

        let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&build_nonce(counter)), &sealed[NONCE_COUNTER_SIZE..])
            .map_err(|_| CryptoError::AuthenticationFailed)?;

        self.last_peer_nonce = Some(counter);
        self.bytes_transferred = self.bytes_transferred.saturating_add(plaintext.len() as u64);
        Ok(plaintext)
    }

    /// True once a session key is installed.
    pub fn is_established(&self) -> bool {
        self.local_key.is_some() && self.peer_key.is_some()
    }

    /// Our encryption parity.
    pub fn parity(&self) -> NonceParity {
        self.parity
    }

    /// Counter used by the most recent encryption (the initial value before
    /// any).
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// Configured transfer ceiling.
    pub fn transfer_limit(&self) -> u64 {
        self.transfer_limit
    }

    fn reauthentication_required(&self) -> CryptoError {
        CryptoError::ReauthenticationRequired {
            transferred: self.bytes_transferred,
            limit: self.transfer_limit,
        }
    }
}

/// 96-bit nonce: four zero bytes followed by the big-endian counter.
fn build_nonce(counter: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[4..].copy_from_slice(&counter.to_be_bytes());
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Run the key exchange between a responder and an initiator.
    fn established_pair() -> (CipherState, CipherState) {
        let mut server = CipherState::new(NonceParity::Even);
        let mut client = CipherState::new(NonceParity::Odd);

        client.generate_key_pair(&[1u8; KEY_PAIR_SEED_SIZE]);
        server.import_peer_public_key(&client.export_public_key().unwrap()).unwrap();
        server.generate_symmetric_key([2u8; 32]);

        let sealed = server.export_symmetric_key_for_peer([3u8; 32]).unwrap();
        client.import_symmetric_key_from_peer(&sealed).unwrap();

        (server, client)
    }

    #[test]
    fn both_directions_roundtrip() {
        let (mut server, mut client) = established_pair();

        let sealed = client.encrypt(b"hello server").unwrap();
        assert_eq!(server.decrypt(&sealed).unwrap(), b"hello server");

        let sealed = server.encrypt(b"hello client").unwrap();
        assert_eq!(client.decrypt(&sealed).unwrap(), b"hello client");
    }

    #[test]
    fn nonces_advance_by_two_with_parity() {
        let (mut server, mut client) = established_pair();

        assert_eq!(server.nonce(), 0);
        assert_eq!(client.nonce(), 1);

        server.encrypt(b"a").unwrap();
        server.encrypt(b"b").unwrap();
        client.encrypt(b"c").unwrap();

        assert_eq!(server.nonce(), 4);
        assert_eq!(client.nonce(), 3);
    }

    #[test]
    fn tampered_tag_fails_authentication() {
        let (mut server, mut client) = established_pair();

        let mut sealed = client.encrypt(b"payload").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x80;

        assert_eq!(server.decrypt(&sealed), Err(CryptoError::AuthenticationFailed));
    }

    #[test]
    fn short_frame_fails_authentication() {
        let (mut server, _) = established_pair();
        assert_eq!(server.decrypt(&[0u8; 10]), Err(CryptoError::AuthenticationFailed));
    }

    #[test]
    fn replayed_frame_rejected() {
        let (mut server, mut client) = established_pair();

        let sealed = client.encrypt(b"once").unwrap();
        server.decrypt(&sealed).unwrap();

        assert_eq!(server.decrypt(&sealed), Err(CryptoError::ReplayedNonce { nonce: 3 }));
    }

    #[test]
    fn reflected_frame_rejected() {
        let (mut server, _) = established_pair();

        // A server frame bounced back at the server has the server's parity
        let sealed = server.encrypt(b"mirror").unwrap();
        assert_eq!(server.decrypt(&sealed), Err(CryptoError::ReplayedNonce { nonce: 2 }));
    }

    #[test]
    fn encrypt_refuses_past_transfer_limit() {
        let (_, client) = established_pair();
        let mut client = client.with_transfer_limit(8);

        client.encrypt(b"12345678").unwrap();
        let result = client.encrypt(b"x");

        assert_eq!(
            result,
            Err(CryptoError::ReauthenticationRequired { transferred: 8, limit: 8 })
        );
    }

    #[test]
    fn decrypted_bytes_count_toward_limit() {
        let (server, client) = established_pair();
        let mut server = server.with_transfer_limit(4);
        let mut client = client;

        let sealed = client.encrypt(b"abcd").unwrap();
        server.decrypt(&sealed).unwrap();

        assert!(server.encrypt(b"reply").unwrap_err().requires_reauthentication());
    }

    #[test]
    fn key_transport_needs_peer_key() {
        let mut server = CipherState::new(NonceParity::Even);
        server.generate_symmetric_key([2u8; 32]);

        assert_eq!(server.export_symmetric_key_for_peer([0u8; 32]), Err(CryptoError::NoPeerKey));
    }

    #[test]
    fn key_import_needs_key_pair() {
        let mut client = CipherState::new(NonceParity::Odd);
        assert_eq!(client.import_symmetric_key_from_peer(&[0u8; 80]), Err(CryptoError::NoLocalKey));
    }

    #[test]
    fn malformed_peer_key_rejected() {
        let mut server = CipherState::new(NonceParity::Even);
        assert_eq!(server.import_peer_public_key(b"not a key"), Err(CryptoError::MalformedKey));
        assert_eq!(server.export_symmetric_key_for_peer([1u8; 32]), Err(CryptoError::NoPeerKey));
    }

    #[test]
    fn auth_token_verified_against_peer_key() {
        let mut server = CipherState::new(NonceParity::Even);
        let mut client = CipherState::new(NonceParity::Odd);
        client.generate_key_pair(&[1u8; KEY_PAIR_SEED_SIZE]);
        server.import_peer_public_key(&client.export_public_key().unwrap()).unwrap();

        let token = client.compute_auth_token(b"pw", vec![9; 64]).unwrap().to_bytes();

        assert!(server.verify_auth_token(b"pw", &token));
        assert!(!server.verify_auth_token(b"other", &token));
        assert!(!server.verify_auth_token(b"pw", b"garbage"));
    }

    #[test]
    fn encrypt_without_key_fails() {
        let mut state = CipherState::new(NonceParity::Odd);
        assert_eq!(state.encrypt(b"x"), Err(CryptoError::NoLocalKey));
        assert!(!state.is_established());
    }
}
