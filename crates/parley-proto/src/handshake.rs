//! Handshake payloads.
//!
//! These travel as plain CBOR frames before any session key exists. Only the
//! [`KeyTransport`] body is protected, and only because it is sealed to the
//! client's public key.
//!
//! ```text
//! client                                  server
//!   │ ── ClientHello { public_key } ───────> │  phase 1
//!   │ <────── KeyTransport { sealed_key } ── │  phase 2
//!   │ ── Credentials { salt, hash, .. } ───> │  phase 3
//!   │ <──────────── ServerProof { hash } ─── │  phase 4
//! ```

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{codec, errors::Result};

/// CBOR encoding shared by every handshake payload.
pub trait HandshakePayload: Serialize + DeserializeOwned {
    /// Encode to CBOR.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    fn to_bytes(&self) -> Result<Vec<u8>> {
        codec::to_vec(self)
    }

    /// Decode from CBOR.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborDecode` if the bytes are not this payload
    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        codec::from_slice(bytes)
    }
}

/// Phase 1: client announces its public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientHello {
    /// Exported client public key
    pub public_key: Vec<u8>,
}

/// Phase 2: server sends the session key sealed to the client's public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyTransport {
    /// Session key sealed under the client's public key
    pub sealed_key: Vec<u8>,
}

/// Phase 3: client proves knowledge of the shared password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Requested display name
    pub username: String,
    /// Fresh random salt
    pub salt: Vec<u8>,
    /// `hash(password ‖ salt)`
    pub hash: Vec<u8>,
    /// Auth token binding the password hash to the phase 1 key
    pub token: Vec<u8>,
}

/// Phase 4: server proves it knows the password too.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerProof {
    /// `hash(password ‖ salt+1)`
    pub hash: Vec<u8>,
}

impl HandshakePayload for ClientHello {}
impl HandshakePayload for KeyTransport {}
impl HandshakePayload for Credentials {}
impl HandshakePayload for ServerProof {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProtocolError;

    #[test]
    fn credentials_roundtrip() {
        let creds = Credentials {
            username: "alice".to_string(),
            salt: vec![1; 64],
            hash: vec![2; 64],
            token: vec![3; 128],
        };

        let bytes = creds.to_bytes().unwrap();
        assert_eq!(Credentials::from_bytes(&bytes).unwrap(), creds);
    }

    #[test]
    fn wrong_payload_type_rejected() {
        let hello = ClientHello { public_key: vec![9; 64] };
        let bytes = hello.to_bytes().unwrap();

        let result = Credentials::from_bytes(&bytes);
        assert!(matches!(result, Err(ProtocolError::CborDecode(_))));
    }
}
