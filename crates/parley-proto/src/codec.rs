//! Shared CBOR helpers.

use serde::{Serialize, de::DeserializeOwned};

use crate::errors::{ProtocolError, Result};

pub(crate) fn to_vec<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::ser::into_writer(value, &mut out)
        .map_err(|e| ProtocolError::CborEncode(e.to_string()))?;
    Ok(out)
}

pub(crate) fn from_slice<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::CborDecode(e.to_string()))
}
