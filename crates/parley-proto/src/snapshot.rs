//! Directory snapshot.
//!
//! The server serializes its whole directory into one of these after any
//! membership change and sends it as the payload of a `CACHE_REFRESH`. Clients
//! replace their mirror with it wholesale; there is no diff format.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{codec, errors::Result};

/// One room as seen in a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomEntry {
    /// Display name
    pub name: String,
    /// Member user IDs
    pub members: BTreeSet<u64>,
}

/// Serializable projection of the server directory.
///
/// Ordered maps keep the encoding deterministic: two equal directories
/// produce identical bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectorySnapshot {
    /// User ID → display name (authenticated users only)
    pub users: BTreeMap<u64, String>,
    /// Room ID → room
    pub rooms: BTreeMap<u64, RoomEntry>,
}

impl DirectorySnapshot {
    /// Display name of a user.
    pub fn user_name(&self, user_id: u64) -> Option<&str> {
        self.users.get(&user_id).map(String::as_str)
    }

    /// Room by ID.
    pub fn room(&self, room_id: u64) -> Option<&RoomEntry> {
        self.rooms.get(&room_id)
    }

    /// True if `user_id` is a member of `room_id`.
    pub fn is_member(&self, user_id: u64, room_id: u64) -> bool {
        self.rooms.get(&room_id).is_some_and(|room| room.members.contains(&user_id))
    }

    /// Encode to CBOR.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        codec::to_vec(self)
    }

    /// Decode from CBOR.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborDecode` if the bytes are not a snapshot
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        codec::from_slice(bytes)
    }
}
