//! Read-only mirror of the server's directory.
//!
//! Never patched incrementally: every `CACHE_REFRESH` replaces it wholesale,
//! so the mirror is exactly the server's state at the last refresh.

use parley_proto::{DirectorySnapshot, RoomEntry};

/// Client-side copy of users and rooms.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryMirror {
    snapshot: DirectorySnapshot,
    revision: u64,
}

impl DirectoryMirror {
    /// Empty mirror at revision 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the contents and bump the revision. Returns the new revision.
    pub fn replace(&mut self, snapshot: DirectorySnapshot) -> u64 {
        self.snapshot = snapshot;
        self.revision += 1;
        self.revision
    }

    /// Number of refreshes applied.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Last snapshot received.
    pub fn snapshot(&self) -> &DirectorySnapshot {
        &self.snapshot
    }

    /// Display name for a user.
    pub fn user_name(&self, user_id: u64) -> Option<&str> {
        self.snapshot.user_name(user_id)
    }

    /// Name for a user or room, falling back to `#id` for unknown IDs.
    pub fn label(&self, id: u64) -> String {
        self.snapshot
            .user_name(id)
            .or_else(|| self.snapshot.room(id).map(|room| room.name.as_str()))
            .map_or_else(|| format!("#{id}"), str::to_string)
    }

    /// Room by ID.
    pub fn room(&self, room_id: u64) -> Option<&RoomEntry> {
        self.snapshot.room(room_id)
    }

    /// Authenticated users, ordered by ID.
    pub fn users(&self) -> impl Iterator<Item = (u64, &str)> {
        self.snapshot.users.iter().map(|(id, name)| (*id, name.as_str()))
    }

    /// Rooms, ordered by ID.
    pub fn rooms(&self) -> impl Iterator<Item = (u64, &RoomEntry)> {
        self.snapshot.rooms.iter().map(|(id, room)| (*id, room))
    }

    /// Rooms `user_id` belongs to.
    pub fn rooms_of(&self, user_id: u64) -> Vec<u64> {
        self.rooms().filter(|(_, room)| room.members.contains(&user_id)).map(|(id, _)| id).collect()
    }

    /// True if `user_id` is in room `room_id`.
    pub fn is_member(&self, user_id: u64, room_id: u64) -> bool {
        self.snapshot.is_member(user_id, room_id)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use super::*;

    fn snapshot() -> DirectorySnapshot {
        let mut users = BTreeMap::new();
        users.insert(1, "alice".to_string());
        users.insert(2, "bob".to_string());

        let mut rooms = BTreeMap::new();
        rooms.insert(3, RoomEntry { name: "lobby".to_string(), members: BTreeSet::from([1]) });

        DirectorySnapshot { users, rooms }
    }

    #[test]
    fn replace_bumps_revision() {
        let mut mirror = DirectoryMirror::new();
        assert_eq!(mirror.revision(), 0);

        assert_eq!(mirror.replace(snapshot()), 1);
        assert_eq!(mirror.replace(DirectorySnapshot::default()), 2);
        assert_eq!(mirror.users().count(), 0);
    }

    #[test]
    fn labels_and_membership() {
        let mut mirror = DirectoryMirror::new();
        mirror.replace(snapshot());

        assert_eq!(mirror.label(1), "alice");
        assert_eq!(mirror.label(3), "lobby");
        assert_eq!(mirror.label(99), "#99");
        assert!(mirror.is_member(1, 3));
        assert!(!mirror.is_member(2, 3));
        assert_eq!(mirror.rooms_of(1), vec![3]);
        assert!(mirror.rooms_of(2).is_empty());
    }
}
