//! Session directory.
//!
//! The authoritative view of who is connected and which rooms exist. Three
//! views over the same user set are kept consistent: by user ID, by runtime
//! descriptor (for event lookup), and partitioned into unauthenticated and
//! authenticated. Every mutation touches all views at once, so there is no
//! window in which a user is reachable through one view but not another.
//!
//! The directory holds metadata only. The sessions themselves (channel,
//! handshake, timestamps) are owned by the driver and keyed by the same IDs.
//!
//! Rooms are garbage-collected when their last member leaves.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use parley_proto::{DirectorySnapshot, RoomEntry};
use thiserror::Error;

/// Directory lookup and mutation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// `authenticate` on a user that is not in the unauthenticated partition
    #[error("user {0} is not pending authentication")]
    NotPending(u64),

    /// No user with this ID
    #[error("user not found: {0}")]
    UserNotFound(u64),

    /// No room with this ID
    #[error("room not found: {0}")]
    RoomNotFound(u64),

    /// Room ID already in use
    #[error("room already exists: {0}")]
    RoomExists(u64),
}

/// Metadata for one connected user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEntry {
    /// Runtime descriptor of the user's connection
    pub descriptor: u64,
    /// Display name
    pub name: String,
}

/// A chat room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    /// Display name
    pub name: String,
    /// Member user IDs
    pub members: BTreeSet<u64>,
}

/// What [`SessionDirectory::remove_user`] took out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedUser {
    /// The user's metadata
    pub entry: UserEntry,
    /// Whether the user had completed authentication
    pub was_authenticated: bool,
    /// Rooms the user was a member of
    pub rooms: BTreeSet<u64>,
}

/// Authoritative directory of users and rooms.
#[derive(Debug)]
pub struct SessionDirectory {
    next_id: u64,
    users: BTreeMap<u64, UserEntry>,
    by_descriptor: HashMap<u64, u64>,
    unauthenticated: BTreeSet<u64>,
    authenticated: BTreeSet<u64>,
    rooms: BTreeMap<u64, Room>,
    user_rooms: HashMap<u64, BTreeSet<u64>>,
}

impl Default for SessionDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionDirectory {
    /// Empty directory. The first allocated ID is 1.
    pub fn new() -> Self {
        Self {
            next_id: 1,
            users: BTreeMap::new(),
            by_descriptor: HashMap::new(),
            unauthenticated: BTreeSet::new(),
            authenticated: BTreeSet::new(),
            rooms: BTreeMap::new(),
            user_rooms: HashMap::new(),
        }
    }

    /// Next unique ID. Users and rooms share one counter, so an ID names at
    /// most one of them and is never reused while the process runs.
    pub fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Register a just-accepted connection as an unauthenticated user.
    pub fn new_user(&mut self, descriptor: u64, name: impl Into<String>) -> u64 {
        let id = self.allocate_id();
        self.users.insert(id, UserEntry { descriptor, name: name.into() });
        self.by_descriptor.insert(descriptor, id);
        self.unauthenticated.insert(id);
        id
    }

    /// Move a user from the unauthenticated to the authenticated partition.
    ///
    /// # Errors
    ///
    /// - `DirectoryError::NotPending` if the user is unknown or already
    ///   authenticated
    pub fn authenticate(&mut self, user_id: u64) -> Result<(), DirectoryError> {
        if !self.unauthenticated.remove(&user_id) {
            return Err(DirectoryError::NotPending(user_id));
        }
        self.authenticated.insert(user_id);
        Ok(())
    }

    /// Remove a user from every view and every room. Idempotent: a second
    /// call returns `None`.
    pub fn remove_user(&mut self, user_id: u64) -> Option<RemovedUser> {
        let entry = self.users.remove(&user_id)?;
        self.by_descriptor.remove(&entry.descriptor);
        self.unauthenticated.remove(&user_id);
        let was_authenticated = self.authenticated.remove(&user_id);

        let rooms = self.user_rooms.remove(&user_id).unwrap_or_default();
        for room_id in &rooms {
            self.drop_member(*room_id, user_id);
        }

        Some(RemovedUser { entry, was_authenticated, rooms })
    }

    /// Change a user's display name.
    ///
    /// # Errors
    ///
    /// - `DirectoryError::UserNotFound` if the user does not exist
    pub fn rename(&mut self, user_id: u64, name: impl Into<String>) -> Result<(), DirectoryError> {
        let entry = self.users.get_mut(&user_id).ok_or(DirectoryError::UserNotFound(user_id))?;
        entry.name = name.into();
        Ok(())
    }

    /// Create an empty room under a caller-chosen ID.
    ///
    /// # Errors
    ///
    /// - `DirectoryError::RoomExists` if the ID names a room already
    pub fn new_room(
        &mut self,
        room_id: u64,
        name: impl Into<String>,
    ) -> Result<(), DirectoryError> {
        if self.rooms.contains_key(&room_id) {
            return Err(DirectoryError::RoomExists(room_id));
        }
        self.rooms.insert(room_id, Room { name: name.into(), members: BTreeSet::new() });
        Ok(())
    }

    /// Add an authenticated user to a room. Returns false if already a
    /// member.
    ///
    /// # Errors
    ///
    /// - `DirectoryError::RoomNotFound` if the room does not exist
    /// - `DirectoryError::UserNotFound` if the user is not authenticated
    pub fn join_room(&mut self, user_id: u64, room_id: u64) -> Result<bool, DirectoryError> {
        if !self.authenticated.contains(&user_id) {
            return Err(DirectoryError::UserNotFound(user_id));
        }
        let room = self.rooms.get_mut(&room_id).ok_or(DirectoryError::RoomNotFound(room_id))?;

        let joined = room.members.insert(user_id);
        self.user_rooms.entry(user_id).or_default().insert(room_id);
        Ok(joined)
    }

    /// Remove a user from a room. Returns false if the user was not a member.
    /// The room is deleted once empty.
    ///
    /// # Errors
    ///
    /// - `DirectoryError::RoomNotFound` if the room does not exist
    pub fn leave_room(&mut self, user_id: u64, room_id: u64) -> Result<bool, DirectoryError> {
        if !self.rooms.contains_key(&room_id) {
            return Err(DirectoryError::RoomNotFound(room_id));
        }

        let was_member =
            self.user_rooms.get_mut(&user_id).is_some_and(|rooms| rooms.remove(&room_id));
        if was_member {
            self.drop_member(room_id, user_id);
        }
        Ok(was_member)
    }

    fn drop_member(&mut self, room_id: u64, user_id: u64) {
        let Some(room) = self.rooms.get_mut(&room_id) else {
            return;
        };
        room.members.remove(&user_id);
        if room.members.is_empty() {
            self.rooms.remove(&room_id);
        }
    }

    /// Members of a room in ascending ID order, or empty if the room does
    /// not exist.
    pub fn users_in_room(&self, room_id: u64) -> Vec<u64> {
        self.rooms
            .get(&room_id)
            .map(|room| room.members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Projection sent to clients: authenticated users and all rooms.
    pub fn to_snapshot(&self) -> DirectorySnapshot {
        let users = self
            .authenticated
            .iter()
            .filter_map(|id| self.users.get(id).map(|entry| (*id, entry.name.clone())))
            .collect();
        let rooms = self
            .rooms
            .iter()
            .map(|(id, room)| {
                (*id, RoomEntry { name: room.name.clone(), members: room.members.clone() })
            })
            .collect();

        DirectorySnapshot { users, rooms }
    }

    /// User ID for a runtime descriptor.
    pub fn id_for_descriptor(&self, descriptor: u64) -> Option<u64> {
        self.by_descriptor.get(&descriptor).copied()
    }

    /// User metadata.
    pub fn user(&self, user_id: u64) -> Option<&UserEntry> {
        self.users.get(&user_id)
    }

    /// Room metadata.
    pub fn room(&self, room_id: u64) -> Option<&Room> {
        self.rooms.get(&room_id)
    }

    /// True if `id` names an existing room.
    pub fn is_room(&self, id: u64) -> bool {
        self.rooms.contains_key(&id)
    }

    /// True if `id` names an authenticated user.
    pub fn is_authenticated(&self, id: u64) -> bool {
        self.authenticated.contains(&id)
    }

    /// Authenticated user IDs in ascending order.
    pub fn authenticated_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.authenticated.iter().copied()
    }

    /// Unauthenticated user IDs in ascending order.
    pub fn unauthenticated_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.unauthenticated.iter().copied()
    }

    /// Number of users in either partition.
    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Number of rooms.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Check the cross-view invariants. Used by tests and the simulation
    /// harness after every step.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violated invariant.
    pub fn check_consistency(&self) -> Result<(), String> {
        for (id, entry) in &self.users {
            if self.by_descriptor.get(&entry.descriptor) != Some(id) {
                return Err(format!("user {id} not reachable by descriptor {}", entry.descriptor));
            }
            let partitions = usize::from(self.unauthenticated.contains(id))
                + usize::from(self.authenticated.contains(id));
            if partitions != 1 {
                return Err(format!("user {id} is in {partitions} partitions"));
            }
        }
        if self.by_descriptor.len() != self.users.len() {
            return Err("stale descriptor entries".to_string());
        }
        if self.unauthenticated.len() + self.authenticated.len() != self.users.len() {
            return Err("partition contains unknown user".to_string());
        }

        for (room_id, room) in &self.rooms {
            if room.members.is_empty() {
                return Err(format!("room {room_id} is empty but not collected"));
            }
            for member in &room.members {
                if !self.authenticated.contains(member) {
                    return Err(format!("room {room_id} has non-authenticated member {member}"));
                }
                if !self.user_rooms.get(member).is_some_and(|rooms| rooms.contains(room_id)) {
                    return Err(format!("user {member} missing reverse index for room {room_id}"));
                }
            }
        }
        for (user_id, rooms) in &self.user_rooms {
            for room_id in rooms {
                if !self.rooms.get(room_id).is_some_and(|room| room.members.contains(user_id)) {
                    return Err(format!("reverse index lists user {user_id} in room {room_id}"));
                }
            }
        }
        Ok(())
    }
}
