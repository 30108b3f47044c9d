//! Application messages.
//!
//! A [`Message`] is what an established session exchanges: it is
//! CBOR-encoded, encrypted, and framed by the layers below. Messages are
//! ephemeral. The router consumes them and nothing is persisted.

use serde::{Deserialize, Serialize};

use crate::{
    codec,
    errors::{ProtocolError, Result},
};

/// What a message asks the receiver to do.
///
/// The discriminants are protocol constants and go on the wire as a single
/// byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum Action {
    /// Chat text for a user or a room
    Message = 0,
    /// Fatal error; the sender is disconnected
    Error = 1,
    /// A user left the server
    Logout = 2,
    /// Create a room named by the payload and join it
    CreateRoom = 3,
    /// Join the room named by `recipient_id`
    JoinRoom = 4,
    /// Leave the room named by `recipient_id`
    LeaveRoom = 5,
    /// Payload is a full [`crate::DirectorySnapshot`]
    CacheRefresh = 6,
    /// Liveness probe
    Ping = 7,
    /// Reply to [`Action::Ping`]
    Pong = 8,
}

impl Action {
    /// Wire value of this action.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Parse a wire value. `None` for unknown values.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Action::Message),
            1 => Some(Action::Error),
            2 => Some(Action::Logout),
            3 => Some(Action::CreateRoom),
            4 => Some(Action::JoinRoom),
            5 => Some(Action::LeaveRoom),
            6 => Some(Action::CacheRefresh),
            7 => Some(Action::Ping),
            8 => Some(Action::Pong),
            _ => None,
        }
    }

    /// True for actions that change room membership and therefore require a
    /// directory re-sync.
    pub fn changes_membership(self) -> bool {
        matches!(self, Action::CreateRoom | Action::JoinRoom | Action::LeaveRoom)
    }
}

impl TryFrom<u8> for Action {
    type Error = ProtocolError;

    fn try_from(value: u8) -> std::result::Result<Self, ProtocolError> {
        Self::from_u8(value).ok_or(ProtocolError::UnknownAction(value))
    }
}

impl From<Action> for u8 {
    fn from(action: Action) -> Self {
        action.to_u8()
    }
}

/// Message bit-flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageFlags(u8);

impl MessageFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);

    /// The message should be shown to the user.
    pub const RENDER: Self = Self(0x01);

    /// Raw bits.
    pub fn bits(self) -> u8 {
        self.0
    }

    /// Build from raw bits. Unknown bits are preserved.
    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// True if every bit in `other` is set.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Shorthand for `contains(MessageFlags::RENDER)`.
    pub fn is_renderable(self) -> bool {
        self.contains(Self::RENDER)
    }
}

/// One application-level message.
///
/// `recipient_id` names either a user or a room; user and room IDs are drawn
/// from the same server-side counter so the two never collide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Sending user. Overwritten by the server with the authenticated
    /// session's ID, so a client cannot speak for someone else.
    pub sender_id: u64,
    /// Target user or room
    pub recipient_id: u64,
    /// Unix seconds at which the message was built
    pub send_time: u64,
    /// What to do with it
    pub action: Action,
    /// Opaque payload (UTF-8 text, room name, or an encoded snapshot)
    pub data: Vec<u8>,
    /// Presentation flags
    pub flags: MessageFlags,
}

impl Message {
    /// Build a message with zeroed sender and timestamp and no flags.
    pub fn new(action: Action, recipient_id: u64, data: impl Into<Vec<u8>>) -> Self {
        Self {
            sender_id: 0,
            recipient_id,
            send_time: 0,
            action,
            data: data.into(),
            flags: MessageFlags::NONE,
        }
    }

    /// A renderable text message.
    pub fn text(recipient_id: u64, text: &str) -> Self {
        Self::new(Action::Message, recipient_id, text.as_bytes()).with_flags(MessageFlags::RENDER)
    }

    /// Set the sender.
    #[must_use]
    pub fn with_sender(mut self, sender_id: u64) -> Self {
        self.sender_id = sender_id;
        self
    }

    /// Set the send time (Unix seconds).
    #[must_use]
    pub fn with_send_time(mut self, send_time: u64) -> Self {
        self.send_time = send_time;
        self
    }

    /// Set the flags.
    #[must_use]
    pub fn with_flags(mut self, flags: MessageFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Payload as UTF-8, if it is valid UTF-8.
    pub fn data_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
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
    /// - `ProtocolError::CborDecode` for malformed bytes or an unknown action
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        codec::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_wire_values_are_stable() {
        assert_eq!(Action::Message.to_u8(), 0);
        assert_eq!(Action::Error.to_u8(), 1);
        assert_eq!(Action::Logout.to_u8(), 2);
        assert_eq!(Action::CreateRoom.to_u8(), 3);
        assert_eq!(Action::JoinRoom.to_u8(), 4);
        assert_eq!(Action::LeaveRoom.to_u8(), 5);
        assert_eq!(Action::CacheRefresh.to_u8(), 6);
        assert_eq!(Action::Ping.to_u8(), 7);
        assert_eq!(Action::Pong.to_u8(), 8);
    }

    #[test]
    fn action_from_u8_rejects_unknown() {
        for value in 0..=8u8 {
            assert_eq!(Action::from_u8(value).map(Action::to_u8), Some(value));
        }
        assert_eq!(Action::from_u8(9), None);
        assert_eq!(Action::try_from(200), Err(ProtocolError::UnknownAction(200)));
    }

    #[test]
    fn membership_actions() {
        assert!(Action::CreateRoom.changes_membership());
        assert!(Action::JoinRoom.changes_membership());
        assert!(Action::LeaveRoom.changes_membership());
        assert!(!Action::Message.changes_membership());
        assert!(!Action::CacheRefresh.changes_membership());
    }

    #[test]
    fn flags_contain() {
        assert!(MessageFlags::RENDER.is_renderable());
        assert!(!MessageFlags::NONE.is_renderable());
        assert_eq!(MessageFlags::from_bits(0x81).bits(), 0x81);
        assert!(MessageFlags::from_bits(0x81).is_renderable());
    }

    #[test]
    fn message_cbor_roundtrip() {
        let msg = Message::text(42, "hi").with_sender(7).with_send_time(1_700_000_000);

        let bytes = msg.to_bytes().unwrap();
        let decoded = Message::from_bytes(&bytes).unwrap();

        assert_eq!(decoded, msg);
        assert_eq!(decoded.data_str(), Some("hi"));
    }

    #[test]
    fn garbage_fails_to_decode() {
        let result = Message::from_bytes(&[0xff, 0x00, 0x13]);
        assert!(matches!(result, Err(ProtocolError::CborDecode(_))));
    }
}
