//! Client events.

use crate::error::AuthFailure;

/// Everything the client reports to the application.
///
/// Produced by [`crate::Client::handle_bytes`], [`crate::Client::tick`] and
/// [`crate::Client::handle_disconnect`]. Closed: adding a variant is a
/// breaking change that [`crate::dispatch`] forces every handler to see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Server proved knowledge of the password. Messages may now be sent.
    Authenticated,

    /// Handshake failed or the connection dropped before it finished.
    AuthenticationFailed {
        /// Coarse reason, safe to display
        reason: AuthFailure,
    },

    /// Chat message from another user, or from us to a room.
    Message {
        /// Server-stamped sender
        sender_id: u64,
        /// User or room the message was addressed to
        recipient_id: u64,
        /// Message text, lossily decoded as UTF-8
        text: String,
        /// Sender's clock at send time, seconds since the Unix epoch
        send_time: u64,
    },

    /// A user left or was removed.
    Logout {
        /// User that left
        user_id: u64,
        /// Server asked for the departure to be shown
        render: bool,
    },

    /// A user joined or left a room we are in.
    RoomMembership {
        /// Room whose membership changed
        room_id: u64,
        /// User that joined or left
        user_id: u64,
        /// True for a join
        joined: bool,
    },

    /// The directory mirror was replaced by a fresh snapshot.
    DirectoryRefreshed {
        /// Mirror revision after the replacement
        revision: u64,
    },

    /// Server reported an error, or the session broke after authentication.
    ServerError {
        /// Human-readable reason
        reason: String,
    },
}
