//! Message router.
//!
//! Decides what an authenticated user's message means: who receives it, and
//! which directory mutation it asks for. The router never touches sessions or
//! sockets. It returns [`RouteAction`]s and the driver carries them out.

use parley_proto::{Action, Message, MessageFlags};
use thiserror::Error;

use crate::directory::{DirectoryError, SessionDirectory};

/// Longest room name kept from a `CREATE_ROOM` payload, in characters.
pub const MAX_ROOM_NAME_CHARS: usize = 64;

/// Router decisions for the driver to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteAction {
    /// Encrypt `message` to `recipient`'s channel
    Deliver {
        /// Target user ID
        recipient: u64,
        /// Message to deliver
        message: Message,
    },

    /// Tear down this user's session and announce the departure
    Disconnect {
        /// User to disconnect
        user_id: u64,
    },

    /// Room membership changed; a snapshot broadcast is due
    DirectoryChanged,
}

/// Messages the router could not act on.
///
/// Never fatal for the sender's session. The driver logs and drops.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    /// `MESSAGE` addressed to an ID that is neither a room nor an
    /// authenticated user
    #[error("unknown recipient: {0}")]
    UnknownRecipient(u64),

    /// Directory rejected the requested mutation
    #[error("directory error: {0}")]
    Directory(#[from] DirectoryError),
}

/// Route one message from `sender`.
///
/// `sender_id` is overwritten with `sender` before anything else, so a client
/// can never speak for another user. `now_secs` stamps replies the server
/// originates.
///
/// # Errors
///
/// - `RouteError::UnknownRecipient` for a `MESSAGE` to nobody
/// - `RouteError::Directory` for a join or leave on a missing room
pub fn route(
    directory: &mut SessionDirectory,
    sender: u64,
    message: Message,
    now_secs: u64,
) -> Result<Vec<RouteAction>, RouteError> {
    let message = message.with_sender(sender);
    let resync = message.action.changes_membership();

    let mut actions = match message.action {
        Action::Error | Action::Logout => vec![RouteAction::Disconnect { user_id: sender }],

        Action::Message => {
            let recipient = message.recipient_id;
            if directory.is_room(recipient) {
                deliver_to(directory.users_in_room(recipient), &message)
            } else if directory.is_authenticated(recipient) {
                vec![RouteAction::Deliver { recipient, message }]
            } else {
                return Err(RouteError::UnknownRecipient(recipient));
            }
        },

        Action::CreateRoom => {
            let room_id = directory.allocate_id();
            let name = room_name(&message, room_id);
            directory.new_room(room_id, name)?;
            directory.join_room(sender, room_id)?;
            Vec::new()
        },

        Action::JoinRoom => {
            let room_id = message.recipient_id;
            directory.join_room(sender, room_id)?;
            deliver_to(directory.users_in_room(room_id), &message)
        },

        Action::LeaveRoom => {
            let room_id = message.recipient_id;
            directory.leave_room(sender, room_id)?;

            // Post-mutation members; empty if the room was collected
            deliver_to(directory.users_in_room(room_id), &message)
        },

        Action::Ping => {
            let pong = Message::new(Action::Pong, sender, Vec::new())
                .with_send_time(now_secs)
                .with_flags(MessageFlags::NONE);
            vec![RouteAction::Deliver { recipient: sender, message: pong }]
        },

        // Server-to-client only, or a heartbeat reply with nothing to do
        Action::Pong | Action::CacheRefresh => Vec::new(),
    };

    if resync {
        actions.push(RouteAction::DirectoryChanged);
    }
    Ok(actions)
}

fn deliver_to(recipients: Vec<u64>, message: &Message) -> Vec<RouteAction> {
    recipients
        .into_iter()
        .map(|recipient| RouteAction::Deliver { recipient, message: message.clone() })
        .collect()
}

/// Room name from the payload: trimmed, truncated, and never empty.
fn room_name(message: &Message, room_id: u64) -> String {
    let name: String = message
        .data_str()
        .map(str::trim)
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_ROOM_NAME_CHARS)
        .collect();

    if name.is_empty() { format!("room-{room_id}") } else { name }
}
