//! Compile-time event dispatch.
//!
//! Implement only the callbacks you care about; the rest default to no-ops.
//! [`dispatch`] matches every [`ClientEvent`] variant exhaustively, so a new
//! event cannot be silently ignored by the crate.

use crate::{error::AuthFailure, event::ClientEvent};

/// Application callbacks, one per event kind.
pub trait MessageHandler {
    /// Handshake completed.
    fn on_authenticated(&mut self) {}

    /// Handshake failed or was cut short.
    fn on_authentication_failed(&mut self, _reason: AuthFailure) {}

    /// Chat message received.
    fn on_message(&mut self, _sender_id: u64, _recipient_id: u64, _text: &str, _send_time: u64) {}

    /// A user left.
    fn on_logout(&mut self, _user_id: u64, _render: bool) {}

    /// Room membership changed.
    fn on_room_membership(&mut self, _room_id: u64, _user_id: u64, _joined: bool) {}

    /// Directory mirror replaced.
    fn on_directory_refreshed(&mut self, _revision: u64) {}

    /// Server-side or session error.
    fn on_server_error(&mut self, _reason: &str) {}
}

/// Route one event to the matching callback.
pub fn dispatch<H: MessageHandler + ?Sized>(event: &ClientEvent, handler: &mut H) {
    match event {
        ClientEvent::Authenticated => handler.on_authenticated(),
        ClientEvent::AuthenticationFailed { reason } => handler.on_authentication_failed(*reason),
        ClientEvent::Message { sender_id, recipient_id, text, send_time } => {
            handler.on_message(*sender_id, *recipient_id, text, *send_time);
        },
        ClientEvent::Logout { user_id, render } => handler.on_logout(*user_id, *render),
        ClientEvent::RoomMembership { room_id, user_id, joined } => {
            handler.on_room_membership(*room_id, *user_id, *joined);
        },
        ClientEvent::DirectoryRefreshed { revision } => handler.on_directory_refreshed(*revision),
        ClientEvent::ServerError { reason } => handler.on_server_error(reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
    }

    impl MessageHandler for Recorder {
        fn on_message(&mut self, sender_id: u64, _recipient_id: u64, text: &str, _send_time: u64) {
            self.calls.push(format!("message {sender_id} {text}"));
        }

        fn on_logout(&mut self, user_id: u64, _render: bool) {
            self.calls.push(format!("logout {user_id}"));
        }
    }

    #[test]
    fn dispatch_reaches_overridden_callbacks() {
        let mut recorder = Recorder::default();
        let events = [
            ClientEvent::Authenticated,
            ClientEvent::Message {
                sender_id: 4,
                recipient_id: 5,
                text: "hi".to_string(),
                send_time: 0,
            },
            ClientEvent::DirectoryRefreshed { revision: 1 },
            ClientEvent::Logout { user_id: 4, render: true },
        ];

        for event in &events {
            dispatch(event, &mut recorder);
        }

        assert_eq!(recorder.calls, vec!["message 4 hi", "logout 4"]);
    }
}
