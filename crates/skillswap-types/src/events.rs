use serde::{Deserialize, Serialize};

use crate::api::ChatMessage;

/// Events sent FROM server TO client over the chat WebSocket. Every event is
/// scoped to one exchange; the dispatcher only delivers it to connections
/// that joined that exchange's room.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ChatEvent {
    /// Server confirms the client joined an exchange room.
    JoinedExchange { exchange_id: i64 },

    /// A participant started or stopped typing. Ephemeral: never persisted,
    /// clients expire it on their own after ~1.5s of silence.
    Typing {
        exchange_id: i64,
        from_user_id: i64,
        is_typing: bool,
    },

    /// A new message was persisted. Carries the decrypted display form; the
    /// durable source of truth remains the REST listing.
    NewMessage {
        exchange_id: i64,
        message: Box<ChatMessage>,
    },

    /// A participant marked the conversation read.
    Read { exchange_id: i64, user_id: i64 },
}

/// Commands sent FROM client TO server. Authentication happens once, via
/// `identify`, right after connecting; every later command is checked against
/// the rooms the connection has successfully joined.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ChatCommand {
    /// Authenticate the WebSocket connection with a bearer token.
    Identify { token: String },

    /// Subscribe to an exchange's chat room. Runs the same eligibility check
    /// as the REST message listing.
    JoinExchange { exchange_id: i64 },

    /// Broadcast a typing indicator to the room.
    Typing { exchange_id: i64, is_typing: bool },

    /// Persist and fan out a message. Same validation and persistence path
    /// as `POST /exchanges/{id}/messages`.
    SendMessage { exchange_id: i64, body: String },

    /// Mark all messages addressed to this user as read.
    MarkRead { exchange_id: i64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_wire_tags_are_snake_case() {
        let cmd: ChatCommand =
            serde_json::from_str(r#"{"type":"join_exchange","data":{"exchange_id":7}}"#)
                .expect("parse");
        match cmd {
            ChatCommand::JoinExchange { exchange_id } => assert_eq!(exchange_id, 7),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn event_wire_tags_are_snake_case() {
        let json = serde_json::to_string(&ChatEvent::Read { exchange_id: 3, user_id: 9 })
            .expect("serialize");
        assert!(json.contains(r#""type":"read""#), "got {json}");
    }
}
