// WebSocket message types for the studia-chat.v1 protocol.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::ChatMessage;

/// All message types in the studia-chat.v1 WebSocket protocol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    /// Client -> Server: initial handshake; must be the first frame.
    Hello {
        access_token: String,
    },

    /// Server -> Client: handshake acknowledgement.
    HelloAck {
        server_time: String,
    },

    /// Client -> Server: start receiving a group's live events.
    JoinGroup {
        group_id: Uuid,
    },

    /// Client -> Server: stop receiving a group's live events.
    LeaveGroup {
        group_id: Uuid,
    },

    /// Client -> Server: publish a text message to a joined group.
    SendMessage {
        group_id: Uuid,
        message_id: Uuid,
        body: String,
    },

    /// Client -> Server: publish an already-uploaded file to a joined group.
    SendFile {
        group_id: Uuid,
        message_id: Uuid,
        file_name: String,
        file_url: String,
    },

    /// Server -> Client: publish acknowledgement to the sender.
    Ack {
        message_id: Uuid,
        persisted: bool,
    },

    /// Server -> Client: another member joined the group's live channel.
    UserJoined {
        group_id: Uuid,
        user_id: Uuid,
        joined_at: DateTime<Utc>,
    },

    /// Server -> Client: a persisted chat message, fanned out to subscribers.
    ReceiveMessage {
        message: ChatMessage,
    },

    /// Server -> Client: error.
    Error {
        code: String,
        message: String,
        retryable: bool,
    },
}

/// Decode one WebSocket text frame into a protocol message.
pub fn decode_message(raw: &str) -> Result<WsMessage, serde_json::Error> {
    serde_json::from_str(raw)
}

/// Encode a protocol message as a WebSocket text frame.
pub fn encode_message(message: &WsMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::types::MessagePayload;

    #[test]
    fn frames_are_tagged_with_snake_case_type() {
        let frame = encode_message(&WsMessage::JoinGroup { group_id: Uuid::nil() })
            .expect("frame should encode");
        let value: serde_json::Value = serde_json::from_str(&frame).expect("frame is json");
        assert_eq!(value["type"], "join_group");
    }

    #[test]
    fn hello_round_trips() {
        let original = WsMessage::Hello { access_token: "token-123".to_string() };
        let decoded = decode_message(&encode_message(&original).expect("encode"))
            .expect("decode");
        assert_eq!(decoded, original);
    }

    #[test]
    fn receive_message_carries_full_chat_message() {
        let message = ChatMessage {
            id: Uuid::new_v4(),
            group_id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            sent_at: Utc::now(),
            payload: MessagePayload::File {
                url: "https://files.example/slides".to_string(),
                name: "slides.pdf".to_string(),
            },
        };

        let frame = encode_message(&WsMessage::ReceiveMessage { message: message.clone() })
            .expect("frame should encode");
        let value: serde_json::Value = serde_json::from_str(&frame).expect("frame is json");
        assert_eq!(value["type"], "receive_message");
        assert_eq!(value["message"]["kind"], "file");
        assert_eq!(value["message"]["name"], "slides.pdf");

        match decode_message(&frame).expect("decode") {
            WsMessage::ReceiveMessage { message: decoded } => assert_eq!(decoded, message),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn unknown_type_fails_to_decode() {
        assert!(decode_message(r#"{"type":"shutdown"}"#).is_err());
    }
}
