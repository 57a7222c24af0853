use chrono::{TimeZone, Utc};
use serde_json::Value;
use studia_common::protocol::ws::WsMessage;
use studia_common::types::{ChatMessage, MessagePayload};
use uuid::Uuid;

const WS_MOD_SOURCE: &str = include_str!("../src/ws/mod.rs");

fn parse_u64_const(source: &str, name: &str) -> u64 {
    let needle = format!("{name}: ");
    let line = source
        .lines()
        .find(|line| line.contains(&needle))
        .unwrap_or_else(|| panic!("constant {name} not found"));
    let value = line.split('=').nth(1).expect("constant has a value");
    value
        .trim()
        .trim_end_matches(';')
        .replace('_', "")
        .parse()
        .unwrap_or_else(|_| panic!("constant {name} is not an integer"))
}

#[test]
fn websocket_contract_heartbeat_and_frame_limit() {
    let heartbeat_interval_ms = parse_u64_const(WS_MOD_SOURCE, "HEARTBEAT_INTERVAL_MS");
    let heartbeat_timeout_ms = parse_u64_const(WS_MOD_SOURCE, "HEARTBEAT_TIMEOUT_MS");
    let max_frame_bytes = parse_u64_const(WS_MOD_SOURCE, "MAX_FRAME_BYTES");

    assert_eq!(heartbeat_interval_ms, 15_000);
    assert_eq!(heartbeat_timeout_ms, 10_000);
    assert_eq!(max_frame_bytes, 65_536);
    assert!(
        heartbeat_timeout_ms < heartbeat_interval_ms,
        "pong timeout must be shorter than heartbeat interval",
    );
}

#[test]
fn websocket_contract_message_shapes() {
    let group_id = Uuid::new_v4();
    let message_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();

    let samples = [
        (
            WsMessage::Hello { access_token: "token".to_string() },
            "hello",
            &["type", "access_token"][..],
        ),
        (
            WsMessage::HelloAck { server_time: "2026-08-07T00:00:00Z".to_string() },
            "hello_ack",
            &["type", "server_time"][..],
        ),
        (WsMessage::JoinGroup { group_id }, "join_group", &["type", "group_id"][..]),
        (WsMessage::LeaveGroup { group_id }, "leave_group", &["type", "group_id"][..]),
        (
            WsMessage::SendMessage { group_id, message_id, body: "hi".to_string() },
            "send_message",
            &["type", "group_id", "message_id", "body"][..],
        ),
        (
            WsMessage::SendFile {
                group_id,
                message_id,
                file_name: "notes.pdf".to_string(),
                file_url: "https://files.example/abc".to_string(),
            },
            "send_file",
            &["type", "group_id", "message_id", "file_name", "file_url"][..],
        ),
        (
            WsMessage::Ack { message_id, persisted: true },
            "ack",
            &["type", "message_id", "persisted"][..],
        ),
        (
            WsMessage::UserJoined {
                group_id,
                user_id,
                joined_at: Utc.timestamp_opt(1_717_200_000, 0).unwrap(),
            },
            "user_joined",
            &["type", "group_id", "user_id", "joined_at"][..],
        ),
        (
            WsMessage::ReceiveMessage {
                message: ChatMessage {
                    id: message_id,
                    group_id,
                    sender_id: user_id,
                    sent_at: Utc.timestamp_opt(1_717_200_000, 0).unwrap(),
                    payload: MessagePayload::Text { body: "hi".to_string() },
                },
            },
            "receive_message",
            &["type", "message"][..],
        ),
        (
            WsMessage::Error {
                code: "AUTH_FORBIDDEN".to_string(),
                message: "nope".to_string(),
                retryable: false,
            },
            "error",
            &["type", "code", "message", "retryable"][..],
        ),
    ];

    for (message, expected_type, expected_keys) in samples {
        let encoded = serde_json::to_value(&message).expect("frame should encode");
        assert_eq!(encoded["type"], expected_type);

        let object = encoded.as_object().expect("frame is an object");
        for key in expected_keys {
            assert!(object.contains_key(*key), "frame '{expected_type}' is missing key '{key}'");
        }
        assert_eq!(
            object.len(),
            expected_keys.len(),
            "frame '{expected_type}' carries unexpected keys: {object:?}"
        );

        let decoded: WsMessage =
            serde_json::from_value(encoded).expect("frame should round-trip");
        assert_eq!(decoded, message);
    }
}

#[test]
fn websocket_contract_rejects_untagged_frames() {
    let untagged: Result<WsMessage, _> =
        serde_json::from_value(serde_json::json!({ "group_id": Uuid::new_v4() }));
    assert!(untagged.is_err());

    let unknown: Result<WsMessage, _> =
        serde_json::from_str(r#"{"type":"subscribe","group_id":"x"}"#);
    assert!(unknown.is_err());
}

#[test]
fn receive_message_preserves_payload_discriminant() {
    let file_message = WsMessage::ReceiveMessage {
        message: ChatMessage {
            id: Uuid::new_v4(),
            group_id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            sent_at: Utc.timestamp_opt(1_717_200_000, 0).unwrap(),
            payload: MessagePayload::File {
                url: "https://files.example/slides".to_string(),
                name: "slides.pdf".to_string(),
            },
        },
    };

    let encoded: Value = serde_json::to_value(&file_message).expect("frame should encode");
    assert_eq!(encoded["message"]["kind"], "file");
    assert_eq!(encoded["message"]["url"], "https://files.example/slides");
    assert_eq!(encoded["message"]["name"], "slides.pdf");
}
