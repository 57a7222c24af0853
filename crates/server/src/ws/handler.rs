use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::HeaderMap,
    response::IntoResponse,
};
use chrono::Utc;
use studia_common::protocol::ws::{self as ws_protocol, WsMessage};
use studia_common::types::{ChatMessage, MessagePayload};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::warn;
use uuid::Uuid;

use crate::auth::jwt::VerifiedIdentity;
use crate::error::{request_id_from_headers_or_generate, with_request_id_scope};
use crate::validation::{validate_file_name, validate_message_body};

use super::{send_frame, WsState, HEARTBEAT_INTERVAL_MS, HEARTBEAT_TIMEOUT_MS, MAX_FRAME_BYTES};

pub async fn ws_upgrade(
    State(state): State<WsState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let request_id = request_id_from_headers_or_generate(&headers);
    ws.max_frame_size(MAX_FRAME_BYTES).on_upgrade(move |socket| async move {
        with_request_id_scope(request_id, handle_socket(state, socket)).await;
    })
}

fn error_frame(code: &str, message: impl Into<String>, retryable: bool) -> WsMessage {
    WsMessage::Error { code: code.to_string(), message: message.into(), retryable }
}

async fn close_frame_too_large(socket: &mut WebSocket) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::SIZE,
            reason: format!("websocket frame exceeds maximum size of {MAX_FRAME_BYTES} bytes")
                .into(),
        })))
        .await;
}

/// Authenticate the connection from its first frame, which must be `hello`.
async fn await_hello(state: &WsState, socket: &mut WebSocket) -> Result<VerifiedIdentity, ()> {
    let raw_frame = match socket.recv().await {
        Some(Ok(Message::Text(raw_frame))) => raw_frame,
        _ => return Err(()),
    };

    if raw_frame.len() > MAX_FRAME_BYTES {
        close_frame_too_large(socket).await;
        return Err(());
    }

    let access_token = match ws_protocol::decode_message(&raw_frame) {
        Ok(WsMessage::Hello { access_token }) => access_token,
        _ => {
            let _ = send_frame(
                socket,
                &error_frame(
                    "HELLO_REQUIRED",
                    "first WebSocket frame must be a hello frame",
                    false,
                ),
            )
            .await;
            let _ = socket.send(Message::Close(None)).await;
            return Err(());
        }
    };

    let identity = match state.token_service.verify_identity_token(&access_token) {
        Ok(identity) => identity,
        Err(_) => {
            let _ = send_frame(
                socket,
                &error_frame("AUTH_INVALID_TOKEN", "invalid authentication token", false),
            )
            .await;
            let _ = socket.send(Message::Close(None)).await;
            return Err(());
        }
    };

    if !identity.email_verified {
        let _ = send_frame(
            socket,
            &error_frame("AUTH_UNVERIFIED", "account email is not verified", false),
        )
        .await;
        let _ = socket.send(Message::Close(None)).await;
        return Err(());
    }

    Ok(identity)
}

async fn handle_socket(state: WsState, mut socket: WebSocket) {
    let Ok(identity) = await_hello(&state, &mut socket).await else {
        return;
    };

    let connection_id = state.registry.register(identity.user_id).await;

    if send_frame(&mut socket, &WsMessage::HelloAck { server_time: Utc::now().to_rfc3339() })
        .await
        .is_err()
    {
        state.registry.remove(connection_id).await;
        return;
    }

    let (outbound_sender, mut outbound_receiver) = mpsc::unbounded_channel::<WsMessage>();
    if !state.registry.register_outbound(connection_id, outbound_sender).await {
        state.registry.remove(connection_id).await;
        return;
    }

    // Heartbeat: server pings every HEARTBEAT_INTERVAL_MS, disconnects if no
    // pong arrives within HEARTBEAT_TIMEOUT_MS.
    let mut heartbeat_interval =
        tokio::time::interval(std::time::Duration::from_millis(HEARTBEAT_INTERVAL_MS));
    heartbeat_interval.reset(); // skip immediate first tick
    let mut last_pong = Instant::now();
    let heartbeat_timeout = std::time::Duration::from_millis(HEARTBEAT_TIMEOUT_MS);

    loop {
        tokio::select! {
            _ = heartbeat_interval.tick() => {
                if last_pong.elapsed() > heartbeat_timeout {
                    warn!(%connection_id, user_id = %identity.user_id, "heartbeat timeout, disconnecting");
                    break;
                }
                if socket.send(Message::Ping(vec![].into())).await.is_err() {
                    break;
                }
            }
            maybe_outbound = outbound_receiver.recv() => {
                match maybe_outbound {
                    Some(outbound_message) => {
                        if send_frame(&mut socket, &outbound_message).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            maybe_message = socket.recv() => {
                let Some(message) = maybe_message else {
                    break;
                };

                match message {
                    Ok(Message::Text(raw_frame)) => {
                        if raw_frame.len() > MAX_FRAME_BYTES {
                            close_frame_too_large(&mut socket).await;
                            break;
                        }

                        let inbound = match ws_protocol::decode_message(&raw_frame) {
                            Ok(message) => message,
                            Err(_) => {
                                let frame = error_frame(
                                    "INVALID_FRAME",
                                    "invalid websocket frame payload",
                                    false,
                                );
                                if send_frame(&mut socket, &frame).await.is_err() {
                                    break;
                                }
                                continue;
                            }
                        };

                        match handle_frame(&state, connection_id, identity.user_id, inbound).await {
                            Ok(replies) => {
                                let mut send_failed = false;
                                for reply in replies {
                                    if send_frame(&mut socket, &reply).await.is_err() {
                                        send_failed = true;
                                        break;
                                    }
                                }
                                if send_failed {
                                    break;
                                }
                            }
                            Err(error_reply) => {
                                if send_frame(&mut socket, &error_reply).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Ok(Message::Pong(_)) => {
                        last_pong = Instant::now();
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        }
    }

    // Abrupt loss and orderly close take the same cleanup path.
    state.registry.remove(connection_id).await;
}

async fn handle_frame(
    state: &WsState,
    connection_id: Uuid,
    user_id: Uuid,
    frame: WsMessage,
) -> Result<Vec<WsMessage>, WsMessage> {
    match frame {
        WsMessage::JoinGroup { group_id } => {
            let role = state.groups.role_for_user(group_id, user_id).await.map_err(|error| {
                error_frame(error.code().as_str(), error.message(), error.code().retryable())
            })?;

            if !role.is_some_and(|role| role.is_participant()) {
                return Err(error_frame(
                    "AUTH_FORBIDDEN",
                    "caller is not a member of this group",
                    false,
                ));
            }

            // Re-joining is a no-op; only a fresh join announces presence.
            if state.registry.subscribe(connection_id, group_id).await {
                state
                    .registry
                    .broadcast_to_group(
                        group_id,
                        WsMessage::UserJoined { group_id, user_id, joined_at: Utc::now() },
                        Some(connection_id),
                    )
                    .await;
            }
            Ok(Vec::new())
        }

        WsMessage::LeaveGroup { group_id } => {
            state.registry.unsubscribe(connection_id, group_id).await;
            Ok(Vec::new())
        }

        WsMessage::SendMessage { group_id, message_id, body } => {
            require_subscribed(state, connection_id, group_id).await?;
            validate_message_body(&body)
                .map_err(|error| error_frame(error.code().as_str(), error.message(), false))?;

            let message = ChatMessage {
                id: message_id,
                group_id,
                sender_id: user_id,
                sent_at: Utc::now(),
                payload: MessagePayload::Text { body },
            };
            publish(state, connection_id, message).await
        }

        WsMessage::SendFile { group_id, message_id, file_name, file_url } => {
            require_subscribed(state, connection_id, group_id).await?;
            validate_file_name(&file_name)
                .map_err(|error| error_frame(error.code().as_str(), error.message(), false))?;

            let message = ChatMessage {
                id: message_id,
                group_id,
                sender_id: user_id,
                sent_at: Utc::now(),
                payload: MessagePayload::File { url: file_url, name: file_name },
            };
            publish(state, connection_id, message).await
        }

        // Server-to-client frames arriving inbound are protocol misuse.
        _ => Err(error_frame("INVALID_FRAME", "unexpected frame type from client", false)),
    }
}

async fn require_subscribed(
    state: &WsState,
    connection_id: Uuid,
    group_id: Uuid,
) -> Result<(), WsMessage> {
    if state.registry.is_subscribed(connection_id, group_id).await {
        Ok(())
    } else {
        Err(error_frame("AUTH_FORBIDDEN", "join the group before sending to it", false))
    }
}

async fn publish(
    state: &WsState,
    connection_id: Uuid,
    message: ChatMessage,
) -> Result<Vec<WsMessage>, WsMessage> {
    let message_id = message.id;
    match state.publisher.publish(message, Some(connection_id)).await {
        Ok(_) => Ok(vec![WsMessage::Ack { message_id, persisted: true }]),
        Err(error) => {
            warn!(%message_id, error = ?error, "chat publish failed");
            Err(error_frame("PERSISTENCE_FAILURE", "message could not be persisted", true))
        }
    }
}
