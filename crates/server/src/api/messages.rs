// Group chat endpoints (REST side of the chat synchronizer).
//
// Routes:
//   POST /v1/groups/{id}/messages — publish a text message
//   POST /v1/groups/{id}/files    — upload to the object store, then publish
//   GET  /v1/groups/{id}/messages — the merged durable log, time-ascending
//
// Both publish routes go through `chat::Publisher`: durable append first,
// then broadcast to the group's live WebSocket subscribers. A client may
// supply its own message id to make retries idempotent.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use studia_common::types::{ChatMessage, MessagePayload};
use uuid::Uuid;

use crate::{
    auth::{
        jwt::IdentityTokenService,
        middleware::{require_bearer_auth, require_verified, AuthenticatedUser},
    },
    chat::PublishOutcome,
    error::ApiError,
    validation::{validate_file_name, validate_message_body, ValidatedJson},
};

use super::{bad_request, groups::require_participant, persistence_failure, ApiDeps};

// ── Public API types ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct SendMessageRequest {
    /// Client-supplied id for idempotent retry; assigned if omitted.
    pub message_id: Option<Uuid>,
    pub body: String,
}

#[derive(Deserialize)]
pub struct SendFileRequest {
    pub message_id: Option<Uuid>,
    pub file_name: String,
    /// File bytes, base64-encoded.
    pub data_b64: String,
}

#[derive(Serialize)]
struct MessageEnvelope {
    message: ChatMessage,
}

#[derive(Serialize)]
struct MessagesEnvelope {
    messages: Vec<ChatMessage>,
}

// ── Router ───────────────────────────────────────────────────────────────────

pub fn router(deps: ApiDeps, token_service: Arc<IdentityTokenService>) -> Router {
    Router::new()
        .route(
            "/v1/groups/{group_id}/messages",
            post(send_message).get(fetch_messages),
        )
        .route("/v1/groups/{group_id}/files", post(send_file))
        .with_state(deps)
        .route_layer(middleware::from_fn_with_state(token_service, require_bearer_auth))
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn send_message(
    State(deps): State<ApiDeps>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(group_id): Path<Uuid>,
    ValidatedJson(payload): ValidatedJson<SendMessageRequest>,
) -> Result<(StatusCode, Json<MessageEnvelope>), ApiError> {
    require_verified(&user)?;
    require_participant(&deps, group_id, &user).await?;
    validate_message_body(&payload.body)?;

    let message = ChatMessage {
        id: payload.message_id.unwrap_or_else(Uuid::new_v4),
        group_id,
        sender_id: user.user_id,
        sent_at: Utc::now(),
        payload: MessagePayload::Text { body: payload.body },
    };

    publish(&deps, message).await
}

async fn send_file(
    State(deps): State<ApiDeps>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(group_id): Path<Uuid>,
    ValidatedJson(payload): ValidatedJson<SendFileRequest>,
) -> Result<(StatusCode, Json<MessageEnvelope>), ApiError> {
    require_verified(&user)?;
    require_participant(&deps, group_id, &user).await?;
    validate_file_name(&payload.file_name)?;

    let bytes = BASE64_STANDARD
        .decode(payload.data_b64.as_bytes())
        .map_err(|_| bad_request("data_b64 is not valid base64"))?;
    if bytes.is_empty() {
        return Err(bad_request("file payload must not be empty"));
    }

    // Upload before publish: a message must never reference a URL that does
    // not exist yet.
    let url = deps
        .object_store
        .put(&payload.file_name, bytes)
        .await
        .map_err(persistence_failure)?;

    let message = ChatMessage {
        id: payload.message_id.unwrap_or_else(Uuid::new_v4),
        group_id,
        sender_id: user.user_id,
        sent_at: Utc::now(),
        payload: MessagePayload::File { url, name: payload.file_name },
    };

    publish(&deps, message).await
}

async fn publish(
    deps: &ApiDeps,
    message: ChatMessage,
) -> Result<(StatusCode, Json<MessageEnvelope>), ApiError> {
    // REST senders have no live connection to exclude; their own WebSocket
    // subscription (if any) is protected by client-side dedup.
    match deps.publisher.publish(message, None).await.map_err(persistence_failure)? {
        PublishOutcome::Delivered { message, .. } => {
            Ok((StatusCode::CREATED, Json(MessageEnvelope { message })))
        }
        PublishOutcome::Duplicate { message } => {
            Ok((StatusCode::OK, Json(MessageEnvelope { message })))
        }
    }
}

async fn fetch_messages(
    State(deps): State<ApiDeps>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(group_id): Path<Uuid>,
) -> Result<Json<MessagesEnvelope>, ApiError> {
    require_participant(&deps, group_id, &user).await?;

    let messages = deps
        .publisher
        .store()
        .list_for_group(group_id)
        .await
        .map_err(persistence_failure)?;

    Ok(Json(MessagesEnvelope { messages }))
}

// ── Tests ────────────────────────────────────────────────────────────────────
