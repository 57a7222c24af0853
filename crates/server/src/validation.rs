// Input validation helpers.
//
// - `ValidatedJson<T>` extractor: content-type check + serde + size enforcement.
// - Field validators shared by the REST handlers.

use axum::{
    extract::{rejection::JsonRejection, FromRequest, Request},
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;

use crate::error::{ApiError, ErrorCode};

/// Maximum WebSocket frame payload in bytes (64 KiB).
pub const MAX_WS_FRAME_BYTES: usize = 64 * 1024;

/// Maximum REST request body in bytes (8 MiB — file uploads arrive base64).
pub const MAX_REST_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Maximum chat message body length in characters.
pub const MAX_MESSAGE_BODY_CHARS: usize = 4_000;

// ── ValidatedJson extractor ────────────────────────────────────────

/// A JSON body extractor that returns a structured `ApiError` on failure.
///
/// Use this instead of `axum::Json<T>` in handlers to get consistent
/// VALIDATION_FAILED error responses instead of plain-text Axum rejections.
pub struct ValidatedJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ValidatedJson(value)),
            Err(rejection) => {
                let (message, details) = classify_json_rejection(&rejection);
                Err(ApiError::new(ErrorCode::ValidationFailed, message)
                    .with_details(details)
                    .into_response())
            }
        }
    }
}

fn classify_json_rejection(rejection: &JsonRejection) -> (String, serde_json::Value) {
    match rejection {
        JsonRejection::JsonDataError(e) => {
            (format!("invalid JSON payload: {e}"), serde_json::json!({ "kind": "data_error" }))
        }
        JsonRejection::JsonSyntaxError(e) => {
            (format!("malformed JSON: {e}"), serde_json::json!({ "kind": "syntax_error" }))
        }
        JsonRejection::MissingJsonContentType(_) => (
            "expected Content-Type: application/json".to_string(),
            serde_json::json!({ "kind": "missing_content_type" }),
        ),
        JsonRejection::BytesRejection(e) => {
            (format!("request body error: {e}"), serde_json::json!({ "kind": "body_error" }))
        }
        other => {
            (format!("request body error: {other}"), serde_json::json!({ "kind": "unknown" }))
        }
    }
}

// ── Field validators ───────────────────────────────────────────────

pub fn require_non_empty(field: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::new(
            ErrorCode::ValidationFailed,
            format!("{field} must not be empty"),
        ));
    }
    Ok(())
}

pub fn validate_message_body(body: &str) -> Result<(), ApiError> {
    require_non_empty("body", body)?;
    if body.chars().count() > MAX_MESSAGE_BODY_CHARS {
        return Err(ApiError::new(
            ErrorCode::ValidationFailed,
            format!("body exceeds {MAX_MESSAGE_BODY_CHARS} characters"),
        ));
    }
    Ok(())
}

pub fn validate_file_name(name: &str) -> Result<(), ApiError> {
    require_non_empty("file_name", name)?;
    if name.contains('/') || name.contains('\\') || name.contains("..") {
        return Err(ApiError::new(
            ErrorCode::ValidationFailed,
            "file_name must not contain path separators",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_fields_are_rejected() {
        assert!(require_non_empty("name", "   ").is_err());
        assert!(require_non_empty("name", "Algorithms").is_ok());
    }

    #[test]
    fn oversized_message_body_is_rejected() {
        let body = "x".repeat(MAX_MESSAGE_BODY_CHARS + 1);
        assert!(validate_message_body(&body).is_err());
        assert!(validate_message_body("hi").is_ok());
    }

    #[test]
    fn file_names_with_path_separators_are_rejected() {
        for name in ["../etc/passwd", "dir/file.pdf", "dir\\file.pdf"] {
            assert!(validate_file_name(name).is_err(), "expected '{name}' to be rejected");
        }
        assert!(validate_file_name("notes.pdf").is_ok());
    }
}
