use crate::{
    auth::jwt::{IdentityTokenService, VerifiedIdentity},
    error::{ApiError, ErrorCode},
};
use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

/// The caller identity attached to every authenticated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: uuid::Uuid,
    pub username: String,
    pub email_verified: bool,
}

impl From<VerifiedIdentity> for AuthenticatedUser {
    fn from(identity: VerifiedIdentity) -> Self {
        Self {
            user_id: identity.user_id,
            username: identity.username,
            email_verified: identity.email_verified,
        }
    }
}

pub async fn require_bearer_auth(
    State(token_service): State<Arc<IdentityTokenService>>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = match request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(extract_bearer_token)
    {
        Some(token) => token,
        None => return unauthorized_response("missing bearer token"),
    };

    let identity = match token_service.verify_identity_token(token) {
        Ok(identity) => identity,
        Err(_) => return unauthorized_response("invalid bearer token"),
    };

    request.extensions_mut().insert(AuthenticatedUser::from(identity));

    next.run(request).await
}

/// Participation gate: group/session/chat mutations require a verified
/// account. The verification itself is the identity provider's concern; the
/// server only trusts the claim.
pub fn require_verified(user: &AuthenticatedUser) -> Result<(), ApiError> {
    if user.email_verified {
        Ok(())
    } else {
        Err(ApiError::from_code(ErrorCode::AuthUnverified))
    }
}

fn extract_bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;

    if !scheme.eq_ignore_ascii_case("Bearer") {
        return None;
    }

    let token = token.trim();
    if token.is_empty() {
        return None;
    }

    Some(token)
}

fn unauthorized_response(message: &'static str) -> Response {
    ApiError::new(ErrorCode::AuthInvalidToken, message).into_response()
}

#[cfg(test)]
mod tests {
    use super::{require_bearer_auth, require_verified, AuthenticatedUser};
    use crate::auth::jwt::IdentityTokenService;
    use axum::{
        body::Body,
        extract::Extension,
        http::{header::AUTHORIZATION, Request, StatusCode},
        middleware,
        routing::get,
        Router,
    };
    use std::sync::Arc;
    use tower::ServiceExt;
    use uuid::Uuid;

    const TEST_SECRET: &str = "studia_test_secret_that_is_definitely_long_enough";

    fn protected_app(token_service: Arc<IdentityTokenService>) -> Router {
        Router::new()
            .route(
                "/protected",
                get(|Extension(user): Extension<AuthenticatedUser>| async move {
                    format!("{}:{}", user.user_id, user.username)
                }),
            )
            .layer(middleware::from_fn_with_state(token_service, require_bearer_auth))
    }

    #[tokio::test]
    async fn rejects_requests_without_bearer_token() {
        let app = protected_app(Arc::new(
            IdentityTokenService::new(TEST_SECRET).expect("service should initialize"),
        ));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/protected")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should return a response");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn rejects_requests_with_invalid_bearer_token() {
        let app = protected_app(Arc::new(
            IdentityTokenService::new(TEST_SECRET).expect("service should initialize"),
        ));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/protected")
                    .header(AUTHORIZATION, "Bearer invalid-token")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should return a response");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn injects_authenticated_user_for_valid_bearer_token() {
        let service =
            Arc::new(IdentityTokenService::new(TEST_SECRET).expect("service should initialize"));
        let token = service
            .issue_identity_token(Uuid::new_v4(), "marta", true)
            .expect("token should be issued");

        let response = protected_app(service)
            .oneshot(
                Request::builder()
                    .uri("/protected")
                    .header(AUTHORIZATION, format!("Bearer {token}"))
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should return a response");

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn unverified_accounts_fail_the_participation_gate() {
        let unverified = AuthenticatedUser {
            user_id: Uuid::new_v4(),
            username: "fresh".to_string(),
            email_verified: false,
        };
        assert!(require_verified(&unverified).is_err());

        let verified = AuthenticatedUser { email_verified: true, ..unverified };
        assert!(require_verified(&verified).is_ok());
    }
}
