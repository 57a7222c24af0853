// studia-server: REST + WebSocket backend for the Studia study-group app.

pub mod api;
pub mod auth;
pub mod chat;
pub mod config;
pub mod cors;
pub mod db;
pub mod error;
pub mod schedule;
pub mod storage;
pub mod validation;
pub mod ws;

use std::sync::Arc;

use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::{header::HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::time::Instant;
use tracing::{error, info};

use api::ApiDeps;
use auth::jwt::IdentityTokenService;
use error::REQUEST_ID_HEADER;
use validation::MAX_REST_BODY_BYTES;
use ws::registry::ConnectionRegistry;

/// Assemble the full application: health check, WebSocket route, REST API,
/// and the common middleware stack.
pub fn build_app(
    deps: ApiDeps,
    registry: Arc<ConnectionRegistry>,
    token_service: Arc<IdentityTokenService>,
    cors_origins: Option<&str>,
) -> Router {
    let ws_state = ws::WsState {
        registry,
        publisher: deps.publisher.clone(),
        groups: deps.groups.clone(),
        token_service: Arc::clone(&token_service),
    };

    apply_middleware(
        Router::new()
            .route("/healthz", get(healthz))
            .merge(ws::router(ws_state))
            .merge(api::build_router(deps, token_service)),
        cors_origins,
    )
}

fn apply_middleware(router: Router, cors_origins: Option<&str>) -> Router {
    router
        .layer(DefaultBodyLimit::max(MAX_REST_BODY_BYTES))
        .layer(cors::cors_layer(cors_origins))
        .layer(middleware::from_fn(request_context_middleware))
        .layer(middleware::from_fn(panic_handler))
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn panic_handler(request: Request<Body>, next: Next) -> Response {
    match tokio::spawn(async move { next.run(request).await }).await {
        Ok(response) => response,
        Err(join_error) => {
            error!(?join_error, "request handling panicked");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn request_context_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = error::request_id_from_headers_or_generate(request.headers());

    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started_at = Instant::now();

    let mut response =
        error::with_request_id_scope(request_id.clone(), next.run(request)).await;

    if let Ok(request_id_header) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, request_id_header);
    }

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = started_at.elapsed().as_millis() as u64,
        "request completed"
    );

    response
}
