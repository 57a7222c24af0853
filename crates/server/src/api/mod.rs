pub mod groups;
pub mod lookup;
pub mod messages;
pub mod quizzes;
pub mod sessions;
pub mod tasks;

use std::sync::Arc;

use axum::Router;
use sqlx::PgPool;

use crate::{
    auth::jwt::IdentityTokenService,
    chat::{store::MessageStore, Publisher},
    error::{ApiError, ErrorCode},
    schedule::GroupLocks,
    storage::ObjectStore,
    ws::registry::ConnectionRegistry,
};

use groups::GroupStore;
use lookup::LookupStore;
use quizzes::QuizStore;
use sessions::SessionStore;
use tasks::TaskStore;

/// Everything the REST routers need, assembled once at startup.
#[derive(Clone)]
pub struct ApiDeps {
    pub groups: GroupStore,
    pub sessions: SessionStore,
    pub tasks: TaskStore,
    pub quizzes: QuizStore,
    pub lookup: LookupStore,
    pub publisher: Publisher,
    pub group_locks: GroupLocks,
    pub object_store: ObjectStore,
    pub invite_link_base_url: Arc<str>,
}

impl ApiDeps {
    pub fn postgres(
        pool: PgPool,
        registry: Arc<ConnectionRegistry>,
        object_store: ObjectStore,
        invite_link_base_url: String,
    ) -> Self {
        Self {
            groups: GroupStore::Postgres(pool.clone()),
            sessions: SessionStore::Postgres(pool.clone()),
            tasks: TaskStore::Postgres(pool.clone()),
            quizzes: QuizStore::Postgres(pool.clone()),
            lookup: LookupStore::Postgres(pool.clone()),
            publisher: Publisher::new(MessageStore::Postgres(pool), registry),
            group_locks: GroupLocks::default(),
            object_store,
            invite_link_base_url: Arc::from(invite_link_base_url),
        }
    }

    /// Fully in-memory dependency set used by the test suites and available
    /// for storage-free local development.
    pub fn memory(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            groups: GroupStore::memory(),
            sessions: SessionStore::memory(),
            tasks: TaskStore::memory(),
            quizzes: QuizStore::memory(),
            lookup: LookupStore::memory(),
            publisher: Publisher::new(MessageStore::memory(), registry),
            group_locks: GroupLocks::default(),
            object_store: ObjectStore::memory(),
            invite_link_base_url: Arc::from("http://localhost:3000/join"),
        }
    }
}

/// Assemble the authenticated REST surface.
pub fn build_router(deps: ApiDeps, token_service: Arc<IdentityTokenService>) -> Router {
    Router::new()
        .merge(groups::router(deps.clone(), Arc::clone(&token_service)))
        .merge(sessions::router(deps.clone(), Arc::clone(&token_service)))
        .merge(messages::router(deps.clone(), Arc::clone(&token_service)))
        .merge(tasks::router(deps.clone(), Arc::clone(&token_service)))
        .merge(quizzes::router(deps.clone(), token_service))
        .merge(lookup::router(deps))
}

// ── Shared helpers ───────────────────────────────────────────────────────────

/// Log and collapse a storage failure into the generic persistence error, so
/// clients can tell "your request was invalid" apart from "try again later".
pub(crate) fn persistence_failure(error: anyhow::Error) -> ApiError {
    tracing::error!(error = ?error, "storage operation failed");
    ApiError::from_code(ErrorCode::PersistenceFailure)
}

pub(crate) fn map_sqlx_error(error: sqlx::Error) -> ApiError {
    persistence_failure(error.into())
}

pub(crate) fn not_found(message: &'static str) -> ApiError {
    ApiError::new(ErrorCode::NotFound, message)
}

pub(crate) fn forbidden(message: &'static str) -> ApiError {
    ApiError::new(ErrorCode::AuthForbidden, message)
}

pub(crate) fn bad_request(message: impl Into<String>) -> ApiError {
    ApiError::new(ErrorCode::ValidationFailed, message)
}
