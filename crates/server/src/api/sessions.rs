// Study session endpoints.
//
// Routes:
//   POST   /v1/groups/{id}/sessions      — create (scheduler-validated)
//   GET    /v1/groups/{id}/sessions      — list for group
//   GET    /v1/sessions/mine             — sessions the caller accepted
//   GET    /v1/sessions/{id}             — fetch
//   PATCH  /v1/sessions/{id}             — edit (re-validated, self-excluded)
//   DELETE /v1/sessions/{id}             — delete (group creator)
//   POST   /v1/sessions/{id}/join        — accept participation
//   POST   /v1/sessions/{id}/leave       — withdraw participation
//
// Create and edit run the overlap check and the write under the group's
// scheduling lock, so two concurrent overlapping proposals cannot both pass
// validation against a log that has absorbed neither.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use studia_common::{
    civil::{self, TemporalError},
    types::StudySession,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    auth::{
        jwt::IdentityTokenService,
        middleware::{require_bearer_auth, require_verified, AuthenticatedUser},
    },
    error::{ApiError, ErrorCode},
    schedule::{check_overlap, CandidateWindow, SessionConflict},
    validation::{require_non_empty, ValidatedJson},
};

use super::{
    bad_request,
    groups::{require_creator, require_participant},
    map_sqlx_error, not_found, ApiDeps,
};

// ── Public API types ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct SessionTimesRequest {
    pub name: String,
    pub start_date: String,
    pub start_time: String,
    pub end_date: String,
    pub end_time: String,
}

#[derive(Serialize)]
struct SessionEnvelope {
    session: StudySession,
}

#[derive(Serialize)]
struct SessionsEnvelope {
    sessions: Vec<StudySession>,
}

/// Parsed and range-validated session times.
struct ValidatedTimes {
    name: String,
    start_date: NaiveDate,
    start_time: NaiveTime,
    end_date: NaiveDate,
    end_time: NaiveTime,
    window: CandidateWindow,
}

fn validate_times(req: &SessionTimesRequest) -> Result<ValidatedTimes, ApiError> {
    require_non_empty("name", &req.name)?;

    let start_date = civil::parse_date(&req.start_date).map_err(temporal_error)?;
    let start_time = civil::parse_time(&req.start_time).map_err(temporal_error)?;
    let end_date = civil::parse_date(&req.end_date).map_err(temporal_error)?;
    let end_time = civil::parse_time(&req.end_time).map_err(temporal_error)?;

    let window =
        CandidateWindow::new(start_date.and_time(start_time), end_date.and_time(end_time))
            .map_err(temporal_error)?;

    Ok(ValidatedTimes {
        name: req.name.trim().to_string(),
        start_date,
        start_time,
        end_date,
        end_time,
        window,
    })
}

fn temporal_error(error: TemporalError) -> ApiError {
    ApiError::new(ErrorCode::InvalidTemporalInput, error.to_string())
}

fn scheduling_conflict(conflicts: Vec<SessionConflict>) -> ApiError {
    let named: Vec<serde_json::Value> = conflicts
        .iter()
        .map(|conflict| {
            serde_json::json!({ "session_id": conflict.session_id, "name": conflict.name })
        })
        .collect();

    ApiError::from_code(ErrorCode::SchedulingConflict)
        .with_details(serde_json::json!({ "conflicts": named }))
}

// ── Store ────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub enum SessionStore {
    Postgres(PgPool),
    #[cfg_attr(not(test), allow(dead_code))]
    Memory(Arc<RwLock<HashMap<Uuid, StudySession>>>),
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: Uuid,
    group_id: Uuid,
    name: String,
    start_date: NaiveDate,
    start_time: NaiveTime,
    end_date: NaiveDate,
    end_time: NaiveTime,
    accepted_by: Vec<Uuid>,
}

impl From<SessionRow> for StudySession {
    fn from(row: SessionRow) -> Self {
        Self {
            id: row.id,
            group_id: row.group_id,
            name: row.name,
            start_date: row.start_date,
            start_time: row.start_time,
            end_date: row.end_date,
            end_time: row.end_time,
            accepted_by: row.accepted_by,
        }
    }
}

const SESSION_COLUMNS: &str =
    "id, group_id, name, start_date, start_time, end_date, end_time, accepted_by";

impl SessionStore {
    pub fn memory() -> Self {
        Self::Memory(Arc::new(RwLock::new(HashMap::new())))
    }

    pub async fn insert(&self, session: StudySession) -> Result<StudySession, ApiError> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query_as::<_, SessionRow>(&format!(
                    "INSERT INTO study_sessions \
                         (id, group_id, name, start_date, start_time, end_date, end_time, accepted_by) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
                     RETURNING {SESSION_COLUMNS}"
                ))
                .bind(session.id)
                .bind(session.group_id)
                .bind(&session.name)
                .bind(session.start_date)
                .bind(session.start_time)
                .bind(session.end_date)
                .bind(session.end_time)
                .bind(&session.accepted_by)
                .fetch_one(pool)
                .await
                .map_err(map_sqlx_error)?;
                Ok(row.into())
            }
            Self::Memory(store) => {
                store.write().await.insert(session.id, session.clone());
                Ok(session)
            }
        }
    }

    pub async fn replace(&self, session: StudySession) -> Result<StudySession, ApiError> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query_as::<_, SessionRow>(&format!(
                    "UPDATE study_sessions SET \
                         name = $2, start_date = $3, start_time = $4, \
                         end_date = $5, end_time = $6, accepted_by = $7 \
                     WHERE id = $1 \
                     RETURNING {SESSION_COLUMNS}"
                ))
                .bind(session.id)
                .bind(&session.name)
                .bind(session.start_date)
                .bind(session.start_time)
                .bind(session.end_date)
                .bind(session.end_time)
                .bind(&session.accepted_by)
                .fetch_optional(pool)
                .await
                .map_err(map_sqlx_error)?
                .ok_or_else(|| not_found("session not found"))?;
                Ok(row.into())
            }
            Self::Memory(store) => {
                let mut store = store.write().await;
                if !store.contains_key(&session.id) {
                    return Err(not_found("session not found"));
                }
                store.insert(session.id, session.clone());
                Ok(session)
            }
        }
    }

    pub async fn get(&self, session_id: Uuid) -> Result<StudySession, ApiError> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query_as::<_, SessionRow>(&format!(
                    "SELECT {SESSION_COLUMNS} FROM study_sessions WHERE id = $1"
                ))
                .bind(session_id)
                .fetch_optional(pool)
                .await
                .map_err(map_sqlx_error)?
                .ok_or_else(|| not_found("session not found"))?;
                Ok(row.into())
            }
            Self::Memory(store) => store
                .read()
                .await
                .get(&session_id)
                .cloned()
                .ok_or_else(|| not_found("session not found")),
        }
    }

    pub async fn list_for_group(&self, group_id: Uuid) -> Result<Vec<StudySession>, ApiError> {
        match self {
            Self::Postgres(pool) => {
                let rows = sqlx::query_as::<_, SessionRow>(&format!(
                    "SELECT {SESSION_COLUMNS} FROM study_sessions \
                     WHERE group_id = $1 \
                     ORDER BY start_date ASC, start_time ASC"
                ))
                .bind(group_id)
                .fetch_all(pool)
                .await
                .map_err(map_sqlx_error)?;
                Ok(rows.into_iter().map(Into::into).collect())
            }
            Self::Memory(store) => {
                let store = store.read().await;
                let mut sessions: Vec<StudySession> = store
                    .values()
                    .filter(|session| session.group_id == group_id)
                    .cloned()
                    .collect();
                sessions.sort_by_key(StudySession::starts_at);
                Ok(sessions)
            }
        }
    }

    pub async fn list_accepted_by(&self, user_id: Uuid) -> Result<Vec<StudySession>, ApiError> {
        match self {
            Self::Postgres(pool) => {
                let rows = sqlx::query_as::<_, SessionRow>(&format!(
                    "SELECT {SESSION_COLUMNS} FROM study_sessions \
                     WHERE accepted_by @> ARRAY[$1]::uuid[] \
                     ORDER BY start_date ASC, start_time ASC"
                ))
                .bind(user_id)
                .fetch_all(pool)
                .await
                .map_err(map_sqlx_error)?;
                Ok(rows.into_iter().map(Into::into).collect())
            }
            Self::Memory(store) => {
                let store = store.read().await;
                let mut sessions: Vec<StudySession> = store
                    .values()
                    .filter(|session| session.accepted_by.contains(&user_id))
                    .cloned()
                    .collect();
                sessions.sort_by_key(StudySession::starts_at);
                Ok(sessions)
            }
        }
    }

    pub async fn delete(&self, session_id: Uuid) -> Result<(), ApiError> {
        match self {
            Self::Postgres(pool) => {
                let result = sqlx::query("DELETE FROM study_sessions WHERE id = $1")
                    .bind(session_id)
                    .execute(pool)
                    .await
                    .map_err(map_sqlx_error)?;
                if result.rows_affected() == 0 {
                    return Err(not_found("session not found"));
                }
                Ok(())
            }
            Self::Memory(store) => store
                .write()
                .await
                .remove(&session_id)
                .map(|_| ())
                .ok_or_else(|| not_found("session not found")),
        }
    }
}

// ── Router ───────────────────────────────────────────────────────────────────

pub fn router(deps: ApiDeps, token_service: Arc<IdentityTokenService>) -> Router {
    Router::new()
        .route(
            "/v1/groups/{group_id}/sessions",
            post(create_session).get(list_group_sessions),
        )
        .route("/v1/sessions/mine", get(list_my_sessions))
        .route(
            "/v1/sessions/{session_id}",
            get(get_session).patch(update_session).delete(delete_session),
        )
        .route("/v1/sessions/{session_id}/join", post(join_session))
        .route("/v1/sessions/{session_id}/leave", post(leave_session))
        .with_state(deps)
        .route_layer(middleware::from_fn_with_state(token_service, require_bearer_auth))
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn create_session(
    State(deps): State<ApiDeps>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(group_id): Path<Uuid>,
    ValidatedJson(payload): ValidatedJson<SessionTimesRequest>,
) -> Result<(StatusCode, Json<SessionEnvelope>), ApiError> {
    require_verified(&user)?;
    require_participant(&deps, group_id, &user).await?;
    let times = validate_times(&payload)?;

    // Check-then-insert is serialized per group; other groups proceed freely.
    let _guard = deps.group_locks.acquire(group_id).await;

    let existing = deps.sessions.list_for_group(group_id).await?;
    check_overlap(times.window, &existing, None).map_err(scheduling_conflict)?;

    let session = deps
        .sessions
        .insert(StudySession {
            id: Uuid::new_v4(),
            group_id,
            name: times.name,
            start_date: times.start_date,
            start_time: times.start_time,
            end_date: times.end_date,
            end_time: times.end_time,
            accepted_by: vec![user.user_id],
        })
        .await?;

    Ok((StatusCode::CREATED, Json(SessionEnvelope { session })))
}

async fn update_session(
    State(deps): State<ApiDeps>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(session_id): Path<Uuid>,
    ValidatedJson(payload): ValidatedJson<SessionTimesRequest>,
) -> Result<Json<SessionEnvelope>, ApiError> {
    require_verified(&user)?;
    let current = deps.sessions.get(session_id).await?;
    require_participant(&deps, current.group_id, &user).await?;
    let times = validate_times(&payload)?;

    let _guard = deps.group_locks.acquire(current.group_id).await;

    let existing = deps.sessions.list_for_group(current.group_id).await?;
    // An edit must not conflict with its own stored interval.
    check_overlap(times.window, &existing, Some(session_id)).map_err(scheduling_conflict)?;

    let session = deps
        .sessions
        .replace(StudySession {
            name: times.name,
            start_date: times.start_date,
            start_time: times.start_time,
            end_date: times.end_date,
            end_time: times.end_time,
            ..current
        })
        .await?;

    Ok(Json(SessionEnvelope { session }))
}

async fn list_group_sessions(
    State(deps): State<ApiDeps>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(group_id): Path<Uuid>,
) -> Result<Json<SessionsEnvelope>, ApiError> {
    require_participant(&deps, group_id, &user).await?;
    Ok(Json(SessionsEnvelope { sessions: deps.sessions.list_for_group(group_id).await? }))
}

async fn list_my_sessions(
    State(deps): State<ApiDeps>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<SessionsEnvelope>, ApiError> {
    Ok(Json(SessionsEnvelope { sessions: deps.sessions.list_accepted_by(user.user_id).await? }))
}

async fn get_session(
    State(deps): State<ApiDeps>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionEnvelope>, ApiError> {
    let session = deps.sessions.get(session_id).await?;
    require_participant(&deps, session.group_id, &user).await?;
    Ok(Json(SessionEnvelope { session }))
}

async fn delete_session(
    State(deps): State<ApiDeps>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(session_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let session = deps.sessions.get(session_id).await?;
    // Session deletion stays with the group creator.
    require_creator(&deps, session.group_id, &user).await?;
    deps.sessions.delete(session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn join_session(
    State(deps): State<ApiDeps>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionEnvelope>, ApiError> {
    require_verified(&user)?;
    let mut session = deps.sessions.get(session_id).await?;
    require_participant(&deps, session.group_id, &user).await?;

    if session.accepted_by.contains(&user.user_id) {
        return Err(bad_request("you are already part of this session"));
    }
    session.accepted_by.push(user.user_id);
    let session = deps.sessions.replace(session).await?;
    Ok(Json(SessionEnvelope { session }))
}

async fn leave_session(
    State(deps): State<ApiDeps>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionEnvelope>, ApiError> {
    let mut session = deps.sessions.get(session_id).await?;
    session.accepted_by.retain(|id| *id != user.user_id);
    let session = deps.sessions.replace(session).await?;
    Ok(Json(SessionEnvelope { session }))
}

// ── Tests ────────────────────────────────────────────────────────────────────
