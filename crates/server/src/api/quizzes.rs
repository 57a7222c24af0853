// Quiz endpoints.
//
// Routes:
//   POST /v1/groups/{id}/quizzes             — create with inline questions
//   GET  /v1/groups/{id}/quizzes             — list for group
//   POST /v1/groups/{id}/quizzes/random-test — assemble a test from the pool
//   GET  /v1/quizzes/{id}                    — fetch
//   POST /v1/quizzes/{id}/results            — submit a score (upsert per user)

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use studia_common::types::{Quiz, QuizOption, QuizQuestion, QuizResult};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    auth::{
        jwt::IdentityTokenService,
        middleware::{require_bearer_auth, require_verified, AuthenticatedUser},
    },
    error::ApiError,
    validation::{require_non_empty, ValidatedJson},
};

use super::{
    bad_request, groups::require_participant, map_sqlx_error, not_found, persistence_failure,
    ApiDeps,
};

const RANDOM_TEST_QUESTIONS: usize = 10;

// ── Public API types ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateQuizRequest {
    pub title: String,
    pub questions: Vec<QuestionRequest>,
}

#[derive(Deserialize)]
pub struct QuestionRequest {
    pub text: String,
    pub options: Vec<QuizOption>,
}

#[derive(Deserialize)]
pub struct SubmitResultRequest {
    pub score: f64,
}

#[derive(Serialize)]
struct QuizEnvelope {
    quiz: Quiz,
}

#[derive(Serialize)]
struct QuizzesEnvelope {
    quizzes: Vec<Quiz>,
}

// ── Store ────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub enum QuizStore {
    Postgres(PgPool),
    #[cfg_attr(not(test), allow(dead_code))]
    Memory(Arc<RwLock<HashMap<Uuid, Quiz>>>),
}

#[derive(sqlx::FromRow)]
struct QuizRow {
    id: Uuid,
    group_id: Uuid,
    creator_id: Uuid,
    title: String,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct QuestionRow {
    id: Uuid,
    quiz_id: Uuid,
    text: String,
    options: serde_json::Value,
}

#[derive(sqlx::FromRow)]
struct ResultRow {
    quiz_id: Uuid,
    user_id: Uuid,
    score: f64,
    submitted_at: DateTime<Utc>,
}

impl QuestionRow {
    fn into_question(self) -> Result<QuizQuestion, ApiError> {
        let options: Vec<QuizOption> = serde_json::from_value(self.options).map_err(|error| {
            persistence_failure(anyhow::anyhow!("invalid quiz option payload: {error}"))
        })?;
        Ok(QuizQuestion { id: self.id, text: self.text, options })
    }
}

impl QuizStore {
    pub fn memory() -> Self {
        Self::Memory(Arc::new(RwLock::new(HashMap::new())))
    }

    pub async fn create(&self, quiz: Quiz) -> Result<Quiz, ApiError> {
        match self {
            Self::Postgres(pool) => create_pg(pool, quiz).await,
            Self::Memory(store) => {
                store.write().await.insert(quiz.id, quiz.clone());
                Ok(quiz)
            }
        }
    }

    pub async fn get(&self, quiz_id: Uuid) -> Result<Quiz, ApiError> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query_as::<_, QuizRow>(
                    "SELECT id, group_id, creator_id, title, created_at \
                     FROM quizzes WHERE id = $1",
                )
                .bind(quiz_id)
                .fetch_optional(pool)
                .await
                .map_err(map_sqlx_error)?
                .ok_or_else(|| not_found("quiz not found"))?;

                let mut quizzes = hydrate_pg(pool, vec![row]).await?;
                Ok(quizzes.remove(0))
            }
            Self::Memory(store) => store
                .read()
                .await
                .get(&quiz_id)
                .cloned()
                .ok_or_else(|| not_found("quiz not found")),
        }
    }

    pub async fn list_for_group(&self, group_id: Uuid) -> Result<Vec<Quiz>, ApiError> {
        match self {
            Self::Postgres(pool) => {
                let rows = sqlx::query_as::<_, QuizRow>(
                    "SELECT id, group_id, creator_id, title, created_at \
                     FROM quizzes WHERE group_id = $1 \
                     ORDER BY created_at ASC",
                )
                .bind(group_id)
                .fetch_all(pool)
                .await
                .map_err(map_sqlx_error)?;
                hydrate_pg(pool, rows).await
            }
            Self::Memory(store) => {
                let store = store.read().await;
                let mut quizzes: Vec<Quiz> =
                    store.values().filter(|quiz| quiz.group_id == group_id).cloned().collect();
                quizzes.sort_by_key(|quiz| quiz.created_at);
                Ok(quizzes)
            }
        }
    }

    /// Record a score; resubmission replaces the user's previous result.
    pub async fn submit_result(
        &self,
        quiz_id: Uuid,
        user_id: Uuid,
        score: f64,
    ) -> Result<Quiz, ApiError> {
        match self {
            Self::Postgres(pool) => {
                let result = sqlx::query(
                    "INSERT INTO quiz_results (quiz_id, user_id, score, submitted_at) \
                     SELECT id, $2, $3, now() FROM quizzes WHERE id = $1 \
                     ON CONFLICT (quiz_id, user_id) \
                     DO UPDATE SET score = EXCLUDED.score, submitted_at = now()",
                )
                .bind(quiz_id)
                .bind(user_id)
                .bind(score)
                .execute(pool)
                .await
                .map_err(map_sqlx_error)?;
                if result.rows_affected() == 0 {
                    return Err(not_found("quiz not found"));
                }
                self.get(quiz_id).await
            }
            Self::Memory(store) => {
                let mut store = store.write().await;
                let quiz =
                    store.get_mut(&quiz_id).ok_or_else(|| not_found("quiz not found"))?;
                let submitted_at = Utc::now();
                match quiz.results.iter_mut().find(|result| result.user_id == user_id) {
                    Some(result) => {
                        result.score = score;
                        result.submitted_at = submitted_at;
                    }
                    None => quiz.results.push(QuizResult { user_id, score, submitted_at }),
                }
                Ok(quiz.clone())
            }
        }
    }
}

async fn create_pg(pool: &PgPool, quiz: Quiz) -> Result<Quiz, ApiError> {
    let mut tx = pool.begin().await.map_err(map_sqlx_error)?;

    sqlx::query(
        "INSERT INTO quizzes (id, group_id, creator_id, title, created_at) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(quiz.id)
    .bind(quiz.group_id)
    .bind(quiz.creator_id)
    .bind(&quiz.title)
    .bind(quiz.created_at)
    .execute(&mut *tx)
    .await
    .map_err(map_sqlx_error)?;

    for question in &quiz.questions {
        let options = serde_json::to_value(&question.options).map_err(|error| {
            persistence_failure(anyhow::anyhow!("failed to encode quiz options: {error}"))
        })?;
        sqlx::query(
            "INSERT INTO quiz_questions (id, quiz_id, text, options) VALUES ($1, $2, $3, $4)",
        )
        .bind(question.id)
        .bind(quiz.id)
        .bind(&question.text)
        .bind(options)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
    }

    tx.commit().await.map_err(map_sqlx_error)?;
    Ok(quiz)
}

async fn hydrate_pg(pool: &PgPool, rows: Vec<QuizRow>) -> Result<Vec<Quiz>, ApiError> {
    let quiz_ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();

    let question_rows = sqlx::query_as::<_, QuestionRow>(
        "SELECT id, quiz_id, text, options FROM quiz_questions \
         WHERE quiz_id = ANY($1::uuid[])",
    )
    .bind(&quiz_ids)
    .fetch_all(pool)
    .await
    .map_err(map_sqlx_error)?;

    let result_rows = sqlx::query_as::<_, ResultRow>(
        "SELECT quiz_id, user_id, score, submitted_at FROM quiz_results \
         WHERE quiz_id = ANY($1::uuid[]) \
         ORDER BY submitted_at ASC",
    )
    .bind(&quiz_ids)
    .fetch_all(pool)
    .await
    .map_err(map_sqlx_error)?;

    let mut questions_by_quiz: HashMap<Uuid, Vec<QuizQuestion>> = HashMap::new();
    for row in question_rows {
        let quiz_id = row.quiz_id;
        questions_by_quiz.entry(quiz_id).or_default().push(row.into_question()?);
    }

    let mut results_by_quiz: HashMap<Uuid, Vec<QuizResult>> = HashMap::new();
    for row in result_rows {
        results_by_quiz.entry(row.quiz_id).or_default().push(QuizResult {
            user_id: row.user_id,
            score: row.score,
            submitted_at: row.submitted_at,
        });
    }

    Ok(rows
        .into_iter()
        .map(|row| Quiz {
            questions: questions_by_quiz.remove(&row.id).unwrap_or_default(),
            results: results_by_quiz.remove(&row.id).unwrap_or_default(),
            id: row.id,
            group_id: row.group_id,
            creator_id: row.creator_id,
            title: row.title,
            created_at: row.created_at,
        })
        .collect())
}

// ── Router ───────────────────────────────────────────────────────────────────

pub fn router(deps: ApiDeps, token_service: Arc<IdentityTokenService>) -> Router {
    Router::new()
        .route("/v1/groups/{group_id}/quizzes", post(create_quiz).get(list_group_quizzes))
        .route("/v1/groups/{group_id}/quizzes/random-test", post(create_random_test))
        .route("/v1/quizzes/{quiz_id}", get(get_quiz))
        .route("/v1/quizzes/{quiz_id}/results", post(submit_result))
        .with_state(deps)
        .route_layer(middleware::from_fn_with_state(token_service, require_bearer_auth))
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn create_quiz(
    State(deps): State<ApiDeps>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(group_id): Path<Uuid>,
    ValidatedJson(payload): ValidatedJson<CreateQuizRequest>,
) -> Result<(StatusCode, Json<QuizEnvelope>), ApiError> {
    require_verified(&user)?;
    require_participant(&deps, group_id, &user).await?;
    require_non_empty("title", &payload.title)?;
    if payload.questions.is_empty() {
        return Err(bad_request("a quiz needs at least one question"));
    }
    for question in &payload.questions {
        require_non_empty("question text", &question.text)?;
        if question.options.is_empty() {
            return Err(bad_request("every question needs at least one option"));
        }
    }

    let quiz = deps
        .quizzes
        .create(Quiz {
            id: Uuid::new_v4(),
            group_id,
            creator_id: user.user_id,
            title: payload.title,
            questions: payload
                .questions
                .into_iter()
                .map(|question| QuizQuestion {
                    id: Uuid::new_v4(),
                    text: question.text,
                    options: question.options,
                })
                .collect(),
            results: Vec::new(),
            created_at: Utc::now(),
        })
        .await?;

    Ok((StatusCode::CREATED, Json(QuizEnvelope { quiz })))
}

async fn list_group_quizzes(
    State(deps): State<ApiDeps>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(group_id): Path<Uuid>,
) -> Result<Json<QuizzesEnvelope>, ApiError> {
    require_participant(&deps, group_id, &user).await?;
    Ok(Json(QuizzesEnvelope { quizzes: deps.quizzes.list_for_group(group_id).await? }))
}

async fn get_quiz(
    State(deps): State<ApiDeps>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(quiz_id): Path<Uuid>,
) -> Result<Json<QuizEnvelope>, ApiError> {
    let quiz = deps.quizzes.get(quiz_id).await?;
    require_participant(&deps, quiz.group_id, &user).await?;
    Ok(Json(QuizEnvelope { quiz }))
}

/// Pull a shuffled sample from every question in the group's quizzes and
/// store it as a fresh quiz.
async fn create_random_test(
    State(deps): State<ApiDeps>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(group_id): Path<Uuid>,
) -> Result<(StatusCode, Json<QuizEnvelope>), ApiError> {
    require_verified(&user)?;
    require_participant(&deps, group_id, &user).await?;

    let mut pool: Vec<QuizQuestion> = deps
        .quizzes
        .list_for_group(group_id)
        .await?
        .into_iter()
        .flat_map(|quiz| quiz.questions)
        .collect();
    if pool.is_empty() {
        return Err(bad_request("this group has no quiz questions yet"));
    }

    pool.shuffle(&mut rand::thread_rng());
    pool.truncate(RANDOM_TEST_QUESTIONS);

    let created_at = Utc::now();
    let quiz = deps
        .quizzes
        .create(Quiz {
            id: Uuid::new_v4(),
            group_id,
            creator_id: user.user_id,
            title: format!("Test-{}", created_at.timestamp()),
            questions: pool
                .into_iter()
                .map(|question| QuizQuestion { id: Uuid::new_v4(), ..question })
                .collect(),
            results: Vec::new(),
            created_at,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(QuizEnvelope { quiz })))
}

async fn submit_result(
    State(deps): State<ApiDeps>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(quiz_id): Path<Uuid>,
    ValidatedJson(payload): ValidatedJson<SubmitResultRequest>,
) -> Result<Json<QuizEnvelope>, ApiError> {
    require_verified(&user)?;
    if !payload.score.is_finite() || payload.score < 0.0 {
        return Err(bad_request("score must be a non-negative number"));
    }

    let quiz = deps.quizzes.get(quiz_id).await?;
    require_participant(&deps, quiz.group_id, &user).await?;

    let quiz = deps.quizzes.submit_result(quiz_id, user.user_id, payload.score).await?;
    Ok(Json(QuizEnvelope { quiz }))
}

// ── Tests ────────────────────────────────────────────────────────────────────
