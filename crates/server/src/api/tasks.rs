// Task board endpoints.
//
// Routes:
//   POST   /v1/groups/{id}/tasks             — create
//   GET    /v1/groups/{id}/tasks             — open (pending) tasks
//   GET    /v1/groups/{id}/tasks/statistics  — per-status counts
//   GET    /v1/tasks/mine                    — tasks assigned to the caller
//   POST   /v1/tasks/{id}/claim              — take a pending task
//   POST   /v1/tasks/{id}/complete           — mark a task done
//   DELETE /v1/tasks/{id}                    — task creator or group creator

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
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use studia_common::types::{Task, TaskStatus};
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
    bad_request, forbidden,
    groups::{require_participant, GroupRole},
    map_sqlx_error, not_found, persistence_failure, ApiDeps,
};

// ── Public API types ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    pub description: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct TaskEnvelope {
    task: Task,
}

#[derive(Serialize)]
struct TasksEnvelope {
    tasks: Vec<Task>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct TaskStatistics {
    pub pending: i64,
    pub taken: i64,
    pub completed: i64,
}

// ── Store ────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub enum TaskStore {
    Postgres(PgPool),
    #[cfg_attr(not(test), allow(dead_code))]
    Memory(Arc<RwLock<HashMap<Uuid, Task>>>),
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: Uuid,
    group_id: Uuid,
    creator_id: Uuid,
    assigned_to: Option<Uuid>,
    title: String,
    description: Option<String>,
    status: String,
    deadline: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TaskRow {
    fn into_task(self) -> Result<Task, ApiError> {
        let status = TaskStatus::parse(&self.status).ok_or_else(|| {
            persistence_failure(anyhow::anyhow!("invalid task status '{}' in database", self.status))
        })?;
        Ok(Task {
            id: self.id,
            group_id: self.group_id,
            creator_id: self.creator_id,
            assigned_to: self.assigned_to,
            title: self.title,
            description: self.description,
            status,
            deadline: self.deadline,
            created_at: self.created_at,
        })
    }
}

const TASK_COLUMNS: &str =
    "id, group_id, creator_id, assigned_to, title, description, status, deadline, created_at";

impl TaskStore {
    pub fn memory() -> Self {
        Self::Memory(Arc::new(RwLock::new(HashMap::new())))
    }

    pub async fn create(&self, task: Task) -> Result<Task, ApiError> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query_as::<_, TaskRow>(&format!(
                    "INSERT INTO tasks \
                         (id, group_id, creator_id, title, description, status, deadline) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7) \
                     RETURNING {TASK_COLUMNS}"
                ))
                .bind(task.id)
                .bind(task.group_id)
                .bind(task.creator_id)
                .bind(&task.title)
                .bind(&task.description)
                .bind(task.status.as_str())
                .bind(task.deadline)
                .fetch_one(pool)
                .await
                .map_err(map_sqlx_error)?;
                row.into_task()
            }
            Self::Memory(store) => {
                store.write().await.insert(task.id, task.clone());
                Ok(task)
            }
        }
    }

    pub async fn get(&self, task_id: Uuid) -> Result<Task, ApiError> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query_as::<_, TaskRow>(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"
                ))
                .bind(task_id)
                .fetch_optional(pool)
                .await
                .map_err(map_sqlx_error)?
                .ok_or_else(|| not_found("task not found"))?;
                row.into_task()
            }
            Self::Memory(store) => store
                .read()
                .await
                .get(&task_id)
                .cloned()
                .ok_or_else(|| not_found("task not found")),
        }
    }

    pub async fn list_pending(&self, group_id: Uuid) -> Result<Vec<Task>, ApiError> {
        match self {
            Self::Postgres(pool) => {
                let rows = sqlx::query_as::<_, TaskRow>(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks \
                     WHERE group_id = $1 AND status = 'pending' \
                     ORDER BY created_at ASC"
                ))
                .bind(group_id)
                .fetch_all(pool)
                .await
                .map_err(map_sqlx_error)?;
                rows.into_iter().map(TaskRow::into_task).collect()
            }
            Self::Memory(store) => {
                let store = store.read().await;
                let mut tasks: Vec<Task> = store
                    .values()
                    .filter(|task| task.group_id == group_id && task.status == TaskStatus::Pending)
                    .cloned()
                    .collect();
                tasks.sort_by_key(|task| task.created_at);
                Ok(tasks)
            }
        }
    }

    pub async fn list_assigned(&self, user_id: Uuid) -> Result<Vec<Task>, ApiError> {
        match self {
            Self::Postgres(pool) => {
                let rows = sqlx::query_as::<_, TaskRow>(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks \
                     WHERE assigned_to = $1 \
                     ORDER BY created_at ASC"
                ))
                .bind(user_id)
                .fetch_all(pool)
                .await
                .map_err(map_sqlx_error)?;
                rows.into_iter().map(TaskRow::into_task).collect()
            }
            Self::Memory(store) => {
                let store = store.read().await;
                let mut tasks: Vec<Task> = store
                    .values()
                    .filter(|task| task.assigned_to == Some(user_id))
                    .cloned()
                    .collect();
                tasks.sort_by_key(|task| task.created_at);
                Ok(tasks)
            }
        }
    }

    /// Claim is conditional on the task still being pending, so two members
    /// cannot both take it.
    pub async fn claim(&self, task_id: Uuid, user_id: Uuid) -> Result<Task, ApiError> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query_as::<_, TaskRow>(&format!(
                    "UPDATE tasks SET assigned_to = $2, status = 'taken' \
                     WHERE id = $1 AND status = 'pending' \
                     RETURNING {TASK_COLUMNS}"
                ))
                .bind(task_id)
                .bind(user_id)
                .fetch_optional(pool)
                .await
                .map_err(map_sqlx_error)?;

                match row {
                    Some(row) => row.into_task(),
                    None => {
                        self.get(task_id).await?;
                        Err(bad_request("task has already been claimed"))
                    }
                }
            }
            Self::Memory(store) => {
                let mut store = store.write().await;
                let task =
                    store.get_mut(&task_id).ok_or_else(|| not_found("task not found"))?;
                if task.status != TaskStatus::Pending {
                    return Err(bad_request("task has already been claimed"));
                }
                task.assigned_to = Some(user_id);
                task.status = TaskStatus::Taken;
                Ok(task.clone())
            }
        }
    }

    pub async fn complete(&self, task_id: Uuid) -> Result<Task, ApiError> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query_as::<_, TaskRow>(&format!(
                    "UPDATE tasks SET status = 'completed' \
                     WHERE id = $1 \
                     RETURNING {TASK_COLUMNS}"
                ))
                .bind(task_id)
                .fetch_optional(pool)
                .await
                .map_err(map_sqlx_error)?
                .ok_or_else(|| not_found("task not found"))?;
                row.into_task()
            }
            Self::Memory(store) => {
                let mut store = store.write().await;
                let task =
                    store.get_mut(&task_id).ok_or_else(|| not_found("task not found"))?;
                task.status = TaskStatus::Completed;
                Ok(task.clone())
            }
        }
    }

    pub async fn delete(&self, task_id: Uuid) -> Result<(), ApiError> {
        match self {
            Self::Postgres(pool) => {
                let result = sqlx::query("DELETE FROM tasks WHERE id = $1")
                    .bind(task_id)
                    .execute(pool)
                    .await
                    .map_err(map_sqlx_error)?;
                if result.rows_affected() == 0 {
                    return Err(not_found("task not found"));
                }
                Ok(())
            }
            Self::Memory(store) => store
                .write()
                .await
                .remove(&task_id)
                .map(|_| ())
                .ok_or_else(|| not_found("task not found")),
        }
    }

    pub async fn statistics(&self, group_id: Uuid) -> Result<TaskStatistics, ApiError> {
        match self {
            Self::Postgres(pool) => {
                let rows = sqlx::query_as::<_, (String, i64)>(
                    "SELECT status, COUNT(*) FROM tasks WHERE group_id = $1 GROUP BY status",
                )
                .bind(group_id)
                .fetch_all(pool)
                .await
                .map_err(map_sqlx_error)?;

                let mut stats = TaskStatistics::default();
                for (status, count) in rows {
                    match status.as_str() {
                        "pending" => stats.pending = count,
                        "taken" => stats.taken = count,
                        "completed" => stats.completed = count,
                        _ => {}
                    }
                }
                Ok(stats)
            }
            Self::Memory(store) => {
                let store = store.read().await;
                let mut stats = TaskStatistics::default();
                for task in store.values().filter(|task| task.group_id == group_id) {
                    match task.status {
                        TaskStatus::Pending => stats.pending += 1,
                        TaskStatus::Taken => stats.taken += 1,
                        TaskStatus::Completed => stats.completed += 1,
                    }
                }
                Ok(stats)
            }
        }
    }
}

// ── Router ───────────────────────────────────────────────────────────────────

pub fn router(deps: ApiDeps, token_service: Arc<IdentityTokenService>) -> Router {
    Router::new()
        .route("/v1/groups/{group_id}/tasks", post(create_task).get(list_pending_tasks))
        .route("/v1/groups/{group_id}/tasks/statistics", get(task_statistics))
        .route("/v1/tasks/mine", get(list_my_tasks))
        .route("/v1/tasks/{task_id}", axum::routing::delete(delete_task))
        .route("/v1/tasks/{task_id}/claim", post(claim_task))
        .route("/v1/tasks/{task_id}/complete", post(complete_task))
        .with_state(deps)
        .route_layer(middleware::from_fn_with_state(token_service, require_bearer_auth))
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn create_task(
    State(deps): State<ApiDeps>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(group_id): Path<Uuid>,
    ValidatedJson(payload): ValidatedJson<CreateTaskRequest>,
) -> Result<(StatusCode, Json<TaskEnvelope>), ApiError> {
    require_verified(&user)?;
    require_participant(&deps, group_id, &user).await?;
    require_non_empty("title", &payload.title)?;

    let task = deps
        .tasks
        .create(Task {
            id: Uuid::new_v4(),
            group_id,
            creator_id: user.user_id,
            assigned_to: None,
            title: payload.title,
            description: payload.description,
            status: TaskStatus::Pending,
            deadline: payload.deadline,
            created_at: Utc::now(),
        })
        .await?;

    Ok((StatusCode::CREATED, Json(TaskEnvelope { task })))
}

async fn list_pending_tasks(
    State(deps): State<ApiDeps>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(group_id): Path<Uuid>,
) -> Result<Json<TasksEnvelope>, ApiError> {
    require_participant(&deps, group_id, &user).await?;
    Ok(Json(TasksEnvelope { tasks: deps.tasks.list_pending(group_id).await? }))
}

async fn task_statistics(
    State(deps): State<ApiDeps>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(group_id): Path<Uuid>,
) -> Result<Json<TaskStatistics>, ApiError> {
    require_participant(&deps, group_id, &user).await?;
    Ok(Json(deps.tasks.statistics(group_id).await?))
}

async fn list_my_tasks(
    State(deps): State<ApiDeps>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<TasksEnvelope>, ApiError> {
    Ok(Json(TasksEnvelope { tasks: deps.tasks.list_assigned(user.user_id).await? }))
}

async fn claim_task(
    State(deps): State<ApiDeps>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<TaskEnvelope>, ApiError> {
    require_verified(&user)?;
    let task = deps.tasks.get(task_id).await?;
    require_participant(&deps, task.group_id, &user).await?;

    let task = deps.tasks.claim(task_id, user.user_id).await?;
    Ok(Json(TaskEnvelope { task }))
}

async fn complete_task(
    State(deps): State<ApiDeps>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<TaskEnvelope>, ApiError> {
    let task = deps.tasks.get(task_id).await?;
    require_participant(&deps, task.group_id, &user).await?;

    let task = deps.tasks.complete(task_id).await?;
    Ok(Json(TaskEnvelope { task }))
}

async fn delete_task(
    State(deps): State<ApiDeps>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(task_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let task = deps.tasks.get(task_id).await?;

    let is_task_creator = task.creator_id == user.user_id;
    let is_group_creator = matches!(
        deps.groups.role_for_user(task.group_id, user.user_id).await?,
        Some(GroupRole::Creator)
    );
    if !is_task_creator && !is_group_creator {
        return Err(forbidden("only the task creator or group creator may delete a task"));
    }

    deps.tasks.delete(task_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use tower::ServiceExt;

    use super::*;
    use crate::api::testkit::{body_json, delete_request, get_request, json_request, test_app};

    async fn setup_group(
        harness: &crate::api::testkit::TestApp,
        creator: &crate::api::testkit::TestUser,
    ) -> Uuid {
        let body = body_json(
            harness
                .app
                .clone()
                .oneshot(json_request(
                    "POST",
                    "/v1/groups",
                    serde_json::json!({
                        "name": "Task Group",
                        "description": "g",
                        "subjects": [],
                        "privacy": "public",
                        "city": "Turin",
                    }),
                    &creator.token,
                ))
                .await
                .expect("group create"),
        )
        .await;
        body["group"]["id"].as_str().expect("group id").parse().expect("uuid")
    }

    #[tokio::test]
    async fn task_lifecycle_create_claim_complete() {
        let harness = test_app();
        let creator = harness.user("marta");
        let member = harness.user("luca");
        let group_id = setup_group(&harness, &creator).await;
        harness.deps.groups.add_member(group_id, member.user_id).await.expect("add member");

        let created = harness
            .app
            .clone()
            .oneshot(json_request(
                "POST",
                &format!("/v1/groups/{group_id}/tasks"),
                serde_json::json!({ "title": "summarize chapter 3" }),
                &creator.token,
            ))
            .await
            .expect("create");
        assert_eq!(created.status(), StatusCode::CREATED);
        let created = body_json(created).await;
        let task_id = created["task"]["id"].as_str().expect("task id").to_string();
        assert_eq!(created["task"]["status"], "pending");

        let claimed = harness
            .app
            .clone()
            .oneshot(json_request(
                "POST",
                &format!("/v1/tasks/{task_id}/claim"),
                serde_json::json!({}),
                &member.token,
            ))
            .await
            .expect("claim");
        assert_eq!(claimed.status(), StatusCode::OK);
        let claimed = body_json(claimed).await;
        assert_eq!(claimed["task"]["status"], "taken");
        assert_eq!(claimed["task"]["assigned_to"], member.user_id.to_string());

        // A second claim loses.
        let reclaimed = harness
            .app
            .clone()
            .oneshot(json_request(
                "POST",
                &format!("/v1/tasks/{task_id}/claim"),
                serde_json::json!({}),
                &creator.token,
            ))
            .await
            .expect("second claim");
        assert_eq!(reclaimed.status(), StatusCode::BAD_REQUEST);

        let mine = body_json(
            harness
                .app
                .clone()
                .oneshot(get_request("/v1/tasks/mine", &member.token))
                .await
                .expect("mine"),
        )
        .await;
        assert_eq!(mine["tasks"].as_array().expect("tasks").len(), 1);

        let completed = harness
            .app
            .clone()
            .oneshot(json_request(
                "POST",
                &format!("/v1/tasks/{task_id}/complete"),
                serde_json::json!({}),
                &member.token,
            ))
            .await
            .expect("complete");
        assert_eq!(completed.status(), StatusCode::OK);

        let stats = body_json(
            harness
                .app
                .clone()
                .oneshot(get_request(
                    &format!("/v1/groups/{group_id}/tasks/statistics"),
                    &creator.token,
                ))
                .await
                .expect("stats"),
        )
        .await;
        assert_eq!(stats["completed"], 1);
        assert_eq!(stats["pending"], 0);
    }

    #[tokio::test]
    async fn pending_listing_hides_claimed_tasks() {
        let harness = test_app();
        let creator = harness.user("marta");
        let group_id = setup_group(&harness, &creator).await;

        for title in ["a", "b"] {
            harness
                .app
                .clone()
                .oneshot(json_request(
                    "POST",
                    &format!("/v1/groups/{group_id}/tasks"),
                    serde_json::json!({ "title": title }),
                    &creator.token,
                ))
                .await
                .expect("create");
        }

        let listed = body_json(
            harness
                .app
                .clone()
                .oneshot(get_request(&format!("/v1/groups/{group_id}/tasks"), &creator.token))
                .await
                .expect("list"),
        )
        .await;
        let tasks = listed["tasks"].as_array().expect("tasks");
        assert_eq!(tasks.len(), 2);
        let task_id = tasks[0]["id"].as_str().expect("task id").to_string();

        harness
            .app
            .clone()
            .oneshot(json_request(
                "POST",
                &format!("/v1/tasks/{task_id}/claim"),
                serde_json::json!({}),
                &creator.token,
            ))
            .await
            .expect("claim");

        let listed = body_json(
            harness
                .app
                .clone()
                .oneshot(get_request(&format!("/v1/groups/{group_id}/tasks"), &creator.token))
                .await
                .expect("list"),
        )
        .await;
        assert_eq!(listed["tasks"].as_array().expect("tasks").len(), 1);
    }

    #[tokio::test]
    async fn delete_requires_task_or_group_creator() {
        let harness = test_app();
        let creator = harness.user("marta");
        let member = harness.user("luca");
        let other_member = harness.user("gia");
        let group_id = setup_group(&harness, &creator).await;
        harness.deps.groups.add_member(group_id, member.user_id).await.expect("add member");
        harness.deps.groups.add_member(group_id, other_member.user_id).await.expect("add member");

        let created = body_json(
            harness
                .app
                .clone()
                .oneshot(json_request(
                    "POST",
                    &format!("/v1/groups/{group_id}/tasks"),
                    serde_json::json!({ "title": "member task" }),
                    &member.token,
                ))
                .await
                .expect("create"),
        )
        .await;
        let task_id = created["task"]["id"].as_str().expect("task id").to_string();

        let forbidden_delete = harness
            .app
            .clone()
            .oneshot(delete_request(&format!("/v1/tasks/{task_id}"), &other_member.token))
            .await
            .expect("forbidden delete");
        assert_eq!(forbidden_delete.status(), StatusCode::FORBIDDEN);

        let group_creator_delete = harness
            .app
            .clone()
            .oneshot(delete_request(&format!("/v1/tasks/{task_id}"), &creator.token))
            .await
            .expect("creator delete");
        assert_eq!(group_creator_delete.status(), StatusCode::NO_CONTENT);
    }
}
