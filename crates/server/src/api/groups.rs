// Group endpoints.
//
// Routes:
//   POST   /v1/groups                                        — create
//   GET    /v1/groups                                        — public listing
//   GET    /v1/groups/owned                                  — caller's created groups
//   GET    /v1/groups/member-of                              — caller's memberships
//   GET    /v1/groups/search?q=&city=                        — public search
//   POST   /v1/groups/join                                   — join by invite token
//   GET    /v1/groups/{id}                                   — fetch
//   PATCH  /v1/groups/{id}                                   — edit (creator)
//   DELETE /v1/groups/{id}                                   — delete (creator, cascades)
//   POST   /v1/groups/{id}/join-requests                     — request membership
//   POST   /v1/groups/{id}/join-requests/{user_id}/accept    — accept (creator)
//   POST   /v1/groups/{id}/join-requests/{user_id}/decline   — decline (creator)
//   POST   /v1/groups/{id}/leave                             — leave
//   POST   /v1/groups/{id}/invite-token                      — mint invite token (creator)

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use studia_common::types::{Group, GroupPrivacy};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    auth::{
        jwt::IdentityTokenService,
        middleware::{require_bearer_auth, require_verified, AuthenticatedUser},
    },
    error::{ApiError, ErrorCode},
    validation::{require_non_empty, ValidatedJson},
};

use super::{bad_request, forbidden, map_sqlx_error, not_found, ApiDeps};

const INVITE_TOKEN_BYTES: usize = 16;

// ── Public API types ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub subjects: Vec<String>,
    pub privacy: GroupPrivacy,
    pub city: String,
}

#[derive(Deserialize)]
pub struct UpdateGroupRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub subjects: Option<Vec<String>>,
    pub privacy: Option<GroupPrivacy>,
    pub city: Option<String>,
}

#[derive(Deserialize)]
pub struct SearchGroupsQuery {
    #[serde(default)]
    pub q: String,
    pub city: Option<String>,
}

#[derive(Deserialize)]
pub struct JoinByTokenRequest {
    pub token: String,
}

#[derive(Serialize)]
struct GroupEnvelope {
    group: Group,
}

#[derive(Serialize)]
struct GroupsEnvelope {
    groups: Vec<Group>,
}

#[derive(Serialize)]
struct InviteTokenEnvelope {
    invite_token: String,
    join_url: String,
}

/// The caller's standing within one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupRole {
    Creator,
    Member,
    Pending,
}

impl GroupRole {
    pub fn is_participant(self) -> bool {
        matches!(self, Self::Creator | Self::Member)
    }
}

// ── Store ────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub enum GroupStore {
    Postgres(PgPool),
    #[cfg_attr(not(test), allow(dead_code))]
    Memory(Arc<RwLock<MemoryGroupStore>>),
}

#[derive(Default)]
pub struct MemoryGroupStore {
    groups: HashMap<Uuid, Group>,
    invite_hashes: HashMap<Uuid, String>,
}

#[derive(sqlx::FromRow)]
struct GroupRow {
    id: Uuid,
    name: String,
    description: String,
    subjects: Vec<String>,
    privacy: String,
    creator_id: Uuid,
    city: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct MembershipRow {
    group_id: Uuid,
    user_id: Uuid,
    status: String,
}

impl GroupRow {
    fn into_group(self, members: Vec<Uuid>, pending_requests: Vec<Uuid>) -> Result<Group, ApiError> {
        let privacy = GroupPrivacy::parse(&self.privacy).ok_or_else(|| {
            super::persistence_failure(anyhow::anyhow!(
                "invalid group privacy '{}' in database",
                self.privacy
            ))
        })?;

        Ok(Group {
            id: self.id,
            name: self.name,
            description: self.description,
            subjects: self.subjects,
            privacy,
            creator_id: self.creator_id,
            members,
            pending_requests,
            city: self.city,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl GroupStore {
    pub fn memory() -> Self {
        Self::Memory(Arc::new(RwLock::new(MemoryGroupStore::default())))
    }

    pub async fn create(&self, creator_id: Uuid, req: CreateGroupRequest) -> Result<Group, ApiError> {
        match self {
            Self::Postgres(pool) => create_pg(pool, creator_id, req).await,
            Self::Memory(store) => create_mem(store, creator_id, req).await,
        }
    }

    pub async fn get(&self, group_id: Uuid) -> Result<Group, ApiError> {
        match self {
            Self::Postgres(pool) => get_pg(pool, group_id).await,
            Self::Memory(store) => {
                let store = store.read().await;
                store.groups.get(&group_id).cloned().ok_or_else(|| not_found("group not found"))
            }
        }
    }

    pub async fn list_public(&self) -> Result<Vec<Group>, ApiError> {
        match self {
            Self::Postgres(pool) => {
                list_pg(pool, "WHERE privacy = 'public'", &[]).await
            }
            Self::Memory(store) => {
                let store = store.read().await;
                let mut groups: Vec<Group> = store
                    .groups
                    .values()
                    .filter(|group| group.privacy == GroupPrivacy::Public)
                    .cloned()
                    .collect();
                groups.sort_by_key(|group| group.created_at);
                Ok(groups)
            }
        }
    }

    pub async fn list_owned(&self, user_id: Uuid) -> Result<Vec<Group>, ApiError> {
        match self {
            Self::Postgres(pool) => list_pg(pool, "WHERE creator_id = $1", &[user_id]).await,
            Self::Memory(store) => {
                let store = store.read().await;
                let mut groups: Vec<Group> = store
                    .groups
                    .values()
                    .filter(|group| group.creator_id == user_id)
                    .cloned()
                    .collect();
                groups.sort_by_key(|group| group.created_at);
                Ok(groups)
            }
        }
    }

    pub async fn list_member_of(&self, user_id: Uuid) -> Result<Vec<Group>, ApiError> {
        match self {
            Self::Postgres(pool) => {
                list_pg(
                    pool,
                    "WHERE id IN (SELECT group_id FROM group_members \
                     WHERE user_id = $1 AND status = 'member')",
                    &[user_id],
                )
                .await
            }
            Self::Memory(store) => {
                let store = store.read().await;
                let mut groups: Vec<Group> = store
                    .groups
                    .values()
                    .filter(|group| group.members.contains(&user_id))
                    .cloned()
                    .collect();
                groups.sort_by_key(|group| group.created_at);
                Ok(groups)
            }
        }
    }

    pub async fn search(
        &self,
        query: &str,
        city: &str,
        exclude_user: Uuid,
    ) -> Result<Vec<Group>, ApiError> {
        match self {
            Self::Postgres(pool) => search_pg(pool, query, city, exclude_user).await,
            Self::Memory(store) => {
                let needle = query.to_lowercase();
                let city = city.to_lowercase();
                let store = store.read().await;
                let mut groups: Vec<Group> = store
                    .groups
                    .values()
                    .filter(|group| group.privacy == GroupPrivacy::Public)
                    .filter(|group| group.city.to_lowercase() == city)
                    .filter(|group| !group.is_participant(exclude_user))
                    .filter(|group| {
                        group.name.to_lowercase().contains(&needle)
                            || group
                                .subjects
                                .iter()
                                .any(|subject| subject.to_lowercase().contains(&needle))
                    })
                    .cloned()
                    .collect();
                groups.sort_by_key(|group| group.created_at);
                Ok(groups)
            }
        }
    }

    pub async fn update(
        &self,
        group_id: Uuid,
        req: UpdateGroupRequest,
    ) -> Result<Group, ApiError> {
        match self {
            Self::Postgres(pool) => update_pg(pool, group_id, req).await,
            Self::Memory(store) => update_mem(store, group_id, req).await,
        }
    }

    pub async fn delete(&self, group_id: Uuid) -> Result<(), ApiError> {
        match self {
            Self::Postgres(pool) => {
                let result = sqlx::query("DELETE FROM groups WHERE id = $1")
                    .bind(group_id)
                    .execute(pool)
                    .await
                    .map_err(map_sqlx_error)?;
                if result.rows_affected() == 0 {
                    return Err(not_found("group not found"));
                }
                Ok(())
            }
            Self::Memory(store) => {
                let mut store = store.write().await;
                store.invite_hashes.remove(&group_id);
                store
                    .groups
                    .remove(&group_id)
                    .map(|_| ())
                    .ok_or_else(|| not_found("group not found"))
            }
        }
    }

    /// The caller's standing in the group, if any.
    pub async fn role_for_user(
        &self,
        group_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<GroupRole>, ApiError> {
        let group = self.get(group_id).await?;
        if group.creator_id == user_id {
            return Ok(Some(GroupRole::Creator));
        }
        if group.members.contains(&user_id) {
            return Ok(Some(GroupRole::Member));
        }
        if group.pending_requests.contains(&user_id) {
            return Ok(Some(GroupRole::Pending));
        }
        Ok(None)
    }

    pub async fn request_join(&self, group_id: Uuid, user_id: Uuid) -> Result<Group, ApiError> {
        match self.role_for_user(group_id, user_id).await? {
            Some(GroupRole::Creator) | Some(GroupRole::Member) => {
                return Err(bad_request("you are already in this group"));
            }
            Some(GroupRole::Pending) => {
                return Err(bad_request("join request already pending"));
            }
            None => {}
        }

        match self {
            Self::Postgres(pool) => {
                sqlx::query(
                    "INSERT INTO group_members (group_id, user_id, status) \
                     VALUES ($1, $2, 'pending')",
                )
                .bind(group_id)
                .bind(user_id)
                .execute(pool)
                .await
                .map_err(map_sqlx_error)?;
            }
            Self::Memory(store) => {
                let mut store = store.write().await;
                if let Some(group) = store.groups.get_mut(&group_id) {
                    group.pending_requests.push(user_id);
                }
            }
        }

        self.get(group_id).await
    }

    /// Flip a pending request to full membership in one operation, so the
    /// user is never in both sets.
    pub async fn accept_request(&self, group_id: Uuid, user_id: Uuid) -> Result<Group, ApiError> {
        match self {
            Self::Postgres(pool) => {
                let result = sqlx::query(
                    "UPDATE group_members SET status = 'member', joined_at = now() \
                     WHERE group_id = $1 AND user_id = $2 AND status = 'pending'",
                )
                .bind(group_id)
                .bind(user_id)
                .execute(pool)
                .await
                .map_err(map_sqlx_error)?;
                if result.rows_affected() == 0 {
                    return Err(not_found("join request not found"));
                }
            }
            Self::Memory(store) => {
                let mut store = store.write().await;
                let group =
                    store.groups.get_mut(&group_id).ok_or_else(|| not_found("group not found"))?;
                let before = group.pending_requests.len();
                group.pending_requests.retain(|id| *id != user_id);
                if group.pending_requests.len() == before {
                    return Err(not_found("join request not found"));
                }
                group.members.push(user_id);
            }
        }

        self.get(group_id).await
    }

    pub async fn decline_request(&self, group_id: Uuid, user_id: Uuid) -> Result<Group, ApiError> {
        match self {
            Self::Postgres(pool) => {
                let result = sqlx::query(
                    "DELETE FROM group_members \
                     WHERE group_id = $1 AND user_id = $2 AND status = 'pending'",
                )
                .bind(group_id)
                .bind(user_id)
                .execute(pool)
                .await
                .map_err(map_sqlx_error)?;
                if result.rows_affected() == 0 {
                    return Err(not_found("join request not found"));
                }
            }
            Self::Memory(store) => {
                let mut store = store.write().await;
                let group =
                    store.groups.get_mut(&group_id).ok_or_else(|| not_found("group not found"))?;
                let before = group.pending_requests.len();
                group.pending_requests.retain(|id| *id != user_id);
                if group.pending_requests.len() == before {
                    return Err(not_found("join request not found"));
                }
            }
        }

        self.get(group_id).await
    }

    pub async fn leave(&self, group_id: Uuid, user_id: Uuid) -> Result<(), ApiError> {
        match self {
            Self::Postgres(pool) => {
                let result = sqlx::query(
                    "DELETE FROM group_members \
                     WHERE group_id = $1 AND user_id = $2 AND status = 'member'",
                )
                .bind(group_id)
                .bind(user_id)
                .execute(pool)
                .await
                .map_err(map_sqlx_error)?;
                if result.rows_affected() == 0 {
                    return Err(not_found("membership not found"));
                }
                Ok(())
            }
            Self::Memory(store) => {
                let mut store = store.write().await;
                let group =
                    store.groups.get_mut(&group_id).ok_or_else(|| not_found("group not found"))?;
                let before = group.members.len();
                group.members.retain(|id| *id != user_id);
                if group.members.len() == before {
                    return Err(not_found("membership not found"));
                }
                Ok(())
            }
        }
    }

    pub async fn add_member(&self, group_id: Uuid, user_id: Uuid) -> Result<(), ApiError> {
        match self {
            Self::Postgres(pool) => {
                sqlx::query(
                    "INSERT INTO group_members (group_id, user_id, status) \
                     VALUES ($1, $2, 'member') \
                     ON CONFLICT (group_id, user_id) DO UPDATE SET status = 'member'",
                )
                .bind(group_id)
                .bind(user_id)
                .execute(pool)
                .await
                .map_err(map_sqlx_error)?;
                Ok(())
            }
            Self::Memory(store) => {
                let mut store = store.write().await;
                let group =
                    store.groups.get_mut(&group_id).ok_or_else(|| not_found("group not found"))?;
                group.pending_requests.retain(|id| *id != user_id);
                if !group.members.contains(&user_id) {
                    group.members.push(user_id);
                }
                Ok(())
            }
        }
    }

    pub async fn store_invite_hash(&self, group_id: Uuid, hash: &str) -> Result<(), ApiError> {
        match self {
            Self::Postgres(pool) => {
                let result =
                    sqlx::query("UPDATE groups SET invite_token_hash = $2 WHERE id = $1")
                        .bind(group_id)
                        .bind(hash)
                        .execute(pool)
                        .await
                        .map_err(map_sqlx_error)?;
                if result.rows_affected() == 0 {
                    return Err(not_found("group not found"));
                }
                Ok(())
            }
            Self::Memory(store) => {
                let mut store = store.write().await;
                if !store.groups.contains_key(&group_id) {
                    return Err(not_found("group not found"));
                }
                store.invite_hashes.insert(group_id, hash.to_string());
                Ok(())
            }
        }
    }

    pub async fn find_by_invite_hash(&self, hash: &str) -> Result<Group, ApiError> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query_scalar::<_, Uuid>(
                    "SELECT id FROM groups WHERE invite_token_hash = $1",
                )
                .bind(hash)
                .fetch_optional(pool)
                .await
                .map_err(map_sqlx_error)?
                .ok_or_else(|| not_found("group not found"))?;
                self.get(row).await
            }
            Self::Memory(store) => {
                let group_id = {
                    let store = store.read().await;
                    store
                        .invite_hashes
                        .iter()
                        .find(|(_, stored)| stored.as_str() == hash)
                        .map(|(group_id, _)| *group_id)
                };
                match group_id {
                    Some(group_id) => self.get(group_id).await,
                    None => Err(not_found("group not found")),
                }
            }
        }
    }
}

// ── Postgres queries ─────────────────────────────────────────────────────────

const GROUP_COLUMNS: &str = "id, name, description, subjects, privacy, creator_id, city, \
                             created_at, updated_at";

async fn memberships_for(
    pool: &PgPool,
    group_ids: &[Uuid],
) -> Result<HashMap<Uuid, (Vec<Uuid>, Vec<Uuid>)>, ApiError> {
    let rows = sqlx::query_as::<_, MembershipRow>(
        "SELECT group_id, user_id, status FROM group_members \
         WHERE group_id = ANY($1::uuid[]) ORDER BY joined_at ASC",
    )
    .bind(group_ids)
    .fetch_all(pool)
    .await
    .map_err(map_sqlx_error)?;

    let mut by_group: HashMap<Uuid, (Vec<Uuid>, Vec<Uuid>)> = HashMap::new();
    for row in rows {
        let entry = by_group.entry(row.group_id).or_default();
        match row.status.as_str() {
            "member" => entry.0.push(row.user_id),
            _ => entry.1.push(row.user_id),
        }
    }
    Ok(by_group)
}

fn assemble(
    rows: Vec<GroupRow>,
    mut memberships: HashMap<Uuid, (Vec<Uuid>, Vec<Uuid>)>,
) -> Result<Vec<Group>, ApiError> {
    rows.into_iter()
        .map(|row| {
            let (members, pending) = memberships.remove(&row.id).unwrap_or_default();
            row.into_group(members, pending)
        })
        .collect()
}

async fn get_pg(pool: &PgPool, group_id: Uuid) -> Result<Group, ApiError> {
    let row = sqlx::query_as::<_, GroupRow>(&format!(
        "SELECT {GROUP_COLUMNS} FROM groups WHERE id = $1"
    ))
    .bind(group_id)
    .fetch_optional(pool)
    .await
    .map_err(map_sqlx_error)?
    .ok_or_else(|| not_found("group not found"))?;

    let memberships = memberships_for(pool, &[group_id]).await?;
    let mut groups = assemble(vec![row], memberships)?;
    Ok(groups.remove(0))
}

async fn list_pg(
    pool: &PgPool,
    filter: &str,
    binds: &[Uuid],
) -> Result<Vec<Group>, ApiError> {
    let sql = format!("SELECT {GROUP_COLUMNS} FROM groups {filter} ORDER BY created_at ASC");
    let mut query = sqlx::query_as::<_, GroupRow>(&sql);
    for bind in binds {
        query = query.bind(*bind);
    }
    let rows = query.fetch_all(pool).await.map_err(map_sqlx_error)?;

    let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
    let memberships = memberships_for(pool, &ids).await?;
    assemble(rows, memberships)
}

async fn search_pg(
    pool: &PgPool,
    query: &str,
    city: &str,
    exclude_user: Uuid,
) -> Result<Vec<Group>, ApiError> {
    let pattern = format!("%{query}%");
    let rows = sqlx::query_as::<_, GroupRow>(&format!(
        "SELECT {GROUP_COLUMNS} FROM groups \
         WHERE privacy = 'public' \
           AND lower(city) = lower($1) \
           AND (name ILIKE $2 OR EXISTS ( \
                SELECT 1 FROM unnest(subjects) AS subject WHERE subject ILIKE $2)) \
           AND creator_id <> $3 \
           AND NOT EXISTS ( \
                SELECT 1 FROM group_members \
                WHERE group_id = groups.id AND user_id = $3 AND status = 'member') \
         ORDER BY created_at ASC"
    ))
    .bind(city)
    .bind(pattern)
    .bind(exclude_user)
    .fetch_all(pool)
    .await
    .map_err(map_sqlx_error)?;

    let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
    let memberships = memberships_for(pool, &ids).await?;
    assemble(rows, memberships)
}

async fn create_pg(
    pool: &PgPool,
    creator_id: Uuid,
    req: CreateGroupRequest,
) -> Result<Group, ApiError> {
    let row = sqlx::query_as::<_, GroupRow>(&format!(
        "INSERT INTO groups (name, description, subjects, privacy, creator_id, city) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         RETURNING {GROUP_COLUMNS}"
    ))
    .bind(&req.name)
    .bind(&req.description)
    .bind(&req.subjects)
    .bind(req.privacy.as_str())
    .bind(creator_id)
    .bind(&req.city)
    .fetch_one(pool)
    .await
    .map_err(map_group_insert_error)?;

    row.into_group(Vec::new(), Vec::new())
}

async fn update_pg(
    pool: &PgPool,
    group_id: Uuid,
    req: UpdateGroupRequest,
) -> Result<Group, ApiError> {
    let privacy = req.privacy.map(GroupPrivacy::as_str);
    let row = sqlx::query_as::<_, GroupRow>(&format!(
        "UPDATE groups SET \
            name = COALESCE($2, name), \
            description = COALESCE($3, description), \
            subjects = COALESCE($4, subjects), \
            privacy = COALESCE($5, privacy), \
            city = COALESCE($6, city), \
            updated_at = now() \
         WHERE id = $1 \
         RETURNING {GROUP_COLUMNS}"
    ))
    .bind(group_id)
    .bind(req.name)
    .bind(req.description)
    .bind(req.subjects)
    .bind(privacy)
    .bind(req.city)
    .fetch_optional(pool)
    .await
    .map_err(map_group_insert_error)?
    .ok_or_else(|| not_found("group not found"))?;

    let memberships = memberships_for(pool, &[group_id]).await?;
    let mut groups = assemble(vec![row], memberships)?;
    Ok(groups.remove(0))
}

fn map_group_insert_error(error: sqlx::Error) -> ApiError {
    if let sqlx::Error::Database(db_error) = &error {
        if db_error.is_unique_violation() {
            return ApiError::from_code(ErrorCode::GroupNameTaken);
        }
    }
    map_sqlx_error(error)
}

// ── In-memory store ──────────────────────────────────────────────────────────

async fn create_mem(
    store: &RwLock<MemoryGroupStore>,
    creator_id: Uuid,
    req: CreateGroupRequest,
) -> Result<Group, ApiError> {
    let mut store = store.write().await;
    if store.groups.values().any(|group| group.name == req.name) {
        return Err(ApiError::from_code(ErrorCode::GroupNameTaken));
    }

    let now = Utc::now();
    let group = Group {
        id: Uuid::new_v4(),
        name: req.name,
        description: req.description,
        subjects: req.subjects,
        privacy: req.privacy,
        creator_id,
        members: Vec::new(),
        pending_requests: Vec::new(),
        city: req.city,
        created_at: now,
        updated_at: now,
    };
    store.groups.insert(group.id, group.clone());
    Ok(group)
}

async fn update_mem(
    store: &RwLock<MemoryGroupStore>,
    group_id: Uuid,
    req: UpdateGroupRequest,
) -> Result<Group, ApiError> {
    let mut store = store.write().await;

    if let Some(name) = req.name.as_deref() {
        if store.groups.values().any(|group| group.id != group_id && group.name == name) {
            return Err(ApiError::from_code(ErrorCode::GroupNameTaken));
        }
    }

    let group = store.groups.get_mut(&group_id).ok_or_else(|| not_found("group not found"))?;
    if let Some(name) = req.name {
        group.name = name;
    }
    if let Some(description) = req.description {
        group.description = description;
    }
    if let Some(subjects) = req.subjects {
        group.subjects = subjects;
    }
    if let Some(privacy) = req.privacy {
        group.privacy = privacy;
    }
    if let Some(city) = req.city {
        group.city = city;
    }
    group.updated_at = Utc::now();
    Ok(group.clone())
}

// ── Invite tokens ────────────────────────────────────────────────────────────

pub(crate) fn generate_invite_token() -> String {
    let mut bytes = [0u8; INVITE_TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Only the hash is stored; a leaked database row cannot be replayed as an
/// invite.
pub(crate) fn hash_invite_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

// ── Router ───────────────────────────────────────────────────────────────────

pub fn router(deps: ApiDeps, token_service: Arc<IdentityTokenService>) -> Router {
    Router::new()
        .route("/v1/groups", post(create_group).get(list_public_groups))
        .route("/v1/groups/owned", get(list_owned_groups))
        .route("/v1/groups/member-of", get(list_member_groups))
        .route("/v1/groups/search", get(search_groups))
        .route("/v1/groups/join", post(join_by_invite_token))
        .route(
            "/v1/groups/{group_id}",
            get(get_group).patch(update_group).delete(delete_group),
        )
        .route("/v1/groups/{group_id}/join-requests", post(request_join))
        .route(
            "/v1/groups/{group_id}/join-requests/{user_id}/accept",
            post(accept_join_request),
        )
        .route(
            "/v1/groups/{group_id}/join-requests/{user_id}/decline",
            post(decline_join_request),
        )
        .route("/v1/groups/{group_id}/leave", post(leave_group))
        .route("/v1/groups/{group_id}/invite-token", post(create_invite_token))
        .with_state(deps)
        .route_layer(middleware::from_fn_with_state(token_service, require_bearer_auth))
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn create_group(
    State(deps): State<ApiDeps>,
    Extension(user): Extension<AuthenticatedUser>,
    ValidatedJson(payload): ValidatedJson<CreateGroupRequest>,
) -> Result<(StatusCode, Json<GroupEnvelope>), ApiError> {
    require_verified(&user)?;
    require_non_empty("name", &payload.name)?;
    require_non_empty("description", &payload.description)?;
    require_non_empty("city", &payload.city)?;

    let group = deps.groups.create(user.user_id, payload).await?;
    Ok((StatusCode::CREATED, Json(GroupEnvelope { group })))
}

async fn list_public_groups(
    State(deps): State<ApiDeps>,
) -> Result<Json<GroupsEnvelope>, ApiError> {
    Ok(Json(GroupsEnvelope { groups: deps.groups.list_public().await? }))
}

async fn list_owned_groups(
    State(deps): State<ApiDeps>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<GroupsEnvelope>, ApiError> {
    Ok(Json(GroupsEnvelope { groups: deps.groups.list_owned(user.user_id).await? }))
}

async fn list_member_groups(
    State(deps): State<ApiDeps>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<GroupsEnvelope>, ApiError> {
    Ok(Json(GroupsEnvelope { groups: deps.groups.list_member_of(user.user_id).await? }))
}

async fn search_groups(
    State(deps): State<ApiDeps>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<SearchGroupsQuery>,
) -> Result<Json<GroupsEnvelope>, ApiError> {
    let city = query
        .city
        .as_deref()
        .map(str::trim)
        .filter(|city| !city.is_empty())
        .ok_or_else(|| bad_request("city is required for group search"))?;

    let groups = deps.groups.search(query.q.trim(), city, user.user_id).await?;
    Ok(Json(GroupsEnvelope { groups }))
}

async fn get_group(
    State(deps): State<ApiDeps>,
    Path(group_id): Path<Uuid>,
) -> Result<Json<GroupEnvelope>, ApiError> {
    Ok(Json(GroupEnvelope { group: deps.groups.get(group_id).await? }))
}

async fn update_group(
    State(deps): State<ApiDeps>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(group_id): Path<Uuid>,
    ValidatedJson(payload): ValidatedJson<UpdateGroupRequest>,
) -> Result<Json<GroupEnvelope>, ApiError> {
    require_creator(&deps, group_id, &user).await?;

    if let Some(name) = payload.name.as_deref() {
        require_non_empty("name", name)?;
    }
    if let Some(city) = payload.city.as_deref() {
        require_non_empty("city", city)?;
    }

    let group = deps.groups.update(group_id, payload).await?;
    Ok(Json(GroupEnvelope { group }))
}

async fn delete_group(
    State(deps): State<ApiDeps>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(group_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    require_creator(&deps, group_id, &user).await?;
    deps.groups.delete(group_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn request_join(
    State(deps): State<ApiDeps>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(group_id): Path<Uuid>,
) -> Result<Json<GroupEnvelope>, ApiError> {
    require_verified(&user)?;
    let group = deps.groups.request_join(group_id, user.user_id).await?;
    Ok(Json(GroupEnvelope { group }))
}

async fn accept_join_request(
    State(deps): State<ApiDeps>,
    Extension(user): Extension<AuthenticatedUser>,
    Path((group_id, requester_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<GroupEnvelope>, ApiError> {
    require_creator(&deps, group_id, &user).await?;
    let group = deps.groups.accept_request(group_id, requester_id).await?;
    Ok(Json(GroupEnvelope { group }))
}

async fn decline_join_request(
    State(deps): State<ApiDeps>,
    Extension(user): Extension<AuthenticatedUser>,
    Path((group_id, requester_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<GroupEnvelope>, ApiError> {
    require_creator(&deps, group_id, &user).await?;
    let group = deps.groups.decline_request(group_id, requester_id).await?;
    Ok(Json(GroupEnvelope { group }))
}

async fn leave_group(
    State(deps): State<ApiDeps>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(group_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    deps.groups.leave(group_id, user.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_invite_token(
    State(deps): State<ApiDeps>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(group_id): Path<Uuid>,
) -> Result<Json<InviteTokenEnvelope>, ApiError> {
    require_creator(&deps, group_id, &user).await?;

    let invite_token = generate_invite_token();
    deps.groups.store_invite_hash(group_id, &hash_invite_token(&invite_token)).await?;

    let join_url = format!("{}?token={invite_token}", deps.invite_link_base_url);
    Ok(Json(InviteTokenEnvelope { invite_token, join_url }))
}

async fn join_by_invite_token(
    State(deps): State<ApiDeps>,
    Extension(user): Extension<AuthenticatedUser>,
    ValidatedJson(payload): ValidatedJson<JoinByTokenRequest>,
) -> Result<Json<GroupEnvelope>, ApiError> {
    require_verified(&user)?;
    require_non_empty("token", &payload.token)?;

    let group = deps.groups.find_by_invite_hash(&hash_invite_token(payload.token.trim())).await?;
    if group.is_participant(user.user_id) {
        return Err(bad_request("you are already in this group"));
    }

    deps.groups.add_member(group.id, user.user_id).await?;
    Ok(Json(GroupEnvelope { group: deps.groups.get(group.id).await? }))
}

pub(crate) async fn require_creator(
    deps: &ApiDeps,
    group_id: Uuid,
    user: &AuthenticatedUser,
) -> Result<(), ApiError> {
    match deps.groups.role_for_user(group_id, user.user_id).await? {
        Some(GroupRole::Creator) => Ok(()),
        _ => Err(forbidden("only the group creator may do this")),
    }
}

pub(crate) async fn require_participant(
    deps: &ApiDeps,
    group_id: Uuid,
    user: &AuthenticatedUser,
) -> Result<(), ApiError> {
    match deps.groups.role_for_user(group_id, user.user_id).await? {
        Some(role) if role.is_participant() => Ok(()),
        _ => Err(forbidden("caller is not a member of this group")),
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
