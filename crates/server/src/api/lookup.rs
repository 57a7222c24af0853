// Static reference tables: study subjects and supported cities.
//
// Routes (unauthenticated — the sign-up screens need them before login):
//   GET /v1/lookup/subjects
//   GET /v1/lookup/cities

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use sqlx::PgPool;
use studia_common::types::LookupEntry;

use crate::error::ApiError;

use super::{map_sqlx_error, ApiDeps};

#[derive(Clone)]
pub enum LookupStore {
    Postgres(PgPool),
    #[cfg_attr(not(test), allow(dead_code))]
    Memory(()),
}

/// Seed data for the memory store; mirrors the rows shipped in migrations.
const DEFAULT_SUBJECTS: &[(&str, &str)] = &[
    ("algorithms", "Algorithms"),
    ("calculus", "Calculus"),
    ("chemistry", "Chemistry"),
    ("history", "History"),
    ("physics", "Physics"),
];

const DEFAULT_CITIES: &[(&str, &str)] =
    &[("milan", "Milan"), ("rome", "Rome"), ("turin", "Turin")];

impl LookupStore {
    pub fn memory() -> Self {
        Self::Memory(())
    }

    pub async fn subjects(&self) -> Result<Vec<LookupEntry>, ApiError> {
        self.entries("subjects", DEFAULT_SUBJECTS).await
    }

    pub async fn cities(&self) -> Result<Vec<LookupEntry>, ApiError> {
        self.entries("cities", DEFAULT_CITIES).await
    }

    async fn entries(
        &self,
        table: &str,
        defaults: &[(&str, &str)],
    ) -> Result<Vec<LookupEntry>, ApiError> {
        match self {
            Self::Postgres(pool) => {
                let rows = sqlx::query_as::<_, (String, String)>(&format!(
                    "SELECT key, value FROM {table} ORDER BY value ASC"
                ))
                .fetch_all(pool)
                .await
                .map_err(map_sqlx_error)?;
                Ok(rows.into_iter().map(|(key, value)| LookupEntry { key, value }).collect())
            }
            Self::Memory(()) => Ok(defaults
                .iter()
                .map(|(key, value)| LookupEntry {
                    key: key.to_string(),
                    value: value.to_string(),
                })
                .collect()),
        }
    }
}

#[derive(Serialize)]
struct SubjectsEnvelope {
    subjects: Vec<LookupEntry>,
}

#[derive(Serialize)]
struct CitiesEnvelope {
    cities: Vec<LookupEntry>,
}

pub fn router(deps: ApiDeps) -> Router {
    Router::new()
        .route("/v1/lookup/subjects", get(list_subjects))
        .route("/v1/lookup/cities", get(list_cities))
        .with_state(deps)
}

async fn list_subjects(State(deps): State<ApiDeps>) -> Result<Json<SubjectsEnvelope>, ApiError> {
    Ok(Json(SubjectsEnvelope { subjects: deps.lookup.subjects().await? }))
}

async fn list_cities(State(deps): State<ApiDeps>) -> Result<Json<CitiesEnvelope>, ApiError> {
    Ok(Json(CitiesEnvelope { cities: deps.lookup.cities().await? }))
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::Request, http::StatusCode};
    use tower::ServiceExt;

    use crate::api::testkit::{body_json, test_app};

    #[tokio::test]
    async fn lookup_tables_are_readable_without_auth() {
        let harness = test_app();

        let response = harness
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/v1/lookup/subjects")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("subjects request should return response");
        assert_eq!(response.status(), StatusCode::OK);
        let subjects = body_json(response).await;
        assert!(!subjects["subjects"].as_array().expect("subjects").is_empty());

        let response = harness
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/v1/lookup/cities")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("cities request should return response");
        assert_eq!(response.status(), StatusCode::OK);
        let cities = body_json(response).await;
        assert_eq!(cities["cities"][0]["value"], "Milan");
    }
}
