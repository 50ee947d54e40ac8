//! Grants collection endpoints.
//!
//! A small in-process collection that exercises the cache from both sides:
//! reads go through the cache layer, and every mutation purges the grants
//! pattern so the next read recomputes.

use crate::caching::{InvalidationService, InvalidationTarget};
use crate::core::error::{AppError, AppResult};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grant {
    pub id: Uuid,
    pub title: String,
    pub funder: Option<String>,
    pub amount: Option<u64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateGrant {
    pub title: String,
    pub funder: Option<String>,
    pub amount: Option<u64>,
}

#[derive(Clone)]
pub struct GrantsState {
    grants: Arc<DashMap<Uuid, Grant>>,
    invalidation: InvalidationService,
}

impl GrantsState {
    pub fn new(invalidation: InvalidationService) -> Self {
        Self {
            grants: Arc::new(DashMap::new()),
            invalidation,
        }
    }
}

pub fn grants_router(state: GrantsState) -> Router {
    Router::new()
        .route("/api/grants", get(list_grants).post(create_grant))
        .route("/api/grants/:id", get(get_grant).delete(delete_grant))
        .with_state(state)
}

pub async fn list_grants(State(state): State<GrantsState>) -> Json<Vec<Grant>> {
    let mut grants: Vec<Grant> = state.grants.iter().map(|g| g.value().clone()).collect();
    grants.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    Json(grants)
}

pub async fn get_grant(State(state): State<GrantsState>, Path(id): Path<Uuid>) -> AppResult<Json<Grant>> {
    state
        .grants
        .get(&id)
        .map(|g| Json(g.value().clone()))
        .ok_or_else(|| AppError::not_found(format!("grant {}", id)))
}

pub async fn create_grant(
    State(state): State<GrantsState>,
    Json(request): Json<CreateGrant>,
) -> AppResult<(StatusCode, Json<Grant>)> {
    let title = request.title.trim();
    if title.is_empty() {
        return Err(AppError::validation("title", "must not be empty"));
    }

    let grant = Grant {
        id: Uuid::new_v4(),
        title: title.to_string(),
        funder: request.funder,
        amount: request.amount,
        created_at: Utc::now(),
    };
    state.grants.insert(grant.id, grant.clone());
    info!(grant_id = %grant.id, "Grant created");

    state.invalidation.invalidate_target(InvalidationTarget::Grants).await;

    Ok((StatusCode::CREATED, Json(grant)))
}

pub async fn delete_grant(State(state): State<GrantsState>, Path(id): Path<Uuid>) -> AppResult<StatusCode> {
    if state.grants.remove(&id).is_none() {
        return Err(AppError::not_found(format!("grant {}", id)));
    }
    info!(grant_id = %id, "Grant deleted");

    state.invalidation.invalidate_target(InvalidationTarget::Grants).await;

    Ok(StatusCode::NO_CONTENT)
}
