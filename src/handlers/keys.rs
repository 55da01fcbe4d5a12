//! # Key Administration Handlers
//!
//! Operator endpoints for registering keys, toggling them, and inspecting pool health.
//! Secrets are accepted on create and only ever returned masked.

use std::sync::Arc;

use axum::{
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::OperatorAuth;
use crate::error::ApiError;
use crate::repositories::{ApiKeyRepository, ApiKeySummary, NewApiKey, ProviderKeyStats};
use crate::server::AppState;

/// Query parameters for key listing
#[derive(Debug, Deserialize, Serialize, IntoParams, ToSchema)]
pub struct ListKeysQuery {
    /// Optional provider filter, e.g. "gemini"
    pub provider: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct KeysResponse {
    pub keys: Vec<ApiKeySummary>,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct UpdateKeyRequest {
    /// `false` takes the key out of rotation
    pub is_active: bool,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct KeyStatsResponse {
    pub providers: Vec<ProviderKeyStats>,
}

fn repository(state: &AppState) -> ApiKeyRepository {
    ApiKeyRepository::new(Arc::clone(&state.db), state.crypto_key.clone())
}

/// Register a new provider key
#[utoipa::path(
    post,
    path = "/keys",
    security(("bearer_auth" = [])),
    request_body = NewApiKey,
    responses(
        (status = 201, description = "Key registered", body = ApiKeySummary),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 409, description = "Secret already registered", body = ApiError)
    ),
    tag = "keys"
)]
pub async fn create_key(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    payload: Result<Json<NewApiKey>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiKeySummary>), ApiError> {
    let Json(new_key) = payload?;
    let summary = repository(&state).create(new_key).await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

/// List keys, newest first
#[utoipa::path(
    get,
    path = "/keys",
    security(("bearer_auth" = [])),
    params(ListKeysQuery),
    responses(
        (status = 200, description = "Keys with masked secrets", body = KeysResponse),
        (status = 400, description = "Invalid provider filter", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "keys"
)]
pub async fn list_keys(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    query: Result<Query<ListKeysQuery>, QueryRejection>,
) -> Result<Json<KeysResponse>, ApiError> {
    let Query(query) = query?;
    let provider = query
        .provider
        .as_deref()
        .map(str::trim)
        .filter(|provider| !provider.is_empty());

    let keys = repository(&state).list(provider).await?;
    Ok(Json(KeysResponse { keys }))
}

/// Fetch one key
#[utoipa::path(
    get,
    path = "/keys/{id}",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Key id")),
    responses(
        (status = 200, description = "Key with masked secret", body = ApiKeySummary),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "Unknown key", body = ApiError)
    ),
    tag = "keys"
)]
pub async fn get_key(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<ApiKeySummary>, ApiError> {
    let Path(id) = path?;
    repository(&state)
        .find(id)
        .await?
        .map(Json)
        .ok_or_else(|| {
            ApiError::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                &format!("API key {} not found", id),
            )
        })
}

/// Enable or disable a key
#[utoipa::path(
    patch,
    path = "/keys/{id}",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Key id")),
    request_body = UpdateKeyRequest,
    responses(
        (status = 200, description = "Key updated", body = ApiKeySummary),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "Unknown key", body = ApiError)
    ),
    tag = "keys"
)]
pub async fn update_key(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<UpdateKeyRequest>, JsonRejection>,
) -> Result<Json<ApiKeySummary>, ApiError> {
    let Path(id) = path?;
    let Json(request) = payload?;

    let summary = repository(&state).set_active(id, request.is_active).await?;
    Ok(Json(summary))
}

/// Return a rate-limited key to service now
#[utoipa::path(
    post,
    path = "/keys/{id}/clear-rate-limit",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Key id")),
    responses(
        (status = 200, description = "Rate limit cleared", body = ApiKeySummary),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "Unknown key", body = ApiError)
    ),
    tag = "keys"
)]
pub async fn clear_rate_limit(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<ApiKeySummary>, ApiError> {
    let Path(id) = path?;
    let summary = repository(&state).clear_rate_limit(id).await?;
    Ok(Json(summary))
}

/// Per-provider key counts and usage totals
#[utoipa::path(
    get,
    path = "/keys/stats",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Aggregate key stats", body = KeyStatsResponse),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "keys"
)]
pub async fn key_stats(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
) -> Result<Json<KeyStatsResponse>, ApiError> {
    let providers = repository(&state).stats().await?;
    Ok(Json(KeyStatsResponse { providers }))
}
