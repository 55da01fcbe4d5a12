//! # Usage Log Handlers

use std::sync::Arc;

use axum::{
    extract::{
        Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::auth::OperatorAuth;
use crate::error::ApiError;
use crate::repositories::{NewUsageLog, ProviderUsageSummary, UsageLogEntry, UsageLogRepository};
use crate::server::AppState;

/// Query parameters for usage log listing
#[derive(Debug, Deserialize, Serialize, IntoParams, ToSchema)]
pub struct ListUsageQuery {
    /// Optional provider filter
    pub provider: Option<String>,
    /// Maximum entries to return (default: 50, clamped to 1..=200)
    pub limit: Option<u64>,
}

/// Query parameters for the usage summary
#[derive(Debug, Deserialize, Serialize, IntoParams, ToSchema)]
pub struct UsageSummaryQuery {
    /// RFC 3339 lower bound on `created_at`; all time when omitted
    pub since: Option<DateTime<FixedOffset>>,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct UsageLogsResponse {
    pub entries: Vec<UsageLogEntry>,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct UsageSummaryResponse {
    pub since: Option<DateTime<FixedOffset>>,
    pub providers: Vec<ProviderUsageSummary>,
}

fn repository(state: &AppState) -> UsageLogRepository {
    UsageLogRepository::new(
        Arc::clone(&state.db),
        state.config.usage_log.prompt_preview_max_chars,
    )
}

/// Record one provider call
#[utoipa::path(
    post,
    path = "/usage-logs",
    security(("bearer_auth" = [])),
    request_body = NewUsageLog,
    responses(
        (status = 201, description = "Entry recorded", body = UsageLogEntry),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "usage"
)]
pub async fn record_usage(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    payload: Result<Json<NewUsageLog>, JsonRejection>,
) -> Result<(StatusCode, Json<UsageLogEntry>), ApiError> {
    let Json(entry) = payload?;
    let stored = repository(&state).record(entry).await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

/// Most recent usage entries
#[utoipa::path(
    get,
    path = "/usage-logs",
    security(("bearer_auth" = [])),
    params(ListUsageQuery),
    responses(
        (status = 200, description = "Entries, newest first", body = UsageLogsResponse),
        (status = 400, description = "Invalid query", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "usage"
)]
pub async fn list_usage(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    query: Result<Query<ListUsageQuery>, QueryRejection>,
) -> Result<Json<UsageLogsResponse>, ApiError> {
    let Query(query) = query?;
    let provider = query
        .provider
        .as_deref()
        .map(str::trim)
        .filter(|provider| !provider.is_empty());

    let entries = repository(&state).list_recent(provider, query.limit).await?;
    Ok(Json(UsageLogsResponse { entries }))
}

/// Call totals per provider
#[utoipa::path(
    get,
    path = "/usage-logs/summary",
    security(("bearer_auth" = [])),
    params(UsageSummaryQuery),
    responses(
        (status = 200, description = "Per-provider usage summary", body = UsageSummaryResponse),
        (status = 400, description = "Invalid query", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "usage"
)]
pub async fn usage_summary(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    query: Result<Query<UsageSummaryQuery>, QueryRejection>,
) -> Result<Json<UsageSummaryResponse>, ApiError> {
    let Query(query) = query?;
    let providers = repository(&state).summary(query.since).await?;
    Ok(Json(UsageSummaryResponse {
        since: query.since,
        providers,
    }))
}
