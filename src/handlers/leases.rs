//! # Lease API Handlers
//!
//! Leasing keys, reporting how they behaved, and previewing lease order.

use axum::{
    extract::{
        Path, State,
        rejection::{JsonRejection, PathRejection},
    },
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Duration, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::OperatorAuth;
use crate::error::{ApiError, pool_exhausted, validation_error};
use crate::pool::{CandidateSummary, KeyOutcome};
use crate::server::AppState;

/// Longest cooldown a caller may request through `retry_after_seconds`.
const MAX_RETRY_AFTER_SECONDS: u64 = 86_400;

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct LeaseRequest {
    /// Provider to lease a key for, e.g. `gemini`
    pub provider: String,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct LeaseResponse {
    /// Handle to pass back when reporting an outcome
    pub key_id: Uuid,
    pub provider: String,
    /// Credential to use for the provider call
    pub secret: String,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    RateLimited,
    Failed,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct OutcomeRequest {
    pub outcome: OutcomeKind,
    /// When the provider says the limit lifts
    #[serde(default)]
    pub reset_at: Option<DateTime<FixedOffset>>,
    /// Alternative to `reset_at`, relative to now
    #[serde(default)]
    pub retry_after_seconds: Option<u64>,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct PreviewResponse {
    pub provider: String,
    /// Eligible keys in the order they would be leased
    pub candidates: Vec<CandidateSummary>,
}

/// Lease the best available key for a provider
#[utoipa::path(
    post,
    path = "/leases",
    security(("bearer_auth" = [])),
    request_body = LeaseRequest,
    responses(
        (status = 200, description = "Key leased", body = LeaseResponse),
        (status = 400, description = "Invalid provider", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 503, description = "No key available for the provider", body = ApiError)
    ),
    tag = "leases"
)]
pub async fn create_lease(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    payload: Result<Json<LeaseRequest>, JsonRejection>,
) -> Result<Json<LeaseResponse>, ApiError> {
    let Json(request) = payload?;
    let provider = request.provider.trim();

    match state.pool.lease(provider).await? {
        Some(leased) => Ok(Json(LeaseResponse {
            key_id: leased.key_id,
            provider: leased.provider.clone(),
            secret: leased.secret.as_str().to_string(),
        })),
        None => Err(pool_exhausted(
            provider,
            state.config.lease.exhausted_retry_after_seconds,
        )),
    }
}

/// Report how a leased key behaved
#[utoipa::path(
    post,
    path = "/keys/{id}/outcome",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Key id returned by the lease")),
    request_body = OutcomeRequest,
    responses(
        (status = 204, description = "Outcome recorded"),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "Unknown key", body = ApiError)
    ),
    tag = "leases"
)]
pub async fn report_outcome(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<OutcomeRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Path(key_id) = path?;
    let Json(request) = payload?;

    let outcome = resolve_outcome(
        &request,
        Utc::now().fixed_offset(),
        state.config.lease.default_rate_limit_seconds,
    )?;
    state.pool.report_outcome(key_id, outcome).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Eligible keys for a provider in lease order, without leasing
#[utoipa::path(
    get,
    path = "/pool/{provider}/preview",
    security(("bearer_auth" = [])),
    params(("provider" = String, Path, description = "Provider identifier")),
    responses(
        (status = 200, description = "Lease order preview", body = PreviewResponse),
        (status = 400, description = "Invalid provider", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "leases"
)]
pub async fn preview_pool(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    path: Result<Path<String>, PathRejection>,
) -> Result<Json<PreviewResponse>, ApiError> {
    let Path(provider) = path?;
    let candidates = state.pool.preview(&provider).await?;

    Ok(Json(PreviewResponse {
        provider,
        candidates,
    }))
}

/// Turn the request body into a pool outcome, deriving a reset time when none is given.
fn resolve_outcome(
    request: &OutcomeRequest,
    now: DateTime<FixedOffset>,
    default_rate_limit_seconds: u64,
) -> Result<KeyOutcome, ApiError> {
    match request.outcome {
        OutcomeKind::Failed => Ok(KeyOutcome::Failed),
        OutcomeKind::RateLimited => {
            if request.reset_at.is_some() && request.retry_after_seconds.is_some() {
                return Err(validation_error(
                    "Conflicting rate limit hints",
                    serde_json::json!({
                        "reset_at": "provide either reset_at or retry_after_seconds, not both"
                    }),
                ));
            }

            let reset_at = match (request.reset_at, request.retry_after_seconds) {
                (Some(reset_at), _) => reset_at,
                (None, Some(seconds)) if (1..=MAX_RETRY_AFTER_SECONDS).contains(&seconds) => {
                    now + Duration::seconds(seconds as i64)
                }
                (None, Some(_)) => {
                    return Err(validation_error(
                        "Invalid retry_after_seconds",
                        serde_json::json!({
                            "retry_after_seconds": format!(
                                "must be between 1 and {}",
                                MAX_RETRY_AFTER_SECONDS
                            )
                        }),
                    ));
                }
                (None, None) => now + Duration::seconds(default_rate_limit_seconds as i64),
            };

            Ok(KeyOutcome::RateLimited {
                reset_at: Some(reset_at),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339("2025-03-01T12:00:00Z").unwrap()
    }

    fn request(
        outcome: OutcomeKind,
        reset_at: Option<DateTime<FixedOffset>>,
        retry_after_seconds: Option<u64>,
    ) -> OutcomeRequest {
        OutcomeRequest {
            outcome,
            reset_at,
            retry_after_seconds,
        }
    }

    #[test]
    fn failed_ignores_hints() {
        let outcome =
            resolve_outcome(&request(OutcomeKind::Failed, None, Some(5)), now(), 60).unwrap();
        assert_eq!(outcome, KeyOutcome::Failed);
    }

    #[test]
    fn rate_limited_uses_explicit_reset() {
        let reset = DateTime::parse_from_rfc3339("2025-03-01T13:00:00Z").unwrap();
        let outcome =
            resolve_outcome(&request(OutcomeKind::RateLimited, Some(reset), None), now(), 60)
                .unwrap();
        assert_eq!(
            outcome,
            KeyOutcome::RateLimited {
                reset_at: Some(reset)
            }
        );
    }

    #[test]
    fn rate_limited_derives_reset_from_retry_after() {
        let outcome =
            resolve_outcome(&request(OutcomeKind::RateLimited, None, Some(120)), now(), 60)
                .unwrap();
        assert_eq!(
            outcome,
            KeyOutcome::RateLimited {
                reset_at: Some(now() + Duration::seconds(120))
            }
        );
    }

    #[test]
    fn rate_limited_falls_back_to_default_cooldown() {
        let outcome =
            resolve_outcome(&request(OutcomeKind::RateLimited, None, None), now(), 60).unwrap();
        assert_eq!(
            outcome,
            KeyOutcome::RateLimited {
                reset_at: Some(now() + Duration::seconds(60))
            }
        );
    }

    #[test]
    fn rate_limited_rejects_bad_hints() {
        let err = resolve_outcome(&request(OutcomeKind::RateLimited, None, Some(0)), now(), 60)
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let err = resolve_outcome(
            &request(OutcomeKind::RateLimited, Some(now()), Some(10)),
            now(),
            60,
        )
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn outcome_kind_wire_format() {
        let parsed: OutcomeRequest =
            serde_json::from_str(r#"{"outcome":"rate_limited","retry_after_seconds":30}"#).unwrap();
        assert_eq!(parsed.outcome, OutcomeKind::RateLimited);
        assert_eq!(parsed.retry_after_seconds, Some(30));

        assert!(serde_json::from_str::<OutcomeRequest>(r#"{"outcome":"exploded"}"#).is_err());
    }
}
