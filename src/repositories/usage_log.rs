//! Usage log repository
//!
//! Append-only sink for provider call records. Entries are never updated or
//! deleted here.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{count_where, sum_bigint};
use crate::models::usage_log::{self, Column, Entity as UsageLog};
use crate::pool::{PoolError, at_utc, validate_provider};

pub const DEFAULT_LIST_LIMIT: u64 = 50;
pub const MAX_LIST_LIMIT: u64 = 200;

/// One provider call to record.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct NewUsageLog {
    #[serde(default)]
    pub user_id: Option<Uuid>,
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    /// HTTP status returned by the provider
    pub status_code: i32,
    /// Negative values are stored as 0
    #[serde(default)]
    pub duration_ms: i64,
    /// Serialized prompt; truncated before storage
    #[serde(default)]
    pub prompt_preview: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UsageLogEntry {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub provider: String,
    pub model: Option<String>,
    pub endpoint: Option<String>,
    pub status_code: i32,
    pub duration_ms: i32,
    pub prompt_preview: Option<String>,
    pub created_at: DateTime<FixedOffset>,
}

impl From<usage_log::Model> for UsageLogEntry {
    fn from(model: usage_log::Model) -> Self {
        Self {
            id: model.id,
            user_id: model.user_id,
            provider: model.provider,
            model: model.model,
            endpoint: model.endpoint,
            status_code: model.status_code,
            duration_ms: model.duration_ms,
            prompt_preview: model.prompt_preview,
            created_at: model.created_at,
        }
    }
}

/// Per-provider call totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ProviderUsageSummary {
    pub provider: String,
    pub calls: u64,
    /// Calls whose status code was 400 or above
    pub errors: u64,
    pub avg_duration_ms: f64,
}

#[derive(Debug, Clone)]
pub struct UsageLogRepository {
    db: Arc<DatabaseConnection>,
    prompt_preview_max_chars: usize,
}

impl UsageLogRepository {
    pub fn new(db: Arc<DatabaseConnection>, prompt_preview_max_chars: usize) -> Self {
        Self {
            db,
            prompt_preview_max_chars,
        }
    }

    pub async fn record(&self, entry: NewUsageLog) -> Result<UsageLogEntry, PoolError> {
        validate_provider(&entry.provider)?;

        let id = Uuid::new_v4();
        let active = usage_log::ActiveModel {
            id: Set(id),
            user_id: Set(entry.user_id),
            provider: Set(entry.provider),
            model: Set(entry.model),
            endpoint: Set(entry.endpoint),
            status_code: Set(entry.status_code),
            duration_ms: Set(clamp_duration(entry.duration_ms)),
            prompt_preview: Set(entry
                .prompt_preview
                .map(|preview| truncate_chars(&preview, self.prompt_preview_max_chars))),
            created_at: Set(Utc::now().fixed_offset()),
        };

        UsageLog::insert(active)
            .exec_without_returning(self.db.as_ref())
            .await?;

        let stored = UsageLog::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| {
                PoolError::Storage(sea_orm::DbErr::RecordNotFound(format!("usage log {}", id)))
            })?;

        tracing::debug!(
            usage_log_id = %stored.id,
            provider = %stored.provider,
            status_code = stored.status_code,
            duration_ms = stored.duration_ms,
            "Recorded usage log"
        );

        Ok(stored.into())
    }

    /// Newest entries first. `limit` is clamped to `1..=200`, default 50.
    pub async fn list_recent(
        &self,
        provider: Option<&str>,
        limit: Option<u64>,
    ) -> Result<Vec<UsageLogEntry>, PoolError> {
        let mut query = UsageLog::find();
        if let Some(provider) = provider {
            validate_provider(provider)?;
            query = query.filter(Column::Provider.eq(provider));
        }

        let limit = limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT);

        let entries = query
            .order_by_desc(Column::CreatedAt)
            .order_by_desc(Column::Id)
            .limit(limit)
            .all(self.db.as_ref())
            .await?;

        Ok(entries.into_iter().map(UsageLogEntry::from).collect())
    }

    /// Call counts, error counts and mean duration per provider since `since` (all time if `None`).
    pub async fn summary(
        &self,
        since: Option<DateTime<FixedOffset>>,
    ) -> Result<Vec<ProviderUsageSummary>, PoolError> {
        let mut query = UsageLog::find()
            .select_only()
            .column(Column::Provider)
            .column_as(Expr::col(Column::Id).count(), "calls")
            .column_as(count_where(Column::StatusCode.gte(400)), "errors")
            .column_as(sum_bigint(Expr::col(Column::DurationMs)), "duration_total");
        if let Some(since) = since {
            query = query.filter(Column::CreatedAt.gte(at_utc(since)));
        }

        let rows: Vec<(String, i64, i64, i64)> = query
            .group_by(Column::Provider)
            .order_by_asc(Column::Provider)
            .into_tuple()
            .all(self.db.as_ref())
            .await?;

        Ok(rows
            .into_iter()
            .map(|(provider, calls, errors, duration_total)| ProviderUsageSummary {
                provider,
                calls: calls as u64,
                errors: errors as u64,
                avg_duration_ms: duration_total as f64 / calls.max(1) as f64,
            })
            .collect())
    }
}

fn clamp_duration(duration_ms: i64) -> i32 {
    duration_ms.clamp(0, i64::from(i32::MAX)) as i32
}

/// Keep at most `max_chars` characters, never splitting a character.
pub fn truncate_chars(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((byte_index, _)) => value[..byte_index].to_string(),
        None => value.to_string(),
    }
}
