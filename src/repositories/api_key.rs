//! Api key repository for administrative operations
//!
//! Creation, listing, enable/disable toggling, manual rate-limit resets and
//! per-provider stats for the `api_keys` table. Leasing lives in
//! [`crate::pool::KeyLeasePool`]; nothing here touches `last_used_at` or
//! `usage_count`.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use metrics::counter;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{count_where, sum_bigint};
use crate::crypto::{self, CryptoKey};
use crate::error::is_unique_violation;
use crate::models::TIER_FREE;
use crate::models::api_key::{self, Column, Entity as ApiKey};
use crate::pool::{PoolError, validate_provider, validate_tier};

/// Input for registering a new credential.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewApiKey {
    /// Provider identifier, e.g. `gemini`
    pub provider: String,
    /// Raw credential; stored sealed and never returned
    pub secret: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Defaults to `free`
    #[serde(default)]
    pub tier: Option<String>,
}

/// Administrative view of a key. The secret is only ever shown masked.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiKeySummary {
    pub id: Uuid,
    pub provider: String,
    /// First and last four characters of the secret
    pub masked_secret: String,
    pub display_name: String,
    pub tier: String,
    pub is_active: bool,
    pub usage_count: i64,
    pub last_used_at: Option<DateTime<FixedOffset>>,
    pub is_rate_limited: bool,
    pub rate_limit_reset_at: Option<DateTime<FixedOffset>>,
    pub error_count: i32,
    pub created_at: DateTime<FixedOffset>,
    pub updated_at: DateTime<FixedOffset>,
}

/// Aggregate counters for one provider's keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ProviderKeyStats {
    pub provider: String,
    pub total_keys: u64,
    pub active_keys: u64,
    /// Keys whose rate limit has not lifted yet
    pub rate_limited_keys: u64,
    pub total_usage: i64,
    pub total_errors: i64,
}

/// Repository for api key administration
#[derive(Debug, Clone)]
pub struct ApiKeyRepository {
    db: Arc<DatabaseConnection>,
    crypto_key: CryptoKey,
}

impl ApiKeyRepository {
    pub fn new(db: Arc<DatabaseConnection>, crypto_key: CryptoKey) -> Self {
        Self { db, crypto_key }
    }

    /// Registers a new key, sealing its secret.
    ///
    /// A secret already present in the pool (by fingerprint) is rejected with
    /// [`PoolError::DuplicateSecret`].
    pub async fn create(&self, new_key: NewApiKey) -> Result<ApiKeySummary, PoolError> {
        let provider = new_key.provider.trim().to_string();
        validate_provider(&provider)?;

        let tier = new_key
            .tier
            .map(|tier| tier.trim().to_string())
            .filter(|tier| !tier.is_empty())
            .unwrap_or_else(|| TIER_FREE.to_string());
        validate_tier(&tier)?;

        let secret = new_key.secret.trim();
        if secret.is_empty() {
            return Err(PoolError::EmptySecret);
        }

        let fingerprint = crypto::fingerprint(secret);
        let existing = ApiKey::find()
            .filter(Column::SecretFingerprint.eq(fingerprint.as_str()))
            .count(self.db.as_ref())
            .await?;
        if existing > 0 {
            return Err(PoolError::DuplicateSecret);
        }

        let id = Uuid::new_v4();
        let sealed = crypto::seal_secret(&self.crypto_key, id, &provider, secret)
            .map_err(|source| PoolError::Crypto { key_id: id, source })?;

        let display_name = new_key
            .display_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| format!("{} {}", provider, crypto::mask_secret(secret)));

        let now = Utc::now().fixed_offset();
        let active = api_key::ActiveModel {
            id: Set(id),
            provider: Set(provider.clone()),
            secret_ciphertext: Set(sealed),
            secret_fingerprint: Set(fingerprint),
            display_name: Set(display_name),
            is_active: Set(true),
            usage_count: Set(0),
            last_used_at: Set(None),
            is_rate_limited: Set(false),
            rate_limit_reset_at: Set(None),
            tier: Set(tier.clone()),
            error_count: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
        };

        ApiKey::insert(active)
            .exec_without_returning(self.db.as_ref())
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    PoolError::DuplicateSecret
                } else {
                    PoolError::Storage(err)
                }
            })?;

        info!(key_id = %id, provider = %provider, tier = %tier, "Registered api key");

        let model = self.require(id).await?;
        Ok(self.summarize(model))
    }

    /// Lists keys newest first, optionally for one provider.
    pub async fn list(&self, provider: Option<&str>) -> Result<Vec<ApiKeySummary>, PoolError> {
        let mut query = ApiKey::find();
        if let Some(provider) = provider {
            validate_provider(provider)?;
            query = query.filter(Column::Provider.eq(provider));
        }

        let keys = query
            .order_by_desc(Column::CreatedAt)
            .order_by_asc(Column::Id)
            .all(self.db.as_ref())
            .await?;

        Ok(keys.into_iter().map(|key| self.summarize(key)).collect())
    }

    pub async fn find(&self, id: Uuid) -> Result<Option<ApiKeySummary>, PoolError> {
        let key = ApiKey::find_by_id(id).one(self.db.as_ref()).await?;
        Ok(key.map(|key| self.summarize(key)))
    }

    /// Enables or disables a key. Disabled keys are never leased.
    pub async fn set_active(&self, id: Uuid, is_active: bool) -> Result<ApiKeySummary, PoolError> {
        let key = self.require(id).await?;

        let mut active: api_key::ActiveModel = key.into();
        active.is_active = Set(is_active);
        active.updated_at = Set(Utc::now().fixed_offset());
        let updated = active.update(self.db.as_ref()).await?;

        info!(key_id = %id, is_active, "Updated api key status");
        Ok(self.summarize(updated))
    }

    /// Returns a rate-limited key to service immediately.
    pub async fn clear_rate_limit(&self, id: Uuid) -> Result<ApiKeySummary, PoolError> {
        let key = self.require(id).await?;
        let was_limited = key.is_rate_limited;

        let mut active: api_key::ActiveModel = key.into();
        active.is_rate_limited = Set(false);
        active.rate_limit_reset_at = Set(None);
        active.updated_at = Set(Utc::now().fixed_offset());
        let updated = active.update(self.db.as_ref()).await?;

        if was_limited {
            info!(key_id = %id, "Cleared api key rate limit");
            counter!("key_pool_rate_limits_cleared_total", "source" => "operator").increment(1);
        }
        Ok(self.summarize(updated))
    }

    /// Per-provider totals, ordered by provider.
    pub async fn stats(&self) -> Result<Vec<ProviderKeyStats>, PoolError> {
        let now = Utc::now().fixed_offset();
        let still_limited = Condition::all().add(Column::IsRateLimited.eq(true)).add(
            Condition::any()
                .add(Column::RateLimitResetAt.is_null())
                .add(Column::RateLimitResetAt.gt(now)),
        );

        let rows: Vec<(String, i64, i64, i64, i64, i64)> = ApiKey::find()
            .select_only()
            .column(Column::Provider)
            .column_as(Expr::col(Column::Id).count(), "total_keys")
            .column_as(count_where(Column::IsActive.eq(true)), "active_keys")
            .column_as(count_where(still_limited), "rate_limited_keys")
            .column_as(sum_bigint(Expr::col(Column::UsageCount)), "total_usage")
            .column_as(sum_bigint(Expr::col(Column::ErrorCount)), "total_errors")
            .group_by(Column::Provider)
            .order_by_asc(Column::Provider)
            .into_tuple()
            .all(self.db.as_ref())
            .await?;

        Ok(rows
            .into_iter()
            .map(
                |(provider, total_keys, active_keys, rate_limited_keys, total_usage, total_errors)| {
                    ProviderKeyStats {
                        provider,
                        total_keys: total_keys as u64,
                        active_keys: active_keys as u64,
                        rate_limited_keys: rate_limited_keys as u64,
                        total_usage,
                        total_errors,
                    }
                },
            )
            .collect())
    }

    /// Seals any secrets still stored as plaintext. Returns the number of rows rewritten.
    pub async fn reseal_plaintext(&self) -> Result<u64, PoolError> {
        let keys = ApiKey::find()
            .order_by_asc(Column::CreatedAt)
            .all(self.db.as_ref())
            .await?;

        let mut resealed = 0;
        for key in keys {
            if crypto::is_sealed(&key.secret_ciphertext) {
                continue;
            }

            let plaintext = crypto::open_secret(
                &self.crypto_key,
                key.id,
                &key.provider,
                &key.secret_ciphertext,
            )
            .map_err(|source| PoolError::Crypto {
                key_id: key.id,
                source,
            })?;
            let sealed = crypto::seal_secret(&self.crypto_key, key.id, &key.provider, &plaintext)
                .map_err(|source| PoolError::Crypto {
                    key_id: key.id,
                    source,
                })?;

            // Only the secret column changes; counters stay with the lease path.
            ApiKey::update_many()
                .col_expr(Column::SecretCiphertext, Expr::val(sealed).into())
                .col_expr(
                    Column::UpdatedAt,
                    Expr::val(Utc::now().fixed_offset()).into(),
                )
                .filter(Column::Id.eq(key.id))
                .exec(self.db.as_ref())
                .await?;

            info!(key_id = %key.id, provider = %key.provider, "Sealed plaintext api key");
            resealed += 1;
        }

        Ok(resealed)
    }

    async fn require(&self, id: Uuid) -> Result<api_key::Model, PoolError> {
        ApiKey::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .ok_or(PoolError::KeyNotFound(id))
    }

    fn summarize(&self, key: api_key::Model) -> ApiKeySummary {
        let masked_secret =
            match crypto::open_secret(&self.crypto_key, key.id, &key.provider, &key.secret_ciphertext)
            {
                Ok(secret) => crypto::mask_secret(&secret),
                Err(err) => {
                    warn!(key_id = %key.id, error = %err, "Unable to open secret for masking");
                    "***".to_string()
                }
            };

        ApiKeySummary {
            id: key.id,
            provider: key.provider,
            masked_secret,
            display_name: key.display_name,
            tier: key.tier,
            is_active: key.is_active,
            usage_count: key.usage_count,
            last_used_at: key.last_used_at,
            is_rate_limited: key.is_rate_limited,
            rate_limit_reset_at: key.rate_limit_reset_at,
            error_count: key.error_count,
            created_at: key.created_at,
            updated_at: key.updated_at,
        }
    }
}
