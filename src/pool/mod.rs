//! # Key Lease Pool
//!
//! Hands out provider credentials from the shared `api_keys` table. A lease
//! picks the best-ranked eligible key for a provider, claims it with
//! `SELECT ... FOR UPDATE SKIP LOCKED`, bumps its usage counters and returns
//! the opened secret, all inside one transaction. Concurrent callers skip rows
//! held by in-flight leases instead of waiting on them, so two overlapping
//! leases never receive the same key.
//!
//! Leases are advisory: nothing is held after the transaction commits and
//! there is no release call. Fairness comes from ordering by `last_used_at`.

use std::sync::{Arc, LazyLock};

use chrono::{DateTime, FixedOffset, Utc};
use metrics::{counter, histogram};
use regex::Regex;
use sea_orm::sea_query::{Expr, LockBehavior, LockType, NullOrdering, Order};
use sea_orm::{
    ColumnTrait, Condition, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Select, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::config::LeasePolicyConfig;
use crate::crypto::{self, CryptoError, CryptoKey};
use crate::models::api_key::{Column, Entity as ApiKey};

pub mod ranking;

pub use ranking::{TierPredicate, TierRanking, TierRule};

static PROVIDER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9][a-z0-9_.-]{0,63}$").expect("provider pattern compiles")
});

/// Errors surfaced by pool and key administration operations.
///
/// An exhausted pool is not an error; see [`KeyLeasePool::lease`].
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("storage error: {0}")]
    Storage(#[from] DbErr),
    #[error("invalid provider identifier '{0}'")]
    InvalidProvider(String),
    #[error("invalid tier '{0}'")]
    InvalidTier(String),
    #[error("secret value must not be empty")]
    EmptySecret,
    #[error("a key with the same secret already exists")]
    DuplicateSecret,
    #[error("api key {0} not found")]
    KeyNotFound(Uuid),
    #[error("secret for api key {key_id} could not be opened: {source}")]
    Crypto {
        key_id: Uuid,
        #[source]
        source: CryptoError,
    },
}

/// Checks a provider identifier: lowercase alphanumerics plus `_ . -`, at most 64 chars.
pub fn validate_provider(provider: &str) -> Result<(), PoolError> {
    if PROVIDER_PATTERN.is_match(provider) {
        Ok(())
    } else {
        Err(PoolError::InvalidProvider(provider.to_string()))
    }
}

/// Re-express `at` at offset zero. Every stored timestamp uses UTC because
/// SQLite compares them as text.
pub fn at_utc(at: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
    at.with_timezone(&Utc).fixed_offset()
}

/// Tier names share the provider identifier alphabet.
pub fn validate_tier(tier: &str) -> Result<(), PoolError> {
    if PROVIDER_PATTERN.is_match(tier) {
        Ok(())
    } else {
        Err(PoolError::InvalidTier(tier.to_string()))
    }
}

/// How candidates are filtered and ordered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeasePolicy {
    /// Exclude keys whose rate limit has not lifted yet.
    pub skip_rate_limited: bool,
    pub ranking: TierRanking,
}

impl Default for LeasePolicy {
    fn default() -> Self {
        Self {
            skip_rate_limited: true,
            ranking: TierRanking::default(),
        }
    }
}

impl From<&LeasePolicyConfig> for LeasePolicy {
    fn from(config: &LeasePolicyConfig) -> Self {
        Self {
            skip_rate_limited: config.skip_rate_limited,
            ranking: TierRanking::from_order(&config.tier_order),
        }
    }
}

/// A successfully leased credential.
pub struct LeasedKey {
    /// Opaque handle for [`KeyLeasePool::report_outcome`].
    pub key_id: Uuid,
    pub provider: String,
    pub tier: String,
    pub secret: Zeroizing<String>,
}

impl std::fmt::Debug for LeasedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeasedKey")
            .field("key_id", &self.key_id)
            .field("provider", &self.provider)
            .field("tier", &self.tier)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// What a caller observed when using a leased key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOutcome {
    /// The provider throttled the key. `None` leaves it held back until cleared by hand.
    RateLimited {
        reset_at: Option<DateTime<FixedOffset>>,
    },
    /// The provider call failed for another reason.
    Failed,
}

impl KeyOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyOutcome::RateLimited { .. } => "rate_limited",
            KeyOutcome::Failed => "failed",
        }
    }
}

/// Read-only view of a lease candidate, in lease order.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CandidateSummary {
    pub key_id: Uuid,
    pub display_name: String,
    pub tier: String,
    pub tier_rank: i32,
    pub last_used_at: Option<DateTime<FixedOffset>>,
    pub usage_count: i64,
}

/// Leases keys from the shared `api_keys` table.
#[derive(Debug, Clone)]
pub struct KeyLeasePool {
    db: Arc<DatabaseConnection>,
    crypto_key: CryptoKey,
    policy: LeasePolicy,
}

impl KeyLeasePool {
    pub fn new(db: Arc<DatabaseConnection>, crypto_key: CryptoKey, policy: LeasePolicy) -> Self {
        Self {
            db,
            crypto_key,
            policy,
        }
    }

    pub fn policy(&self) -> &LeasePolicy {
        &self.policy
    }

    /// Lease the best available key for `provider`.
    ///
    /// Returns `Ok(None)` when no eligible key exists, including when every
    /// eligible row is currently locked by another lease.
    #[instrument(skip(self))]
    pub async fn lease(&self, provider: &str) -> Result<Option<LeasedKey>, PoolError> {
        validate_provider(provider)?;

        let started = Instant::now();
        let result = self.claim(provider).await;
        histogram!("key_pool_lease_duration_ms").record(started.elapsed().as_secs_f64() * 1_000.0);

        let outcome = match &result {
            Ok(Some(leased)) => {
                info!(key_id = %leased.key_id, tier = %leased.tier, "Leased api key");
                "leased"
            }
            Ok(None) => {
                warn!("No eligible api key available");
                "exhausted"
            }
            Err(err) => {
                warn!(error = %err, "Lease failed");
                "error"
            }
        };
        counter!(
            "key_pool_leases_total",
            "provider" => provider.to_string(),
            "outcome" => outcome
        )
        .increment(1);

        result
    }

    async fn claim(&self, provider: &str) -> Result<Option<LeasedKey>, PoolError> {
        let now = Utc::now().fixed_offset();
        let txn = self.db.begin().await?;

        let Some(candidate) = self
            .candidates(provider, now)
            .lock_with_behavior(LockType::Update, LockBehavior::SkipLocked)
            .one(&txn)
            .await?
        else {
            txn.rollback().await?;
            return Ok(None);
        };

        // Dropping `txn` on error rolls back, so a key that cannot be opened is never spent.
        let secret = crypto::open_secret(
            &self.crypto_key,
            candidate.id,
            &candidate.provider,
            &candidate.secret_ciphertext,
        )
        .map_err(|source| PoolError::Crypto {
            key_id: candidate.id,
            source,
        })?;

        let mut update = ApiKey::update_many()
            .col_expr(Column::UsageCount, Expr::col(Column::UsageCount).add(1))
            .col_expr(Column::LastUsedAt, Expr::val(now).into())
            .filter(Column::Id.eq(candidate.id));

        let reset_elapsed = candidate.is_rate_limited && !candidate.is_rate_limited_at(now);
        if reset_elapsed {
            update = update
                .col_expr(Column::IsRateLimited, Expr::val(false).into())
                .col_expr(
                    Column::RateLimitResetAt,
                    Expr::val(Option::<DateTime<FixedOffset>>::None).into(),
                );
        }

        update.exec(&txn).await?;
        txn.commit().await?;

        if reset_elapsed {
            debug!(key_id = %candidate.id, "Cleared expired rate limit on lease");
            counter!("key_pool_rate_limits_cleared_total", "source" => "lease").increment(1);
        }

        Ok(Some(LeasedKey {
            key_id: candidate.id,
            provider: candidate.provider,
            tier: candidate.tier,
            secret,
        }))
    }

    /// Record what happened when a leased key was used.
    ///
    /// Counters are incremented in SQL so concurrent reports never lose updates.
    #[instrument(skip(self), fields(outcome = outcome.as_str()))]
    pub async fn report_outcome(&self, key_id: Uuid, outcome: KeyOutcome) -> Result<(), PoolError> {
        let key = ApiKey::find_by_id(key_id)
            .one(self.db.as_ref())
            .await?
            .ok_or(PoolError::KeyNotFound(key_id))?;

        let update = ApiKey::update_many().filter(Column::Id.eq(key_id));
        let update = match outcome {
            KeyOutcome::RateLimited { reset_at } => update
                .col_expr(Column::IsRateLimited, Expr::val(true).into())
                .col_expr(
                    Column::RateLimitResetAt,
                    Expr::val(reset_at.map(at_utc)).into(),
                ),
            KeyOutcome::Failed => {
                update.col_expr(Column::ErrorCount, Expr::col(Column::ErrorCount).add(1))
            }
        };

        let result = update.exec(self.db.as_ref()).await?;
        if result.rows_affected == 0 {
            return Err(PoolError::KeyNotFound(key_id));
        }

        info!(
            key_id = %key_id,
            provider = %key.provider,
            "Recorded api key outcome"
        );
        counter!(
            "key_pool_outcomes_total",
            "provider" => key.provider,
            "outcome" => outcome.as_str()
        )
        .increment(1);

        Ok(())
    }

    /// Eligible candidates for `provider` in the order `lease` would pick them.
    pub async fn preview(&self, provider: &str) -> Result<Vec<CandidateSummary>, PoolError> {
        validate_provider(provider)?;

        let now = Utc::now().fixed_offset();
        let keys = self
            .candidates(provider, now)
            .all(self.db.as_ref())
            .await?;

        Ok(keys
            .into_iter()
            .map(|key| CandidateSummary {
                key_id: key.id,
                tier_rank: self.policy.ranking.rank_of(&key.tier),
                display_name: key.display_name,
                tier: key.tier,
                last_used_at: key.last_used_at,
                usage_count: key.usage_count,
            })
            .collect())
    }

    fn candidates(&self, provider: &str, now: DateTime<FixedOffset>) -> Select<ApiKey> {
        let mut query = ApiKey::find()
            .filter(Column::Provider.eq(provider))
            .filter(Column::IsActive.eq(true));

        if self.policy.skip_rate_limited {
            query = query.filter(
                Condition::any()
                    .add(Column::IsRateLimited.eq(false))
                    .add(Column::RateLimitResetAt.lte(now)),
            );
        }

        query
            .order_by(self.policy.ranking.order_expr(), Order::Asc)
            .order_by_with_nulls(Column::LastUsedAt, Order::Asc, NullOrdering::First)
            .order_by_asc(Column::Id)
    }
}
