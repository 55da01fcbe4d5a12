//! Test utilities for database testing.
//!
//! In-memory SQLite databases with migrations applied, plus fixtures for
//! seeding `api_keys` rows in arbitrary states.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, FixedOffset, Utc};
use keypool::crypto::{self, CryptoKey};
use keypool::models::api_key;
use keypool::pool::{KeyLeasePool, LeasePolicy};
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection, EntityTrait, Set};
use uuid::Uuid;

/// Sets up an in-memory SQLite database with all migrations applied.
#[allow(dead_code)]
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

/// Same as [`setup_test_db`], wrapped in an `Arc` for repositories and the pool.
#[allow(dead_code)]
pub async fn setup_test_db_arc() -> Result<Arc<DatabaseConnection>> {
    Ok(Arc::new(setup_test_db().await?))
}

#[allow(dead_code)]
pub fn test_crypto_key() -> CryptoKey {
    CryptoKey::new(vec![42u8; 32]).expect("32 byte key")
}

#[allow(dead_code)]
pub fn test_pool(db: &Arc<DatabaseConnection>) -> KeyLeasePool {
    KeyLeasePool::new(Arc::clone(db), test_crypto_key(), LeasePolicy::default())
}

#[allow(dead_code)]
pub fn hours_ago(hours: i64) -> DateTime<FixedOffset> {
    (Utc::now() - Duration::hours(hours)).fixed_offset()
}

#[allow(dead_code)]
pub fn hours_from_now(hours: i64) -> DateTime<FixedOffset> {
    (Utc::now() + Duration::hours(hours)).fixed_offset()
}

/// Describes one `api_keys` row to seed.
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct KeyFixture {
    pub provider: String,
    pub secret: String,
    pub tier: String,
    pub is_active: bool,
    pub usage_count: i64,
    pub last_used_at: Option<DateTime<FixedOffset>>,
    pub is_rate_limited: bool,
    pub rate_limit_reset_at: Option<DateTime<FixedOffset>>,
    pub error_count: i32,
}

#[allow(dead_code)]
impl KeyFixture {
    pub fn new(provider: &str, secret: &str) -> Self {
        Self {
            provider: provider.to_string(),
            secret: secret.to_string(),
            tier: "free".to_string(),
            is_active: true,
            usage_count: 0,
            last_used_at: None,
            is_rate_limited: false,
            rate_limit_reset_at: None,
            error_count: 0,
        }
    }

    pub fn tier(mut self, tier: &str) -> Self {
        self.tier = tier.to_string();
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    pub fn last_used(mut self, at: DateTime<FixedOffset>) -> Self {
        self.last_used_at = Some(at);
        self
    }

    pub fn usage_count(mut self, count: i64) -> Self {
        self.usage_count = count;
        self
    }

    pub fn rate_limited(mut self, reset_at: Option<DateTime<FixedOffset>>) -> Self {
        self.is_rate_limited = true;
        self.rate_limit_reset_at = reset_at;
        self
    }
}

/// Inserts a sealed key row and returns its id.
#[allow(dead_code)]
pub async fn insert_key(db: &DatabaseConnection, fixture: KeyFixture) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let key = test_crypto_key();
    let sealed = crypto::seal_secret(&key, id, &fixture.provider, &fixture.secret)?;
    let now = Utc::now().fixed_offset();

    let active = api_key::ActiveModel {
        id: Set(id),
        provider: Set(fixture.provider.clone()),
        secret_ciphertext: Set(sealed),
        secret_fingerprint: Set(crypto::fingerprint(&fixture.secret)),
        display_name: Set(format!("{} fixture", fixture.provider)),
        is_active: Set(fixture.is_active),
        usage_count: Set(fixture.usage_count),
        last_used_at: Set(fixture.last_used_at),
        is_rate_limited: Set(fixture.is_rate_limited),
        rate_limit_reset_at: Set(fixture.rate_limit_reset_at),
        tier: Set(fixture.tier),
        error_count: Set(fixture.error_count),
        created_at: Set(now),
        updated_at: Set(now),
    };

    api_key::Entity::insert(active)
        .exec_without_returning(db)
        .await?;
    Ok(id)
}

/// Inserts a row whose secret predates sealing (stored as raw bytes).
#[allow(dead_code)]
pub async fn insert_plaintext_key(
    db: &DatabaseConnection,
    provider: &str,
    secret: &str,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let now = Utc::now().fixed_offset();
    let active = api_key::ActiveModel {
        id: Set(id),
        provider: Set(provider.to_string()),
        secret_ciphertext: Set(secret.as_bytes().to_vec()),
        secret_fingerprint: Set(crypto::fingerprint(secret)),
        display_name: Set(format!("{} legacy", provider)),
        is_active: Set(true),
        usage_count: Set(0),
        last_used_at: Set(None),
        is_rate_limited: Set(false),
        rate_limit_reset_at: Set(None),
        tier: Set("free".to_string()),
        error_count: Set(0),
        created_at: Set(now),
        updated_at: Set(now),
    };

    api_key::Entity::insert(active)
        .exec_without_returning(db)
        .await?;
    Ok(id)
}

/// Loads a key row, failing the test if it is missing.
#[allow(dead_code)]
pub async fn load_key(db: &DatabaseConnection, id: Uuid) -> Result<api_key::Model> {
    api_key::Entity::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(|| anyhow::anyhow!("api key {} missing", id))
}
