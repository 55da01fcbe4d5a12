//! ApiKey entity model
//!
//! This module contains the SeaORM entity model for the api_keys table,
//! which holds the shared pool of leasable provider credentials.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

/// ApiKey entity representing one physical provider credential
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "api_keys")]
pub struct Model {
    /// Unique identifier for the key (primary key, never reused)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// External service this key authenticates to (e.g. gemini, openai)
    pub provider: String,

    /// Sealed secret material; see [`crate::crypto::open_secret`]
    pub secret_ciphertext: Vec<u8>,

    /// Hex SHA-256 of the plaintext secret, unique across the table
    pub secret_fingerprint: String,

    /// Human-friendly label shown in the admin surface
    pub display_name: String,

    /// Administratively disabled keys are never leased
    pub is_active: bool,

    /// Number of successful leases
    pub usage_count: i64,

    /// Time of the last successful lease; `None` means never used
    pub last_used_at: Option<DateTimeWithTimeZone>,

    /// Set by callers after a provider rejection
    pub is_rate_limited: bool,

    /// When the provider rate limit is expected to lift
    pub rate_limit_reset_at: Option<DateTimeWithTimeZone>,

    /// Priority class (e.g. pro, free)
    pub tier: String,

    /// Number of failed provider calls reported for this key
    pub error_count: i32,

    /// Timestamp when the key was created
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp when the key was last updated
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Whether the key is currently held back by a provider rate limit.
    pub fn is_rate_limited_at(&self, now: DateTimeWithTimeZone) -> bool {
        self.is_rate_limited
            && self
                .rate_limit_reset_at
                .is_none_or(|reset_at| reset_at > now)
    }
}
