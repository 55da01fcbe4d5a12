//! UsageLog entity model
//!
//! Append-only audit record of one provider call made with a leased key.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "usage_logs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// End user on whose behalf the call was made, when known
    pub user_id: Option<Uuid>,

    pub provider: String,

    pub model: Option<String>,

    /// Provider endpoint, e.g. `generateContent` or `chat/completions`
    pub endpoint: Option<String>,

    /// HTTP status returned by the provider
    pub status_code: i32,

    pub duration_ms: i32,

    /// Truncated serialized prompt
    pub prompt_preview: Option<String>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
