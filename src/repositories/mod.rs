//! # Repository Layer
//!
//! Repository implementations that encapsulate SeaORM operations for the
//! administrative key surface and the usage log sink.

use sea_orm::sea_query::{Alias, ConditionExpression, Expr, Func, IntoCondition, SimpleExpr};

pub mod api_key;
pub mod usage_log;

pub use api_key::{ApiKeyRepository, ApiKeySummary, NewApiKey, ProviderKeyStats};
pub use usage_log::{NewUsageLog, ProviderUsageSummary, UsageLogEntry, UsageLogRepository};

/// `SUM(expr)` cast to `BIGINT`; Postgres widens sums of `BIGINT` to `NUMERIC`.
fn sum_bigint(expr: impl Into<SimpleExpr>) -> SimpleExpr {
    Func::cast_as(Func::sum(expr), Alias::new("BIGINT")).into()
}

/// Number of rows in the group matching `condition`.
fn count_where(condition: impl Into<ConditionExpression> + IntoCondition) -> SimpleExpr {
    sum_bigint(Expr::case(condition, 1).finally(0))
}
