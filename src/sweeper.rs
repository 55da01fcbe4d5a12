//! # Rate Limit Sweeper
//!
//! Background task that returns rate-limited keys to service once their
//! `rate_limit_reset_at` has passed. Keys flagged without a reset time stay
//! held back until an operator clears them. Leases clear expired flags on
//! their own; the sweeper keeps stats and previews accurate between leases.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use metrics::{counter, histogram};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter};
use tokio::time::{Duration, Instant, interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::config::SweeperConfig;
use crate::models::api_key::{Column, Entity as ApiKey};

pub struct RateLimitSweeper {
    config: SweeperConfig,
    db: Arc<DatabaseConnection>,
}

impl RateLimitSweeper {
    pub fn new(config: SweeperConfig, db: Arc<DatabaseConnection>) -> Self {
        Self { config, db }
    }

    /// Run the sweep loop until the provided shutdown token fires.
    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) {
        if !self.config.enabled {
            info!("Rate limit sweeper disabled");
            return;
        }

        info!(
            tick_interval_seconds = self.config.tick_interval_seconds,
            "Starting rate limit sweeper"
        );
        let mut ticker = interval(Duration::from_secs(self.config.tick_interval_seconds));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Rate limit sweeper shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    let started = Instant::now();
                    if let Err(err) = self.sweep_once(Utc::now().fixed_offset()).await {
                        error!(error = ?err, "Rate limit sweep failed");
                    }
                    histogram!("key_pool_sweep_duration_ms")
                        .record(started.elapsed().as_secs_f64() * 1_000.0);
                }
            }
        }

        info!("Rate limit sweeper stopped");
    }

    /// Clear every rate limit whose reset time is at or before `now`. Returns rows cleared.
    pub async fn sweep_once(&self, now: DateTime<FixedOffset>) -> Result<u64, DbErr> {
        let result = ApiKey::update_many()
            .col_expr(Column::IsRateLimited, Expr::val(false).into())
            .col_expr(
                Column::RateLimitResetAt,
                Expr::val(Option::<DateTime<FixedOffset>>::None).into(),
            )
            .filter(Column::IsRateLimited.eq(true))
            .filter(Column::RateLimitResetAt.lte(now))
            .exec(self.db.as_ref())
            .await?;

        if result.rows_affected > 0 {
            info!(cleared = result.rows_affected, "Returned rate-limited keys to service");
            counter!("key_pool_rate_limits_cleared_total", "source" => "sweeper")
                .increment(result.rows_affected);
        } else {
            debug!("No expired rate limits");
        }

        Ok(result.rows_affected)
    }
}
