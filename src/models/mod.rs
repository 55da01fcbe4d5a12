//! # Data Models
//!
//! This module contains all the data models used throughout the key pool service.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod api_key;
pub mod usage_log;

pub use api_key::Entity as ApiKey;
pub use usage_log::Entity as UsageLog;

/// Tier assigned to paid credentials.
pub const TIER_PRO: &str = "pro";

/// Tier assigned to credentials when none is given.
pub const TIER_FREE: &str = "free";

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "keypool".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
