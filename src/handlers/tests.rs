//! # Tests for Handlers

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::Json};
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection};
use utoipa::OpenApi;

use crate::config::AppConfig;
use crate::handlers::{healthz, root};
use crate::server::{ApiDoc, AppState};

fn test_config() -> Arc<AppConfig> {
    Arc::new(AppConfig {
        operator_tokens: vec!["test-token".to_string()],
        crypto_key: Some(vec![7u8; 32]),
        ..Default::default()
    })
}

async fn sqlite_state() -> AppState {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    Migrator::up(&db, None).await.unwrap();
    AppState::new(test_config(), Arc::new(db)).unwrap()
}

#[tokio::test]
async fn root_returns_service_info() {
    let Json(info) = root().await;
    assert_eq!(info.service, "keypool");
    assert_eq!(info.version, env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn healthz_reports_ok_with_live_database() {
    let state = sqlite_state().await;
    let Json(health) = healthz(State(state)).await.unwrap();
    assert_eq!(health.status, "ok");
    assert_eq!(health.database, "ok");
}

#[tokio::test]
async fn healthz_returns_503_when_database_is_unreachable() {
    let state = AppState::new(test_config(), Arc::new(DatabaseConnection::default())).unwrap();
    let err = healthz(State(state)).await.unwrap_err();
    assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(&*err.code, "SERVICE_UNAVAILABLE");
}

#[test]
fn app_state_requires_crypto_key() {
    let config = Arc::new(AppConfig::default());
    assert!(AppState::new(config, Arc::new(DatabaseConnection::default())).is_err());
}

#[test]
fn openapi_documents_every_route_and_bearer_scheme() {
    let doc = serde_json::to_value(ApiDoc::openapi()).unwrap();
    let paths = doc["paths"].as_object().unwrap();

    for path in [
        "/",
        "/healthz",
        "/leases",
        "/keys",
        "/keys/stats",
        "/keys/{id}",
        "/keys/{id}/outcome",
        "/keys/{id}/clear-rate-limit",
        "/pool/{provider}/preview",
        "/usage-logs",
        "/usage-logs/summary",
    ] {
        assert!(paths.contains_key(path), "missing {path}");
    }

    assert_eq!(
        doc["components"]["securitySchemes"]["bearer_auth"]["scheme"],
        "bearer"
    );
    // Secrets only ever leave the service through a lease.
    let summary = &doc["components"]["schemas"]["ApiKeySummary"]["properties"];
    assert!(summary.get("masked_secret").is_some());
    assert!(summary.get("secret").is_none());
}
