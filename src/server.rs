//! # Server Configuration
//!
//! Router assembly, shared state, OpenAPI document and the serve loop for the key pool API.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Router, middleware,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::auth_middleware;
use crate::config::AppConfig;
use crate::crypto::CryptoKey;
use crate::handlers;
use crate::pool::{KeyLeasePool, LeasePolicy};
use crate::telemetry::trace_context_middleware;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Arc<DatabaseConnection>,
    pub crypto_key: CryptoKey,
    pub pool: KeyLeasePool,
}

impl AppState {
    /// Builds state from validated configuration. Fails when no crypto key is configured.
    pub fn new(config: Arc<AppConfig>, db: Arc<DatabaseConnection>) -> Result<Self> {
        let key_bytes = config
            .crypto_key
            .clone()
            .context("crypto key not present in configuration")?;
        let crypto_key = CryptoKey::new(key_bytes).context("initializing crypto key")?;
        let pool = KeyLeasePool::new(
            Arc::clone(&db),
            crypto_key.clone(),
            LeasePolicy::from(&config.lease),
        );

        Ok(Self {
            config,
            db,
            crypto_key,
            pool,
        })
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let protected = Router::new()
        .route("/leases", post(handlers::leases::create_lease))
        .route("/pool/{provider}/preview", get(handlers::leases::preview_pool))
        .route(
            "/keys",
            post(handlers::keys::create_key).get(handlers::keys::list_keys),
        )
        .route("/keys/stats", get(handlers::keys::key_stats))
        .route(
            "/keys/{id}",
            get(handlers::keys::get_key).patch(handlers::keys::update_key),
        )
        .route("/keys/{id}/outcome", post(handlers::leases::report_outcome))
        .route(
            "/keys/{id}/clear-rate-limit",
            post(handlers::keys::clear_rate_limit),
        )
        .route(
            "/usage-logs",
            post(handlers::usage::record_usage).get(handlers::usage::list_usage),
        )
        .route("/usage-logs/summary", get(handlers::usage::usage_summary))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state.config),
            auth_middleware,
        ));

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .merge(protected)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(middleware::from_fn(trace_context_middleware))
        .layer(TraceLayer::new_for_http())
}

/// Serves the API until `shutdown` is cancelled, then drains in-flight requests.
pub async fn run_server(
    config: Arc<AppConfig>,
    db: Arc<DatabaseConnection>,
    shutdown: CancellationToken,
) -> Result<()> {
    let state = AppState::new(Arc::clone(&config), db)?;
    let app = create_app(state);

    let addr = config
        .bind_addr()
        .with_context(|| format!("invalid API_BIND_ADDR '{}'", config.api_bind_addr))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!(%addr, profile = %config.profile, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .context("serving HTTP")?;

    info!("Server stopped");
    Ok(())
}

/// Resolves on Ctrl+C or, on unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(err) => {
                warn!(error = %err, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                info!("Received SIGTERM, shutting down");
            }
            Err(err) => {
                warn!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .description(Some("Operator token"))
                    .build(),
            ),
        );
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::leases::create_lease,
        crate::handlers::leases::report_outcome,
        crate::handlers::leases::preview_pool,
        crate::handlers::keys::create_key,
        crate::handlers::keys::list_keys,
        crate::handlers::keys::get_key,
        crate::handlers::keys::update_key,
        crate::handlers::keys::clear_rate_limit,
        crate::handlers::keys::key_stats,
        crate::handlers::usage::record_usage,
        crate::handlers::usage::list_usage,
        crate::handlers::usage::usage_summary,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::handlers::HealthStatus,
            crate::error::ApiError,
            crate::handlers::leases::LeaseRequest,
            crate::handlers::leases::LeaseResponse,
            crate::handlers::leases::OutcomeKind,
            crate::handlers::leases::OutcomeRequest,
            crate::handlers::leases::PreviewResponse,
            crate::pool::CandidateSummary,
            crate::handlers::keys::ListKeysQuery,
            crate::handlers::keys::KeysResponse,
            crate::handlers::keys::UpdateKeyRequest,
            crate::handlers::keys::KeyStatsResponse,
            crate::repositories::NewApiKey,
            crate::repositories::ApiKeySummary,
            crate::repositories::ProviderKeyStats,
            crate::handlers::usage::ListUsageQuery,
            crate::handlers::usage::UsageSummaryQuery,
            crate::handlers::usage::UsageLogsResponse,
            crate::handlers::usage::UsageSummaryResponse,
            crate::repositories::NewUsageLog,
            crate::repositories::UsageLogEntry,
            crate::repositories::ProviderUsageSummary,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "root", description = "Service info and health"),
        (name = "leases", description = "Lease keys and report outcomes"),
        (name = "keys", description = "Key administration"),
        (name = "usage", description = "Provider call audit log"),
    ),
    info(
        title = "Key Pool API",
        description = "Shared provider API key lease pool",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
