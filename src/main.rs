//! VerifyLens API - Main Application Entry Point
//!
//! This is a credit-metered REST API for user-verification lookups. Every
//! billed call runs through an admission pipeline: authenticate, validate,
//! rate-limit, consult the result cache, check the balance, perform the
//! verification, then settle (debit credits, cache the result, commit the
//! cooldown) and audit the attempt.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum (async HTTP server)
//! - **Database**: PostgreSQL with sqlx (accounts, credentials, ledger, cache, usage log)
//! - **Cooldown store**: Redis (per-account, per-endpoint TTL gate)
//! - **Authentication**: X-API-Key bearer keys, Argon2id hashed
//! - **Format**: JSON requests/responses
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment variables
//! 2. Create database connection pool and run migrations
//! 3. Connect the Redis client for the cooldown store
//! 4. Assemble the admission pipeline from its injected components
//! 5. Build HTTP router with routes and middleware, start serving

mod config;
mod db;
mod error;
mod handlers;
mod middleware;
mod models;
mod services;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::db::DbPool;
use crate::services::cache::{PgResultCache, ResultCache};
use crate::services::cooldown::RedisCooldownTracker;
use crate::services::credentials::{CredentialStore, PgCredentialStore};
use crate::services::ledger::PgCreditLedger;
use crate::services::pipeline::{EndpointPolicy, Pipeline, PipelineConfig};
use crate::services::usage::{PgUsageLog, UsageLog};
use crate::services::verifier::MockVerifier;

/// Shared application state handed to every handler.
///
/// The pipeline owns its collaborators as trait objects; the handful of
/// handles here are the ones the ancillary handlers need directly.
#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub redis: redis::Client,
    pub credentials: Arc<dyn CredentialStore>,
    pub usage: Arc<dyn UsageLog>,
    pub pipeline: Arc<Pipeline>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging with tracing subscriber. Reads RUST_LOG environment variable (defaults to "info" level)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Load configuration
    let config = config::Config::from_env()?;
    tracing::info!("Configuration loaded");

    // Create database pool
    let pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Database pool created");

    // Run migrations
    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    // Redis client for the cooldown store. Connections are established
    // lazily per call; the tracker fails open if the store is down.
    let redis_client = redis::Client::open(config.redis_url.as_str())?;

    // Assemble the pipeline from its injected components
    let credentials: Arc<dyn CredentialStore> = Arc::new(PgCredentialStore::new(pool.clone()));
    let cache = Arc::new(PgResultCache::new(pool.clone()));
    let usage: Arc<dyn UsageLog> = Arc::new(PgUsageLog::new(pool.clone()));

    let pipeline = Arc::new(Pipeline::new(
        credentials.clone(),
        Arc::new(RedisCooldownTracker::new(redis_client.clone())),
        cache.clone(),
        Arc::new(PgCreditLedger::new(pool.clone())),
        usage.clone(),
        Arc::new(MockVerifier),
        PipelineConfig {
            exact: EndpointPolicy {
                credit_cost: config.exact_credit_cost,
                cooldown_seconds: config.exact_cooldown_seconds,
            },
            smart: EndpointPolicy {
                credit_cost: config.smart_credit_cost,
                cooldown_seconds: config.smart_cooldown_seconds,
            },
            cache_ttl_days: config.cache_ttl_days,
            verify_timeout: Duration::from_secs(config.verify_timeout_seconds),
        },
    ));

    let state = AppState {
        pool: pool.clone(),
        redis: redis_client,
        credentials,
        usage,
        pipeline,
    };

    // Periodically evict expired cache rows
    spawn_cache_sweeper(cache);

    // Ancillary routes authenticate through the middleware; the verify
    // routes authenticate inside the pipeline so failed attempts are
    // still written to the usage log.
    let authenticated_routes = Router::new()
        .route("/api/v1/account", get(handlers::account::get_account))
        .route("/api/v1/keys", post(handlers::keys::generate_key))
        .route("/api/v1/usage", get(handlers::usage::list_usage))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ));

    let app = Router::new()
        // Public routes (no authentication required)
        .route("/health", get(handlers::health::health_check))
        // Billed verification endpoints
        .route("/api/v1/verify/exact", post(handlers::verify::verify_exact))
        .route("/api/v1/verify/smart", post(handlers::verify::verify_smart))
        // Merge authenticated ancillary routes
        .merge(authenticated_routes)
        // Add distributed tracing middleware for observability
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Bind to network address and start server
    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Start serving HTTP requests
    // This blocks forever, handling requests concurrently with tokio
    axum::serve(listener, app).await?;

    Ok(())
}

/// Hourly sweep of expired verification cache rows.
fn spawn_cache_sweeper(cache: Arc<PgResultCache>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60 * 60));
        loop {
            interval.tick().await;
            match cache.sweep_expired().await {
                Ok(0) => {}
                Ok(deleted) => tracing::info!(deleted, "swept expired cache entries"),
                Err(err) => tracing::warn!(error = %err, "cache sweep failed"),
            }
        }
    });
}
