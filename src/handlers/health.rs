//! Health check endpoint for service monitoring.

use axum::{Json, extract::State};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{AppState, error::AppError};

/// Health check response.
///
/// Returns service status, database connectivity, and cooldown store
/// connectivity.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall service status
    pub status: String,

    /// Database connection status
    pub database: String,

    /// Cooldown store (Redis) connection status
    pub cooldown_store: String,

    /// Current server timestamp
    pub timestamp: DateTime<Utc>,
}

/// Health check handler.
///
/// # Checks
///
/// - Database connectivity (executes simple query) — failure is a 500,
///   since nothing works without it
/// - Redis connectivity — failure degrades the status but not the response,
///   mirroring the cooldown tracker's fail-open behavior
///
/// # Response (200 OK)
///
/// ```json
/// {
///   "status": "healthy",
///   "database": "connected",
///   "cooldown_store": "connected",
///   "timestamp": "2026-08-26T19:00:00Z"
/// }
/// ```
pub async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    // Verify database connectivity with simple query
    sqlx::query("SELECT 1").execute(&state.pool).await?;

    let cooldown_store = match ping_redis(&state.redis).await {
        Ok(()) => "connected",
        Err(err) => {
            tracing::warn!(error = %err, "redis unreachable in health check");
            "unreachable"
        }
    };

    let status = if cooldown_store == "connected" {
        "healthy"
    } else {
        "degraded"
    };

    Ok(Json(HealthResponse {
        status: status.to_string(),
        database: "connected".to_string(),
        cooldown_store: cooldown_store.to_string(),
        timestamp: Utc::now(),
    }))
}

async fn ping_redis(client: &redis::Client) -> Result<(), redis::RedisError> {
    let mut conn = client.get_multiplexed_async_connection().await?;
    redis::cmd("PING").query_async::<()>(&mut conn).await
}
