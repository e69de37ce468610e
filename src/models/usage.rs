//! Usage log models and the usage listing API types.
//!
//! One `UsageRecord` is written for every inbound verification request,
//! whatever the outcome. Writing the record must never fail the request it
//! describes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Represents one API attempt from the `api_usage_logs` table.
///
/// `credential_id` is nullable: authentication failures are logged too,
/// before any credential has been resolved.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct UsageRecord {
    /// Unique identifier for this log row
    pub id: Uuid,

    /// Credential that made the attempt, when known
    pub credential_id: Option<Uuid>,

    /// Endpoint name ("exact_verify" or "smart_verify")
    pub endpoint: String,

    /// Per-request correlation identifier, unique per attempt
    pub request_id: Uuid,

    /// Credits actually charged (0 for failures and cache hits)
    pub credits_used: i64,

    /// Whether the attempt produced a result (cache hits count)
    pub was_successful: bool,

    /// Whether the result was served from the cache
    pub was_duplicate: bool,

    /// Wall-clock latency of the attempt in milliseconds
    pub response_time_ms: i64,

    /// Caller IP address as observed at the edge
    pub ip_address: Option<String>,

    /// Caller User-Agent header
    pub user_agent: Option<String>,

    /// Reason for failure, when the attempt failed
    pub error_message: Option<String>,

    /// When the attempt happened
    pub created_at: DateTime<Utc>,
}

/// A usage record as it is about to be written.
///
/// The pipeline builds one of these on every exit path; the store assigns
/// `id` and `created_at`.
#[derive(Debug, Clone)]
pub struct UsageEntry {
    pub credential_id: Option<Uuid>,
    pub endpoint: String,
    pub request_id: Uuid,
    pub credits_used: i64,
    pub was_successful: bool,
    pub was_duplicate: bool,
    pub response_time_ms: i64,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub error_message: Option<String>,
}

/// Query parameters for `GET /api/v1/usage`.
///
/// # Validation
///
/// - `page`: 1-based, defaults to 1
/// - `limit`: 1..=100, defaults to 20
/// - `endpoint`: "exact_verify", "smart_verify", or "all" (default)
/// - `success`: "true", "false", or "all" (default)
/// - `date_from` / `date_to`: optional RFC 3339 bounds on `created_at`
#[derive(Debug, Deserialize)]
pub struct UsageQuery {
    #[serde(default = "default_page")]
    pub page: i64,

    #[serde(default = "default_limit")]
    pub limit: i64,

    #[serde(default = "default_all")]
    pub endpoint: String,

    #[serde(default = "default_all")]
    pub success: String,

    pub date_from: Option<DateTime<Utc>>,

    pub date_to: Option<DateTime<Utc>>,
}

fn default_page() -> i64 {
    1
}

fn default_limit() -> i64 {
    20
}

fn default_all() -> String {
    "all".to_string()
}

/// Filter derived from a validated [`UsageQuery`].
#[derive(Debug, Clone)]
pub struct UsageFilter {
    pub endpoint: Option<String>,
    pub success: Option<bool>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub offset: i64,
    pub limit: i64,
}

/// Pagination envelope for the usage listing response.
#[derive(Debug, Serialize)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total_count: i64,
    pub total_pages: i64,
}

/// Response body for `GET /api/v1/usage`.
#[derive(Debug, Serialize)]
pub struct UsageListResponse {
    pub records: Vec<UsageRecord>,
    pub pagination: Pagination,
}
