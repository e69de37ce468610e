//! Usage listing HTTP handler.
//!
//! `GET /api/v1/usage` returns the caller's audit trail, newest first,
//! with endpoint/success/date filters and pagination.

use axum::{
    Extension, Json,
    extract::{Query, State},
};

use crate::{
    AppState,
    error::AppError,
    middleware::auth::AuthContext,
    models::usage::{Pagination, UsageFilter, UsageListResponse, UsageQuery},
};

/// `GET /api/v1/usage`
///
/// # Query Parameters
///
/// - `page` (default 1), `limit` (default 20, max 100)
/// - `endpoint`: `exact_verify`, `smart_verify`, or `all`
/// - `success`: `true`, `false`, or `all`
/// - `date_from` / `date_to`: RFC 3339 bounds
pub async fn list_usage(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<UsageQuery>,
) -> Result<Json<UsageListResponse>, AppError> {
    let filter = build_filter(&query)?;

    let (records, total_count) = state.usage.list(auth.credential_id, &filter).await?;

    let total_pages = if total_count == 0 {
        0
    } else {
        (total_count + filter.limit - 1) / filter.limit
    };

    Ok(Json(UsageListResponse {
        records,
        pagination: Pagination {
            page: query.page,
            limit: filter.limit,
            total_count,
            total_pages,
        },
    }))
}

/// Validate the raw query and turn it into a store filter.
fn build_filter(query: &UsageQuery) -> Result<UsageFilter, AppError> {
    if query.page < 1 {
        return Err(AppError::InvalidRequest("page must be >= 1".to_string()));
    }
    if !(1..=100).contains(&query.limit) {
        return Err(AppError::InvalidRequest(
            "limit must be between 1 and 100".to_string(),
        ));
    }

    let endpoint = match query.endpoint.as_str() {
        "all" => None,
        "exact_verify" | "smart_verify" => Some(query.endpoint.clone()),
        other => {
            return Err(AppError::InvalidRequest(format!(
                "unknown endpoint filter: {other}"
            )));
        }
    };

    let success = match query.success.as_str() {
        "all" => None,
        "true" => Some(true),
        "false" => Some(false),
        other => {
            return Err(AppError::InvalidRequest(format!(
                "success filter must be true, false, or all, got: {other}"
            )));
        }
    };

    Ok(UsageFilter {
        endpoint,
        success,
        date_from: query.date_from,
        date_to: query.date_to,
        offset: (query.page - 1) * query.limit,
        limit: query.limit,
    })
}
