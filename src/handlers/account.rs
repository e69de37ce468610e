//! Account info HTTP handler.
//!
//! `GET /api/v1/account` returns the caller's profile, live credit
//! balance, credential metadata (masked), and 30-day usage aggregates.

use axum::{Extension, Json, extract::State};
use chrono::{Duration, Utc};

use crate::{
    AppState,
    error::AppError,
    middleware::auth::AuthContext,
    models::account::{AccountSummary, CredentialSummary},
    models::credential::mask_key,
};

/// `GET /api/v1/account`
///
/// # Response (200)
///
/// ```json
/// {
///   "id": "550e8400-...",
///   "email": "ops@lawfirm.example",
///   "credits": 4200,
///   "is_active": true,
///   "api_key": {
///     "id": "660e8400-...",
///     "masked_key": "vl_live_************",
///     "is_active": true,
///     "last_used_at": "2026-08-26T10:00:00Z"
///   },
///   "usage_last_30_days": {
///     "total_requests": 12,
///     "successful_requests": 10,
///     "duplicate_requests": 3,
///     "credits_used": 700
///   }
/// }
/// ```
pub async fn get_account(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<AccountSummary>, AppError> {
    let credential = state
        .credentials
        .get_credential(auth.credential_id)
        .await?
        .map(|c| CredentialSummary {
            id: c.id,
            masked_key: mask_key(&c.key_prefix),
            is_active: c.is_active,
            last_used_at: c.last_used_at,
            created_at: c.created_at,
        });

    let since = Utc::now() - Duration::days(30);
    let usage = state.usage.stats_since(auth.credential_id, since).await?;

    Ok(Json(AccountSummary {
        id: auth.account.id,
        email: auth.account.email,
        credits: auth.account.credits,
        is_active: auth.account.is_active,
        created_at: auth.account.created_at,
        api_key: credential,
        usage_last_30_days: usage,
    }))
}
