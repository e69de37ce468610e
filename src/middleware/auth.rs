//! API key authentication middleware.
//!
//! Protects the ancillary routes (account, keys, usage). The verification
//! endpoints do their own authentication inside the admission pipeline so
//! that failed attempts still land in the usage log; everything else goes
//! through this middleware.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::{
    AppState, error::AppError, models::account::Account, services::credentials::AuthError,
};

/// Authentication context attached to authenticated requests.
///
/// This struct is inserted into the request's extension map and can be
/// extracted by route handlers to know who made the request.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// ID of the credential that authenticated this request
    pub credential_id: Uuid,

    /// The account the credential belongs to, as loaded at auth time
    pub account: Account,
}

/// API key authentication middleware function.
///
/// # Flow
///
/// 1. Extract the `X-API-Key` header from the request
/// 2. Resolve it through the credential store (prefix gate, hash verify)
/// 3. If valid: inject [`AuthContext`] into the request, call next handler
/// 4. If not: return 401 Unauthorized with the rejection reason
///
/// # Headers
///
/// Expected header format:
/// ```text
/// X-API-Key: vl_live_abc123...
/// ```
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let api_key = request
        .headers()
        .get("X-API-Key")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            AppError::Unauthorized("Missing API key. Include X-API-Key header.".to_string())
        })?;

    let client = state
        .credentials
        .authenticate(api_key)
        .await
        .map_err(|err| match err {
            AuthError::Store(detail) => AppError::Internal(detail),
            other => AppError::Unauthorized(other.to_string()),
        })?;

    let auth_context = AuthContext {
        credential_id: client.credential_id,
        account: client.account,
    };

    // Route handlers can now extract this using Extension<AuthContext>
    request.extensions_mut().insert(auth_context);

    Ok(next.run(request).await)
}
