//! API key issuance HTTP handler.
//!
//! `POST /api/v1/keys` rotates (or first-issues) the caller's API key.
//! The plaintext key appears in the response exactly once and is never
//! recoverable afterwards; only its hash is stored.

use axum::{Extension, Json, extract::State, http::StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{
    AppState,
    error::AppError,
    middleware::auth::AuthContext,
    models::credential::mask_key,
    services::credentials::IssueError,
};

/// Request body for `POST /api/v1/keys`.
#[derive(Debug, Default, Deserialize)]
pub struct GenerateKeyRequest {
    /// Replace the existing key. Without this, an existing key is a 409.
    #[serde(default)]
    pub regenerate: bool,
}

/// `POST /api/v1/keys`
///
/// # Response (201 on first issue, 200 on regeneration)
///
/// ```json
/// {
///   "success": true,
///   "message": "API key regenerated successfully",
///   "apiKey": "vl_live_...",
///   "maskedKey": "vl_live_************",
///   "clientId": "660e8400-...",
///   "createdAt": "2026-08-26T10:00:00Z"
/// }
/// ```
///
/// # Errors
///
/// - **409 Conflict**: an active key exists and `regenerate` was false
pub async fn generate_key(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<GenerateKeyRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let issued = state
        .credentials
        .issue(auth.account.id, request.regenerate)
        .await
        .map_err(|err| match err {
            IssueError::Conflict => AppError::KeyConflict,
            IssueError::AccountNotFound => AppError::AccountNotFound,
            IssueError::Database(e) => AppError::Database(e),
            IssueError::Hash(e) => AppError::Internal(e),
        })?;

    let status = if issued.regenerated {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    let message = if issued.regenerated {
        "API key regenerated successfully"
    } else {
        "API key generated successfully"
    };

    Ok((
        status,
        Json(json!({
            "success": true,
            "message": message,
            // The plaintext is returned exactly once.
            "apiKey": issued.plaintext,
            "maskedKey": mask_key(&issued.plaintext),
            "clientId": issued.credential_id,
            "createdAt": issued.created_at,
        })),
    ))
}
