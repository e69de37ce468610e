//! Error types and HTTP error response handling.
//!
//! This module defines the application error taxonomy and how each error is
//! converted into an HTTP response with the appropriate status code and JSON
//! body. The verification pipeline shapes its own denial responses (it must
//! attach per-request correlation headers); `AppError` covers the ancillary
//! endpoints (account, keys, usage, health) and store-level propagation.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Application-wide error type.
///
/// # Error Categories
///
/// - **Database Errors**: Any sqlx::Error from database operations
/// - **Authentication Errors**: Missing, malformed, or invalid API keys
/// - **Resource Errors**: Requested resources not found
/// - **Conflict Errors**: Issuing a key when an active one already exists
/// - **Validation Errors**: Invalid request data
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Database operation failed (e.g., connection error, query error).
    ///
    /// This wraps any sqlx::Error using the `#[from]` attribute, which
    /// automatically implements `From<sqlx::Error> for AppError`.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// API key is missing, malformed, invalid, or inactive.
    ///
    /// Returns HTTP 401 Unauthorized. The String carries the reason shown
    /// to the caller (e.g. "Invalid API key format").
    #[error("{0}")]
    Unauthorized(String),

    /// Requested account does not exist.
    ///
    /// Returns HTTP 404 Not Found.
    #[error("Account not found")]
    AccountNotFound,

    /// An active API key already exists and regeneration was not requested.
    ///
    /// Returns HTTP 409 Conflict.
    #[error("API key already exists")]
    KeyConflict,

    /// Request body or parameters are invalid.
    ///
    /// Returns HTTP 400 Bad Request.
    /// The String contains details about what was invalid.
    #[error("Invalid request")]
    InvalidRequest(String),

    /// Unexpected internal failure that is not a database error.
    ///
    /// Returns HTTP 500 with a generic message; the detail goes to logs only.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convert AppError into an HTTP response.
///
/// All errors return a flat JSON body:
/// ```json
/// { "error": "stable-error-string", "message": "Human-readable message" }
/// ```
///
/// # Status Code Mapping
///
/// - `Unauthorized` → 401 Unauthorized
/// - `AccountNotFound` → 404 Not Found
/// - `KeyConflict` → 409 Conflict
/// - `InvalidRequest` → 400 Bad Request
/// - `Database` / `Internal` → 500 Internal Server Error (hides details from client)
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Map each error variant to (HTTP status, error code, message)
        let (status, code, message) = match self {
            AppError::Unauthorized(ref msg) => (
                StatusCode::UNAUTHORIZED,
                "Authentication failed",
                msg.clone(),
            ),
            AppError::AccountNotFound => (
                StatusCode::NOT_FOUND,
                "Not found",
                self.to_string(),
            ),
            AppError::KeyConflict => (
                StatusCode::CONFLICT,
                "API key already exists",
                "Set regenerate: true to create a new key".to_string(),
            ),
            AppError::InvalidRequest(ref msg) => {
                (StatusCode::BAD_REQUEST, "Invalid request", msg.clone())
            }
            AppError::Database(ref err) => {
                tracing::error!(error = %err, "database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error",
                    "An internal error occurred".to_string(),
                )
            }
            AppError::Internal(ref msg) => {
                tracing::error!(error = %msg, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error",
                    "An internal error occurred".to_string(),
                )
            }
        };

        // Build JSON response body
        let body = Json(json!({
            "error": code,
            "message": message
        }));

        // Return the response with status code and JSON body
        (status, body).into_response()
    }
}
