//! Account data models and API response types.
//!
//! This module defines:
//! - `Account`: Database entity representing a billable customer
//! - `AccountSummary`: Response body for the account info endpoint

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Represents an account record from the database.
///
/// # Database Table
///
/// Maps to the `accounts` table. Each account:
/// - Holds a prepaid credit balance (whole credits, never fractional)
/// - Can be deactivated without deletion via `is_active`
///
/// # Balance Invariant
///
/// `credits` is never negative (enforced by a database CHECK constraint)
/// and is only ever decreased through the credit ledger's atomic debit.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Account {
    /// Unique identifier for this account
    pub id: Uuid,

    /// Contact email for the account owner
    pub email: String,

    /// Current prepaid credit balance
    pub credits: i64,

    /// Whether this account may call the API
    ///
    /// Deactivated accounts keep their rows and history. This provides a
    /// way to suspend access without deleting the record.
    pub is_active: bool,

    /// Timestamp when account was created
    pub created_at: DateTime<Utc>,

    /// Timestamp of last balance update
    pub updated_at: DateTime<Utc>,
}

/// Aggregated usage counters over a trailing window.
///
/// Returned as part of [`AccountSummary`] for the last 30 days.
#[derive(Debug, Default, Serialize)]
pub struct UsageStats {
    /// Total API attempts in the window
    pub total_requests: i64,

    /// Attempts that returned a result (including cache hits)
    pub successful_requests: i64,

    /// Attempts served from the result cache
    pub duplicate_requests: i64,

    /// Credits actually charged in the window
    pub credits_used: i64,
}

/// Metadata about the account's API credential, safe for display.
///
/// The plaintext key is never recoverable; only the masked prefix is shown.
#[derive(Debug, Serialize)]
pub struct CredentialSummary {
    /// Credential identifier
    pub id: Uuid,

    /// Masked key for display (prefix + stars)
    pub masked_key: String,

    /// Whether the credential is currently accepted
    pub is_active: bool,

    /// Last successful authentication, if any
    pub last_used_at: Option<DateTime<Utc>>,

    /// When the credential was issued
    pub created_at: DateTime<Utc>,
}

/// Response body for `GET /api/v1/account`.
///
/// # JSON Example
///
/// ```json
/// {
///   "id": "550e8400-e29b-41d4-a716-446655440000",
///   "email": "ops@lawfirm.example",
///   "credits": 4200,
///   "is_active": true,
///   "api_key": { "id": "...", "masked_key": "vl_live_************", ... },
///   "usage_last_30_days": { "total_requests": 12, ... }
/// }
/// ```
#[derive(Debug, Serialize)]
pub struct AccountSummary {
    pub id: Uuid,
    pub email: String,
    pub credits: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub api_key: Option<CredentialSummary>,
    pub usage_last_30_days: UsageStats,
}
