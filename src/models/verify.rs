//! Verification request schemas and response envelopes.
//!
//! Request bodies are validated structurally with `validator` so that 400
//! responses can carry field-level error details. Each request type also
//! knows how to reduce itself to the normalized parameter map used for
//! cache keying: a sorted map that always includes the endpoint
//! discriminator, so "exact" and "smart" queries for the same username can
//! never collide.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use validator::Validate;

/// Request body for `POST /api/v1/verify/exact`.
///
/// # JSON Example
///
/// ```json
/// {
///   "username": "Alice",
///   "userId": "12345",
///   "strictMatch": true,
///   "includeProfile": true
/// }
/// ```
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ExactVerifyRequest {
    /// Username to verify (required, 1-100 chars)
    #[validate(length(min = 1, max = 100, message = "Username is required"))]
    pub username: String,

    /// External user identifier, if the caller already has one
    pub user_id: Option<String>,

    /// Require an exact username match
    #[serde(default = "default_true")]
    pub strict_match: bool,

    /// Include the extended profile section in the result
    #[serde(default = "default_true")]
    pub include_profile: bool,
}

/// Optional filters for smart verification.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SmartFilters {
    /// Minimum account age in years
    #[validate(range(min = 0, max = 20))]
    pub min_age: Option<i64>,

    /// Maximum account age in years
    #[validate(range(min = 0, max = 20))]
    pub max_age: Option<i64>,

    pub has_avatar: Option<bool>,

    pub has_description: Option<bool>,

    #[validate(range(min = 0))]
    pub min_friends: Option<i64>,

    pub verified_badge: Option<bool>,
}

/// Request body for `POST /api/v1/verify/smart`.
///
/// # JSON Example
///
/// ```json
/// {
///   "username": "Alice",
///   "filters": { "minAge": 1, "verifiedBadge": true },
///   "includeHistory": false
/// }
/// ```
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SmartVerifyRequest {
    /// Username to search for (required, 1-100 chars)
    #[validate(length(min = 1, max = 100, message = "Username is required"))]
    pub username: String,

    /// Optional search filters
    #[serde(default)]
    #[validate(nested)]
    pub filters: SmartFilters,

    /// Include match history in the result
    #[serde(default)]
    pub include_history: bool,
}

fn default_true() -> bool {
    true
}

impl ExactVerifyRequest {
    /// Reduce to the normalized parameter map used for cache keying.
    ///
    /// Absent optional fields are omitted entirely, so `{"username": "a"}`
    /// and `{"username": "a", "userId": null}` key identically.
    pub fn normalized_params(&self) -> BTreeMap<String, Value> {
        let mut params = BTreeMap::new();
        params.insert("type".to_string(), Value::from("exact"));
        params.insert("username".to_string(), Value::from(self.username.clone()));
        if let Some(ref user_id) = self.user_id {
            params.insert("userId".to_string(), Value::from(user_id.clone()));
        }
        params.insert("strictMatch".to_string(), Value::from(self.strict_match));
        params.insert(
            "includeProfile".to_string(),
            Value::from(self.include_profile),
        );
        params
    }
}

impl SmartVerifyRequest {
    /// Reduce to the normalized parameter map used for cache keying.
    pub fn normalized_params(&self) -> BTreeMap<String, Value> {
        let mut filters = BTreeMap::new();
        if let Some(v) = self.filters.min_age {
            filters.insert("minAge".to_string(), Value::from(v));
        }
        if let Some(v) = self.filters.max_age {
            filters.insert("maxAge".to_string(), Value::from(v));
        }
        if let Some(v) = self.filters.has_avatar {
            filters.insert("hasAvatar".to_string(), Value::from(v));
        }
        if let Some(v) = self.filters.has_description {
            filters.insert("hasDescription".to_string(), Value::from(v));
        }
        if let Some(v) = self.filters.min_friends {
            filters.insert("minFriends".to_string(), Value::from(v));
        }
        if let Some(v) = self.filters.verified_badge {
            filters.insert("verifiedBadge".to_string(), Value::from(v));
        }

        let mut params = BTreeMap::new();
        params.insert("type".to_string(), Value::from("smart"));
        params.insert("username".to_string(), Value::from(self.username.clone()));
        params.insert(
            "filters".to_string(),
            Value::Object(filters.into_iter().collect()),
        );
        params.insert(
            "includeHistory".to_string(),
            Value::from(self.include_history),
        );
        params
    }
}

/// Successful verification response body (fresh or cached).
///
/// # JSON Example
///
/// ```json
/// {
///   "success": true,
///   "data": { "user": { ... } },
///   "fromCache": false,
///   "creditsUsed": 100,
///   "currentBalance": 900,
///   "requestId": "f4b7..."
/// }
/// ```
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifySuccessResponse {
    pub success: bool,
    pub data: Value,
    pub from_cache: bool,
    pub credits_used: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_balance: Option<i64>,
    pub request_id: Uuid,
}
