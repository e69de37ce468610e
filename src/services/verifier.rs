//! External verification provider interface and the stand-in provider.
//!
//! The pipeline treats the provider as an opaque collaborator that either
//! returns a user-profile payload or signals "no match" as a normal,
//! non-exceptional negative result. Transport and internal failures travel
//! on the error channel instead, so the pipeline can distinguish "user not
//! found" (404, uncharged) from "provider broke" (500, uncharged).
//!
//! `MockVerifier` produces randomized but realistically shaped payloads
//! until a real provider integration exists.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rand::Rng;
use serde_json::{Value, json};

use crate::models::verify::{ExactVerifyRequest, SmartVerifyRequest};

/// A validated, endpoint-specific verification query.
#[derive(Debug, Clone)]
pub enum VerificationQuery {
    Exact(ExactVerifyRequest),
    Smart(SmartVerifyRequest),
}

impl VerificationQuery {
    pub fn username(&self) -> &str {
        match self {
            VerificationQuery::Exact(req) => &req.username,
            VerificationQuery::Smart(req) => &req.username,
        }
    }
}

/// Non-exceptional provider outcomes.
#[derive(Debug, Clone)]
pub enum LookupOutcome {
    /// A profile was found; the payload becomes the response `data`.
    Match(Value),
    /// No matching user. The string is the caller-facing reason.
    NoMatch(String),
}

/// Transport or internal provider failure.
#[derive(Debug, thiserror::Error)]
#[error("verification provider error: {0}")]
pub struct VerifierError(pub String);

/// The external user-verification lookup.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn lookup(&self, query: &VerificationQuery) -> Result<LookupOutcome, VerifierError>;
}

/// Stand-in provider returning randomized fake profiles.
#[derive(Clone, Default)]
pub struct MockVerifier;

#[async_trait]
impl Verifier for MockVerifier {
    async fn lookup(&self, query: &VerificationQuery) -> Result<LookupOutcome, VerifierError> {
        // Simulated upstream latency.
        let delay_ms = rand::rng().random_range(200..700);
        tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;

        match query {
            VerificationQuery::Exact(req) => Ok(mock_exact(req)),
            VerificationQuery::Smart(req) => Ok(mock_smart(req)),
        }
    }
}

fn mock_exact(req: &ExactVerifyRequest) -> LookupOutcome {
    let mut rng = rand::rng();

    // A slice of lookups legitimately finds nobody.
    if rng.random_bool(0.15) {
        return LookupOutcome::NoMatch("User not found or does not exist".to_string());
    }

    let now = Utc::now();
    let user_id = req
        .user_id
        .clone()
        .unwrap_or_else(|| format!("exact_{}", now.timestamp_millis()));

    let mut data = json!({
        "user": {
            "id": user_id,
            "username": req.username,
            "displayName": req.username,
            "joinDate": "2019-03-12T00:00:00Z",
            "hasVerifiedBadge": rng.random_bool(0.2),
            "isOnline": rng.random_bool(0.4),
            "lastSeen": (now - Duration::hours(rng.random_range(0..24))).to_rfc3339(),
            "accountAge": rng.random_range(100..1100),
        },
        "verification": {
            "exact": true,
            "confidence": rng.random_range(80..100),
            "method": "direct_api",
            "timestamp": now.to_rfc3339(),
        },
        "security": {
            "accountSecure": rng.random_bool(0.9),
            "suspiciousActivity": rng.random_bool(0.05),
            "recentPasswordChange": rng.random_bool(0.2),
        },
    });

    if req.include_profile {
        data["profile"] = json!({
            "description": "Exact match verified user",
            "friendsCount": rng.random_range(0..2000),
            "followingCount": rng.random_range(0..500),
            "followersCount": rng.random_range(0..3000),
            "groupsCount": rng.random_range(0..50),
            "profileViews": rng.random_range(0..10000),
        });
    }

    LookupOutcome::Match(data)
}

fn mock_smart(req: &SmartVerifyRequest) -> LookupOutcome {
    let mut rng = rand::rng();
    let now = Utc::now();

    let age: i64 = rng.random_range(8..18);
    let verified = rng.random_bool(0.3);

    // Filters are applied to the fabricated profile the way a real
    // provider would filter its search results.
    if let Some(min_age) = req.filters.min_age {
        if age < min_age {
            return LookupOutcome::NoMatch(
                "User does not meet minimum age requirement".to_string(),
            );
        }
    }
    if req.filters.verified_badge == Some(true) && !verified {
        return LookupOutcome::NoMatch("User does not have verified badge".to_string());
    }

    let mut user = json!({
        "id": format!("mock_{}", now.timestamp_millis()),
        "username": req.username,
        "displayName": req.username,
        "joinDate": "2020-06-15T00:00:00Z",
        "description": "Verified user",
        "friendsCount": rng.random_range(0..1000),
        "followersCount": rng.random_range(0..5000),
        "verified": verified,
        "age": age,
        "lastOnline": (now - Duration::hours(rng.random_range(0..168))).to_rfc3339(),
    });

    if req.include_history {
        user["gameHistory"] = json!([
            { "gameName": "Adopt Me!", "lastPlayed": "2024-10-30T12:00:00Z" },
            { "gameName": "Brookhaven", "lastPlayed": "2024-10-29T15:30:00Z" },
        ]);
    }

    LookupOutcome::Match(json!({
        "user": user,
        "verificationScore": rng.random_range(60..100),
        "flags": {
            "suspiciousActivity": rng.random_bool(0.1),
            "recentlyCreated": rng.random_bool(0.2),
            "hasValidAvatar": rng.random_bool(0.7),
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::verify::SmartFilters;

    #[test]
    fn smart_min_age_filter_can_reject() {
        // The fabricated age is always below 18, so a floor of 19 is a
        // guaranteed no-match.
        let req = SmartVerifyRequest {
            username: "Alice".to_string(),
            filters: SmartFilters {
                min_age: Some(19),
                ..SmartFilters::default()
            },
            include_history: false,
        };
        assert!(matches!(mock_smart(&req), LookupOutcome::NoMatch(_)));
    }

    #[test]
    fn exact_match_echoes_supplied_user_id() {
        let req = ExactVerifyRequest {
            username: "Alice".to_string(),
            user_id: Some("12345".to_string()),
            strict_match: true,
            include_profile: false,
        };
        // Retry past the simulated miss rate.
        for _ in 0..64 {
            if let LookupOutcome::Match(data) = mock_exact(&req) {
                assert_eq!(data["user"]["id"], "12345");
                assert!(data.get("profile").is_none());
                return;
            }
        }
        panic!("mock never produced a match in 64 attempts");
    }
}
