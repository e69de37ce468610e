//! API credential model for authentication.
//!
//! Credentials are opaque bearer keys with a recognizable prefix
//! (`vl_live_` followed by 64 hex characters). Only an Argon2id hash of the
//! full key is persisted; a short plaintext prefix is stored separately so
//! authentication can narrow the candidate set without scanning every hash.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Required prefix for every issued key.
pub const KEY_PREFIX: &str = "vl_live_";

/// Number of random bytes in the key payload (hex-encoded to 64 chars).
pub const KEY_ENTROPY_BYTES: usize = 32;

/// Length of the stored lookup prefix: `vl_live_` plus the first 8 hex chars.
pub const LOOKUP_PREFIX_LEN: usize = 16;

/// Represents an API credential record from the database.
///
/// # Database Table
///
/// Maps to the `api_credentials` table with at most one active credential
/// per account. Regeneration replaces `key_prefix` and `key_hash` in place.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ApiCredential {
    /// Unique identifier for this credential
    pub id: Uuid,

    /// Account that owns this credential
    pub account_id: Uuid,

    /// First 16 characters of the plaintext key, used for candidate lookup
    pub key_prefix: String,

    /// Argon2id PHC-formatted hash of the full key
    ///
    /// The plaintext key is returned to the caller exactly once at issuance
    /// and is never persisted.
    pub key_hash: String,

    /// Whether this credential is currently accepted
    ///
    /// Inactive credentials are rejected during authentication. This
    /// provides a way to revoke access without deleting the record.
    pub is_active: bool,

    /// Updated on every successful authentication
    pub last_used_at: Option<DateTime<Utc>>,

    /// Timestamp when this credential was created
    pub created_at: DateTime<Utc>,

    /// Timestamp of the last rotation (or creation)
    pub updated_at: DateTime<Utc>,
}

/// Mask a key for display: keep the recognizable prefix, star the rest.
///
/// Works on the plaintext at issuance time or on the stored lookup prefix.
pub fn mask_key(key: &str) -> String {
    if key.len() <= 8 {
        return key.to_string();
    }
    format!("{}{}", &key[..8], "*".repeat(key.len().saturating_sub(8).max(12)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_keeps_prefix_and_hides_payload() {
        let masked = mask_key("vl_live_abcdef0123456789");
        assert!(masked.starts_with("vl_live_"));
        assert!(!masked.contains("abcdef"));
        assert!(masked.ends_with('*'));
    }

    #[test]
    fn mask_leaves_short_strings_alone() {
        assert_eq!(mask_key("short"), "short");
    }
}
