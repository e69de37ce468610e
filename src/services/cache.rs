//! Result cache: content-addressed reuse of verification payloads.
//!
//! Cache keys are a SHA-256 digest over the JSON serialization of the
//! normalized parameter map. Using a `BTreeMap` means keys are serialized
//! in lexicographic order, so semantically identical queries hash
//! identically regardless of submission order.
//!
//! Entries are scoped per account: the table has a composite unique key on
//! `(account_id, search_hash)` and both lookup and upsert filter on the
//! pair, so one account's cached write can never be served to another.
//!
//! Caching is best-effort throughout. A lookup failure is a miss and a
//! store failure is logged and swallowed; neither may fail the request.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::db::DbPool;

/// Deterministic fingerprint of a normalized parameter map.
pub fn compute_key(params: &BTreeMap<String, Value>) -> String {
    // Value's Display is infallible and BTreeMap iteration is ordered, so
    // the serialized form is canonical.
    let serialized = Value::Object(params.clone().into_iter().collect()).to_string();

    let mut hasher = Sha256::new();
    hasher.update(serialized.as_bytes());
    hex::encode(hasher.finalize())
}

/// Stores and retrieves verification results by content hash.
#[async_trait]
pub trait ResultCache: Send + Sync {
    /// Return the cached payload for this account and hash, if present and
    /// unexpired. Never errors; any failure is a miss.
    async fn lookup(&self, account_id: Uuid, hash: &str) -> Option<Value>;

    /// Upsert a payload under (account, hash) with the given lifetime.
    /// Failures are logged and swallowed.
    async fn store(&self, account_id: Uuid, hash: &str, payload: &Value, ttl_days: i64);

    /// Delete expired entries, returning how many were removed.
    async fn sweep_expired(&self) -> Result<u64, sqlx::Error>;
}

/// PostgreSQL-backed result cache.
#[derive(Clone)]
pub struct PgResultCache {
    pool: DbPool,
}

impl PgResultCache {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResultCache for PgResultCache {
    async fn lookup(&self, account_id: Uuid, hash: &str) -> Option<Value> {
        let result: Result<Option<Value>, sqlx::Error> = sqlx::query_scalar(
            "SELECT result_data FROM verification_cache
             WHERE account_id = $1 AND search_hash = $2 AND expires_at > NOW()",
        )
        .bind(account_id)
        .bind(hash)
        .fetch_optional(&self.pool)
        .await;

        match result {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(error = %err, "cache lookup failed, treating as miss");
                None
            }
        }
    }

    async fn store(&self, account_id: Uuid, hash: &str, payload: &Value, ttl_days: i64) {
        let result = sqlx::query(
            "INSERT INTO verification_cache (account_id, search_hash, result_data, expires_at)
             VALUES ($1, $2, $3, NOW() + make_interval(days => $4::int))
             ON CONFLICT (account_id, search_hash)
             DO UPDATE SET result_data = EXCLUDED.result_data,
                           expires_at = EXCLUDED.expires_at,
                           updated_at = NOW()",
        )
        .bind(account_id)
        .bind(hash)
        .bind(payload)
        .bind(ttl_days)
        .execute(&self.pool)
        .await;

        if let Err(err) = result {
            tracing::warn!(error = %err, "cache store failed");
        }
    }

    async fn sweep_expired(&self) -> Result<u64, sqlx::Error> {
        let deleted = sqlx::query("DELETE FROM verification_cache WHERE expires_at < NOW()")
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn key_is_insensitive_to_insertion_order() {
        let a = params(&[("a", json!(1)), ("b", json!(2))]);
        let b = params(&[("b", json!(2)), ("a", json!(1))]);
        assert_eq!(compute_key(&a), compute_key(&b));
    }

    #[test]
    fn key_is_sensitive_to_values() {
        let a = params(&[("a", json!(1))]);
        let b = params(&[("a", json!(2))]);
        assert_ne!(compute_key(&a), compute_key(&b));
    }

    #[test]
    fn key_is_sensitive_to_extra_fields() {
        let a = params(&[("username", json!("Alice"))]);
        let b = params(&[("username", json!("Alice")), ("type", json!("exact"))]);
        assert_ne!(compute_key(&a), compute_key(&b));
    }

    #[test]
    fn key_is_a_sha256_hex_digest() {
        let key = compute_key(&params(&[("username", json!("Alice"))]));
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
