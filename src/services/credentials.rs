//! Credential store: API key issuance, rotation, and verification.
//!
//! Keys look like `vl_live_<64 hex chars>`. Only the Argon2id hash of the
//! full key is persisted, alongside the first 16 plaintext characters so
//! authentication can fetch a small candidate set by prefix instead of
//! verifying every stored hash. Argon2id is used in PHC string format, so
//! algorithm parameters and salt travel with the hash itself.

use argon2::Argon2;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::RngCore;
use uuid::Uuid;

use crate::db::DbPool;
use crate::models::account::Account;
use crate::models::credential::{ApiCredential, KEY_ENTROPY_BYTES, KEY_PREFIX, LOOKUP_PREFIX_LEN};
use crate::models::transaction::{TX_KEY_GENERATED, TX_KEY_REGENERATED};

/// Why an authentication attempt was rejected.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No X-API-Key header was presented.
    #[error("Missing API key. Include X-API-Key header.")]
    MissingKey,

    /// The presented secret does not have the required format.
    ///
    /// Rejected before any database access.
    #[error("Invalid API key format. Keys must start with {KEY_PREFIX}")]
    BadFormat,

    /// No active credential matched the presented secret.
    #[error("Invalid API key")]
    InvalidKey,

    /// The credential matched but its account has been deactivated.
    #[error("Account is inactive")]
    InactiveAccount,

    /// The credential store itself failed.
    #[error("Authentication failed")]
    Store(String),
}

/// Why key issuance was rejected.
#[derive(Debug, thiserror::Error)]
pub enum IssueError {
    #[error("Account not found")]
    AccountNotFound,

    /// An active key exists and regeneration was not requested.
    #[error("API key already exists")]
    Conflict,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Hashing error: {0}")]
    Hash(String),
}

/// The caller resolved by a successful authentication.
#[derive(Debug, Clone)]
pub struct AuthenticatedClient {
    pub credential_id: Uuid,
    pub account: Account,
}

/// A freshly issued key. The plaintext appears here exactly once.
#[derive(Debug)]
pub struct IssuedKey {
    pub credential_id: Uuid,
    pub plaintext: String,
    pub regenerated: bool,
    pub created_at: DateTime<Utc>,
}

/// Issues and verifies opaque bearer API keys.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Issue a key for the account, or rotate the existing one.
    ///
    /// With `regenerate = false`, an existing active credential is a
    /// conflict. Both paths append a zero-delta ledger transaction.
    async fn issue(&self, account_id: Uuid, regenerate: bool) -> Result<IssuedKey, IssueError>;

    /// Resolve a presented secret to its account.
    ///
    /// Updates `last_used_at` as a side effect of a successful match.
    async fn authenticate(&self, presented: &str) -> Result<AuthenticatedClient, AuthError>;

    /// Fetch the credential row for display (masked key, timestamps).
    async fn get_credential(&self, credential_id: Uuid)
    -> Result<Option<ApiCredential>, sqlx::Error>;
}

/// Generate a new plaintext key: fixed prefix plus 256 bits of hex entropy.
pub fn generate_key() -> String {
    let mut bytes = [0u8; KEY_ENTROPY_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    format!("{KEY_PREFIX}{}", hex::encode(bytes))
}

/// Hash a plaintext key with Argon2id and a random salt.
pub fn hash_key(key: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(key.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a plaintext key against a stored PHC-formatted hash.
///
/// Returns `Ok(false)` on mismatch; `Err` only for malformed hashes.
pub fn verify_key(key: &str, hash: &str) -> Result<bool, argon2::password_hash::Error> {
    let parsed = PasswordHash::new(hash)?;
    match Argon2::default().verify_password(key.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(e),
    }
}

/// PostgreSQL-backed credential store.
#[derive(Clone)]
pub struct PgCredentialStore {
    pool: DbPool,
}

impl PgCredentialStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn issue(&self, account_id: Uuid, regenerate: bool) -> Result<IssuedKey, IssueError> {
        let account = sqlx::query_as::<_, Account>(
            "SELECT id, email, credits, is_active, created_at, updated_at
             FROM accounts WHERE id = $1",
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(IssueError::AccountNotFound)?;

        let existing: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM api_credentials WHERE account_id = $1")
                .bind(account_id)
                .fetch_optional(&self.pool)
                .await?;

        if existing.is_some() && !regenerate {
            return Err(IssueError::Conflict);
        }

        let plaintext = generate_key();
        let key_hash = hash_key(&plaintext).map_err(|e| IssueError::Hash(e.to_string()))?;
        let key_prefix = plaintext[..LOOKUP_PREFIX_LEN].to_string();

        // Credential upsert and the zero-delta ledger entry commit together.
        let mut tx = self.pool.begin().await?;

        let (credential_id, created_at): (Uuid, DateTime<Utc>) = match existing {
            Some(id) => {
                sqlx::query_as(
                    "UPDATE api_credentials
                     SET key_prefix = $1, key_hash = $2, is_active = true, updated_at = NOW()
                     WHERE id = $3
                     RETURNING id, created_at",
                )
                .bind(&key_prefix)
                .bind(&key_hash)
                .bind(id)
                .fetch_one(&mut *tx)
                .await?
            }
            None => {
                sqlx::query_as(
                    "INSERT INTO api_credentials (account_id, key_prefix, key_hash)
                     VALUES ($1, $2, $3)
                     RETURNING id, created_at",
                )
                .bind(account_id)
                .bind(&key_prefix)
                .bind(&key_hash)
                .fetch_one(&mut *tx)
                .await?
            }
        };

        let (tx_type, description) = if regenerate && existing.is_some() {
            (TX_KEY_REGENERATED, "API key regenerated")
        } else {
            (TX_KEY_GENERATED, "API key generated")
        };

        sqlx::query(
            "INSERT INTO credit_transactions
             (credential_id, account_id, tx_type, amount, credits_changed,
              balance_before, balance_after, description)
             VALUES ($1, $2, $3, 0, 0, $4, $4, $5)",
        )
        .bind(credential_id)
        .bind(account_id)
        .bind(tx_type)
        .bind(account.credits)
        .bind(description)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(IssuedKey {
            credential_id,
            plaintext,
            regenerated: regenerate && existing.is_some(),
            created_at,
        })
    }

    async fn authenticate(&self, presented: &str) -> Result<AuthenticatedClient, AuthError> {
        // Format gate runs before any database access.
        if !presented.starts_with(KEY_PREFIX) || presented.len() < LOOKUP_PREFIX_LEN {
            return Err(AuthError::BadFormat);
        }

        let lookup_prefix = &presented[..LOOKUP_PREFIX_LEN];

        let candidates = sqlx::query_as::<_, ApiCredential>(
            "SELECT id, account_id, key_prefix, key_hash, is_active,
                    last_used_at, created_at, updated_at
             FROM api_credentials
             WHERE key_prefix = $1 AND is_active = true",
        )
        .bind(lookup_prefix)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AuthError::Store(e.to_string()))?;

        for credential in candidates {
            let matched = verify_key(presented, &credential.key_hash)
                .map_err(|e| AuthError::Store(e.to_string()))?;
            if !matched {
                continue;
            }

            let account = sqlx::query_as::<_, Account>(
                "SELECT id, email, credits, is_active, created_at, updated_at
                 FROM accounts WHERE id = $1",
            )
            .bind(credential.account_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AuthError::Store(e.to_string()))?
            .ok_or(AuthError::InvalidKey)?;

            if !account.is_active {
                return Err(AuthError::InactiveAccount);
            }

            // The caller never sees this value, but it is always recorded.
            sqlx::query("UPDATE api_credentials SET last_used_at = NOW() WHERE id = $1")
                .bind(credential.id)
                .execute(&self.pool)
                .await
                .map_err(|e| AuthError::Store(e.to_string()))?;

            return Ok(AuthenticatedClient {
                credential_id: credential.id,
                account,
            });
        }

        Err(AuthError::InvalidKey)
    }

    async fn get_credential(
        &self,
        credential_id: Uuid,
    ) -> Result<Option<ApiCredential>, sqlx::Error> {
        sqlx::query_as::<_, ApiCredential>(
            "SELECT id, account_id, key_prefix, key_hash, is_active,
                    last_used_at, created_at, updated_at
             FROM api_credentials WHERE id = $1",
        )
        .bind(credential_id)
        .fetch_optional(&self.pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_have_prefix_and_length() {
        let key = generate_key();
        assert!(key.starts_with(KEY_PREFIX));
        // "vl_live_" + 64 hex chars
        assert_eq!(key.len(), KEY_PREFIX.len() + KEY_ENTROPY_BYTES * 2);
    }

    #[test]
    fn generated_keys_are_unique() {
        assert_ne!(generate_key(), generate_key());
    }

    #[test]
    fn hash_and_verify_roundtrip() {
        let key = generate_key();
        let hash = hash_key(&key).expect("hashing should succeed");
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_key(&key, &hash).expect("verify should succeed"));
    }

    #[test]
    fn wrong_key_does_not_verify() {
        let hash = hash_key(&generate_key()).expect("hashing should succeed");
        let other = generate_key();
        assert!(!verify_key(&other, &hash).expect("verify should succeed"));
    }
}
