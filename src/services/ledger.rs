//! Credit ledger: atomic balance mutation with an append-only transaction log.
//!
//! # Atomicity
//!
//! `debit` runs as a single database transaction: the account row is locked
//! with `FOR UPDATE`, the balance is re-read and re-checked, the new balance
//! is written, and the ledger row is inserted. All four steps commit
//! together or not at all, so concurrent debits serialize on the row lock
//! and the stored balance can never go negative.
//!
//! `has_sufficient` is an advisory read only. It exists to short-circuit
//! obviously doomed requests before the expensive verification call; the
//! authoritative check is the one inside `debit`.

use async_trait::async_trait;
use uuid::Uuid;

use crate::db::DbPool;
use crate::models::transaction::TX_DEBIT;

/// Why a debit was rejected.
#[derive(Debug, thiserror::Error)]
pub enum DebitError {
    #[error("Account not found")]
    AccountNotFound,

    /// The transactional re-check found too few credits. `balance` is the
    /// locked balance observed inside the transaction.
    #[error("Insufficient credits")]
    InsufficientFunds { balance: i64 },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Outcome of a successful debit.
#[derive(Debug, Clone, Copy)]
pub struct DebitReceipt {
    pub transaction_id: Uuid,
    pub new_balance: i64,
}

/// Atomic balance store with an append-only transaction log.
#[async_trait]
pub trait CreditLedger: Send + Sync {
    /// Advisory balance check. Not a reservation; may be stale by the time
    /// the debit runs.
    async fn has_sufficient(&self, account_id: Uuid, amount: i64) -> Result<bool, sqlx::Error>;

    /// Atomically charge the account and append a ledger entry.
    async fn debit(
        &self,
        account_id: Uuid,
        credential_id: Uuid,
        amount: i64,
        description: &str,
    ) -> Result<DebitReceipt, DebitError>;
}

/// PostgreSQL-backed credit ledger.
#[derive(Clone)]
pub struct PgCreditLedger {
    pool: DbPool,
}

impl PgCreditLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CreditLedger for PgCreditLedger {
    async fn has_sufficient(&self, account_id: Uuid, amount: i64) -> Result<bool, sqlx::Error> {
        let balance: Option<i64> = sqlx::query_scalar("SELECT credits FROM accounts WHERE id = $1")
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(balance.unwrap_or(0) >= amount)
    }

    async fn debit(
        &self,
        account_id: Uuid,
        credential_id: Uuid,
        amount: i64,
        description: &str,
    ) -> Result<DebitReceipt, DebitError> {
        let mut tx = self.pool.begin().await?;

        // Lock the account row; concurrent debits serialize here.
        let balance: i64 = sqlx::query_scalar("SELECT credits FROM accounts WHERE id = $1 FOR UPDATE")
            .bind(account_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(DebitError::AccountNotFound)?;

        // Re-check under the lock; the advisory pre-check is not trusted.
        if balance < amount {
            tx.rollback().await?;
            return Err(DebitError::InsufficientFunds { balance });
        }

        let new_balance = balance - amount;

        sqlx::query("UPDATE accounts SET credits = $1, updated_at = NOW() WHERE id = $2")
            .bind(new_balance)
            .bind(account_id)
            .execute(&mut *tx)
            .await?;

        let transaction_id: Uuid = sqlx::query_scalar(
            "INSERT INTO credit_transactions
             (credential_id, account_id, tx_type, amount, credits_changed,
              balance_before, balance_after, description)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING id",
        )
        .bind(credential_id)
        .bind(account_id)
        .bind(TX_DEBIT)
        .bind(amount)
        .bind(-amount)
        .bind(balance)
        .bind(new_balance)
        .bind(description)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(DebitReceipt {
            transaction_id,
            new_balance,
        })
    }
}
