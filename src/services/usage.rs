//! Usage log: append-only audit of every API attempt.
//!
//! Every inbound verification request produces exactly one record, whatever
//! the outcome. A failed write degrades observability, never the request,
//! so `record` swallows its own errors.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::DbPool;
use crate::models::account::UsageStats;
use crate::models::usage::{UsageEntry, UsageFilter, UsageRecord};

/// Append-only audit log of API attempts.
#[async_trait]
pub trait UsageLog: Send + Sync {
    /// Append one record. Never fails the caller.
    async fn record(&self, entry: UsageEntry);

    /// Paginated listing for a credential, newest first, with the total
    /// matching count for pagination.
    async fn list(
        &self,
        credential_id: Uuid,
        filter: &UsageFilter,
    ) -> Result<(Vec<UsageRecord>, i64), sqlx::Error>;

    /// Aggregate counters for a credential since the given instant.
    async fn stats_since(
        &self,
        credential_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<UsageStats, sqlx::Error>;
}

/// PostgreSQL-backed usage log.
#[derive(Clone)]
pub struct PgUsageLog {
    pool: DbPool,
}

impl PgUsageLog {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UsageLog for PgUsageLog {
    async fn record(&self, entry: UsageEntry) {
        let result = sqlx::query(
            "INSERT INTO api_usage_logs
             (credential_id, endpoint, request_id, credits_used, was_successful,
              was_duplicate, response_time_ms, ip_address, user_agent, error_message)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(entry.credential_id)
        .bind(&entry.endpoint)
        .bind(entry.request_id)
        .bind(entry.credits_used)
        .bind(entry.was_successful)
        .bind(entry.was_duplicate)
        .bind(entry.response_time_ms)
        .bind(&entry.ip_address)
        .bind(&entry.user_agent)
        .bind(&entry.error_message)
        .execute(&self.pool)
        .await;

        if let Err(err) = result {
            tracing::warn!(
                error = %err,
                request_id = %entry.request_id,
                "failed to write usage log"
            );
        }
    }

    async fn list(
        &self,
        credential_id: Uuid,
        filter: &UsageFilter,
    ) -> Result<(Vec<UsageRecord>, i64), sqlx::Error> {
        let records = sqlx::query_as::<_, UsageRecord>(
            "SELECT id, credential_id, endpoint, request_id, credits_used,
                    was_successful, was_duplicate, response_time_ms,
                    ip_address, user_agent, error_message, created_at
             FROM api_usage_logs
             WHERE credential_id = $1
               AND ($2::text IS NULL OR endpoint = $2)
               AND ($3::boolean IS NULL OR was_successful = $3)
               AND ($4::timestamptz IS NULL OR created_at >= $4)
               AND ($5::timestamptz IS NULL OR created_at <= $5)
             ORDER BY created_at DESC
             LIMIT $6 OFFSET $7",
        )
        .bind(credential_id)
        .bind(&filter.endpoint)
        .bind(filter.success)
        .bind(filter.date_from)
        .bind(filter.date_to)
        .bind(filter.limit)
        .bind(filter.offset)
        .fetch_all(&self.pool)
        .await?;

        let total_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM api_usage_logs
             WHERE credential_id = $1
               AND ($2::text IS NULL OR endpoint = $2)
               AND ($3::boolean IS NULL OR was_successful = $3)
               AND ($4::timestamptz IS NULL OR created_at >= $4)
               AND ($5::timestamptz IS NULL OR created_at <= $5)",
        )
        .bind(credential_id)
        .bind(&filter.endpoint)
        .bind(filter.success)
        .bind(filter.date_from)
        .bind(filter.date_to)
        .fetch_one(&self.pool)
        .await?;

        Ok((records, total_count))
    }

    async fn stats_since(
        &self,
        credential_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<UsageStats, sqlx::Error> {
        let (total, successful, duplicates, credits): (i64, i64, i64, i64) = sqlx::query_as(
            "SELECT COUNT(*),
                    COUNT(*) FILTER (WHERE was_successful),
                    COUNT(*) FILTER (WHERE was_duplicate),
                    COALESCE(SUM(credits_used), 0)::bigint
             FROM api_usage_logs
             WHERE credential_id = $1 AND created_at >= $2",
        )
        .bind(credential_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(UsageStats {
            total_requests: total,
            successful_requests: successful,
            duplicate_requests: duplicates,
            credits_used: credits,
        })
    }
}
