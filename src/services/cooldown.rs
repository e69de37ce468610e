//! Cooldown tracker: a keyed TTL gate on how often an account may invoke
//! a given endpoint.
//!
//! Backed by Redis. Each accepted (billed) call writes the current unix
//! timestamp under `cooldown:{account}:{endpoint}` with the window as TTL.
//! The check and the commit are deliberately separate steps: cache hits and
//! failed verifications never consume the caller's window.
//!
//! Availability outranks strict enforcement here: if Redis is unreachable,
//! `check` fails open and the request proceeds.

use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use uuid::Uuid;

/// Result of a cooldown check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownStatus {
    /// No active cooldown; the caller may proceed.
    Ready,
    /// The caller must wait `retry_after` more seconds.
    Cooling { retry_after: i64 },
}

/// Seconds the caller still has to wait, if any.
///
/// Pure so the boundary arithmetic is testable without a store: a commit at
/// time T with window W rejects at T+W-1 with 1 and accepts at T+W. The
/// result is clamped to at least 1 second.
pub fn remaining_wait(last_accepted: i64, now: i64, window_seconds: i64) -> Option<i64> {
    let elapsed = now - last_accepted;
    if elapsed < window_seconds {
        Some((window_seconds - elapsed).max(1))
    } else {
        None
    }
}

/// Gate limiting how often (account, endpoint) may be invoked.
#[async_trait]
pub trait CooldownTracker: Send + Sync {
    /// Check whether the account is eligible to call the endpoint now.
    ///
    /// Store failures are treated as `Ready`.
    async fn check(&self, account_id: Uuid, endpoint: &str, window_seconds: i64) -> CooldownStatus;

    /// Start a new cooldown window. Called only after a request has been
    /// accepted and billed. Store failures are swallowed.
    async fn commit(&self, account_id: Uuid, endpoint: &str, window_seconds: i64);
}

/// Redis-backed cooldown tracker.
#[derive(Clone)]
pub struct RedisCooldownTracker {
    client: redis::Client,
}

impl RedisCooldownTracker {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }

    fn key(account_id: Uuid, endpoint: &str) -> String {
        format!("cooldown:{account_id}:{endpoint}")
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }

    async fn read_last(&self, key: &str) -> Result<Option<i64>, redis::RedisError> {
        let mut conn = self.connection().await?;
        conn.get(key).await
    }
}

#[async_trait]
impl CooldownTracker for RedisCooldownTracker {
    async fn check(&self, account_id: Uuid, endpoint: &str, window_seconds: i64) -> CooldownStatus {
        let key = Self::key(account_id, endpoint);

        let last = match self.read_last(&key).await {
            Ok(last) => last,
            Err(err) => {
                // Fail open: a down cooldown store must not block traffic.
                tracing::warn!(error = %err, %key, "cooldown check failed, allowing request");
                return CooldownStatus::Ready;
            }
        };

        match last.and_then(|ts| remaining_wait(ts, Utc::now().timestamp(), window_seconds)) {
            Some(retry_after) => CooldownStatus::Cooling { retry_after },
            None => CooldownStatus::Ready,
        }
    }

    async fn commit(&self, account_id: Uuid, endpoint: &str, window_seconds: i64) {
        let key = Self::key(account_id, endpoint);
        let now = Utc::now().timestamp();

        let result: Result<(), redis::RedisError> = async {
            let mut conn = self.connection().await?;
            conn.set_ex(&key, now, window_seconds.max(1) as u64).await
        }
        .await;

        if let Err(err) = result {
            tracing::warn!(error = %err, %key, "cooldown commit failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_account_has_no_wait() {
        // No prior timestamp means the caller is eligible; the tracker
        // models that as absence, so only the boundary math is checked here.
        assert_eq!(remaining_wait(100, 100 + 5, 5), None);
    }

    #[test]
    fn wait_at_window_boundary() {
        // Committed at T=100 with window 5: T+4 still waits, T+5 passes.
        assert_eq!(remaining_wait(100, 104, 5), Some(1));
        assert_eq!(remaining_wait(100, 105, 5), None);
    }

    #[test]
    fn three_of_five_seconds_elapsed_waits_two() {
        assert_eq!(remaining_wait(100, 103, 5), Some(2));
    }

    #[test]
    fn wait_is_clamped_to_at_least_one_second() {
        // Same-instant retry must not report 0.
        assert_eq!(remaining_wait(100, 100, 0), None);
        assert_eq!(remaining_wait(100, 100, 1), Some(1));
    }

    #[test]
    fn full_window_reported_immediately_after_commit() {
        assert_eq!(remaining_wait(100, 100, 30), Some(30));
    }
}
