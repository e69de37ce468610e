//! Admission pipeline: the orchestrator in front of every billed
//! verification call.
//!
//! Each request walks a strictly ordered chain, short-circuiting on the
//! first failure:
//!
//! ```text
//! AUTH -> VALIDATE -> RATE_LIMIT -> CACHE_LOOKUP -> BALANCE_CHECK
//!      -> EXECUTE -> SETTLE -> RESPOND
//! ```
//!
//! Invariants the pipeline enforces:
//! - a cache hit charges nothing and does not consume the cooldown window
//! - a negative lookup (no match) charges nothing
//! - the cooldown is committed only after a successful, billed call
//! - every exit path writes exactly one usage log record
//!
//! All collaborators are injected as trait objects so tests can run the
//! whole state machine against in-memory fakes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use uuid::Uuid;
use validator::Validate;

use crate::models::usage::UsageEntry;
use crate::models::verify::{ExactVerifyRequest, SmartVerifyRequest};
use crate::services::cache::{ResultCache, compute_key};
use crate::services::cooldown::{CooldownStatus, CooldownTracker};
use crate::services::credentials::{AuthError, CredentialStore};
use crate::services::ledger::CreditLedger;
use crate::services::usage::UsageLog;
use crate::services::verifier::{LookupOutcome, VerificationQuery, Verifier};

/// The two billed endpoint classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyEndpoint {
    Exact,
    Smart,
}

impl VerifyEndpoint {
    /// Stable endpoint name used in usage logs and cooldown keys.
    pub fn log_name(&self) -> &'static str {
        match self {
            VerifyEndpoint::Exact => "exact_verify",
            VerifyEndpoint::Smart => "smart_verify",
        }
    }
}

/// Per-endpoint billing and throttling parameters.
#[derive(Debug, Clone, Copy)]
pub struct EndpointPolicy {
    pub credit_cost: i64,
    pub cooldown_seconds: i64,
}

/// Pipeline-wide configuration resolved from the application config.
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    pub exact: EndpointPolicy,
    pub smart: EndpointPolicy,
    pub cache_ttl_days: i64,
    pub verify_timeout: Duration,
}

/// Per-request context carried through the pipeline.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Correlation identifier, unique per attempt.
    pub request_id: Uuid,
    /// When the request entered the pipeline.
    pub started_at: Instant,
    /// Raw X-API-Key header value, if any.
    pub api_key: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestContext {
    pub fn new(api_key: Option<String>, ip_address: Option<String>, user_agent: Option<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            started_at: Instant::now(),
            api_key,
            ip_address,
            user_agent,
        }
    }

    fn elapsed_ms(&self) -> i64 {
        self.started_at.elapsed().as_millis() as i64
    }
}

/// A request that made it through the pipeline.
#[derive(Debug)]
pub struct Admitted {
    pub data: Value,
    pub from_cache: bool,
    pub credits_used: i64,
    /// Known only on a freshly billed call (from the debit receipt).
    pub current_balance: Option<i64>,
}

/// A request the pipeline turned away, with enough structure for the
/// handler to build the right status, body, and headers.
#[derive(Debug)]
pub enum Denial {
    /// 401 — missing, malformed, or invalid credential.
    Unauthorized { message: String },
    /// 400 — structural validation failure with field-level details.
    Invalid { details: Value },
    /// 429 — cooldown active.
    RateLimited { retry_after: i64 },
    /// 402 — advisory balance check failed.
    InsufficientCredits { required: i64, current: i64 },
    /// 404 — the provider reported no matching user. Never charged.
    NoMatch { message: String },
    /// 500 — store failure, provider failure, or timeout. Never charged.
    Internal { message: String },
}

/// Orchestrates the admission chain around one verification call.
pub struct Pipeline {
    credentials: Arc<dyn CredentialStore>,
    cooldowns: Arc<dyn CooldownTracker>,
    cache: Arc<dyn ResultCache>,
    ledger: Arc<dyn CreditLedger>,
    usage: Arc<dyn UsageLog>,
    verifier: Arc<dyn Verifier>,
    config: PipelineConfig,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        cooldowns: Arc<dyn CooldownTracker>,
        cache: Arc<dyn ResultCache>,
        ledger: Arc<dyn CreditLedger>,
        usage: Arc<dyn UsageLog>,
        verifier: Arc<dyn Verifier>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            credentials,
            cooldowns,
            cache,
            ledger,
            usage,
            verifier,
            config,
        }
    }

    fn policy(&self, endpoint: VerifyEndpoint) -> EndpointPolicy {
        match endpoint {
            VerifyEndpoint::Exact => self.config.exact,
            VerifyEndpoint::Smart => self.config.smart,
        }
    }

    /// Run one request through the admission chain.
    pub async fn admit(
        &self,
        endpoint: VerifyEndpoint,
        body: Value,
        ctx: &RequestContext,
    ) -> Result<Admitted, Denial> {
        let name = endpoint.log_name();
        let policy = self.policy(endpoint);

        // AUTH
        let presented = match ctx.api_key.as_deref() {
            Some(key) => key,
            None => {
                let message = AuthError::MissingKey.to_string();
                self.log_failure(ctx, name, None, &message).await;
                return Err(Denial::Unauthorized { message });
            }
        };

        let client = match self.credentials.authenticate(presented).await {
            Ok(client) => client,
            Err(AuthError::Store(detail)) => {
                tracing::error!(error = %detail, "credential store failure during auth");
                self.log_failure(ctx, name, None, "Authentication failed").await;
                return Err(Denial::Internal {
                    message: "Verification service temporarily unavailable".to_string(),
                });
            }
            Err(err) => {
                let message = err.to_string();
                self.log_failure(ctx, name, None, &message).await;
                return Err(Denial::Unauthorized { message });
            }
        };

        let credential_id = client.credential_id;
        let account_id = client.account.id;

        // VALIDATE
        let query = match parse_query(endpoint, body) {
            Ok(query) => query,
            Err(details) => {
                self.log_failure(ctx, name, Some(credential_id), "Validation failed")
                    .await;
                return Err(Denial::Invalid { details });
            }
        };

        // RATE_LIMIT (commit is deferred to SETTLE)
        if let CooldownStatus::Cooling { retry_after } = self
            .cooldowns
            .check(account_id, name, policy.cooldown_seconds)
            .await
        {
            self.log_failure(ctx, name, Some(credential_id), "Rate limit exceeded")
                .await;
            return Err(Denial::RateLimited { retry_after });
        }

        // CACHE_LOOKUP
        let search_hash = match &query {
            VerificationQuery::Exact(req) => compute_key(&req.normalized_params()),
            VerificationQuery::Smart(req) => compute_key(&req.normalized_params()),
        };

        if let Some(cached) = self.cache.lookup(account_id, &search_hash).await {
            // Cached answers are free and do not consume the cooldown.
            self.usage
                .record(self.entry(ctx, name, Some(credential_id), 0, true, true, None))
                .await;
            return Ok(Admitted {
                data: cached,
                from_cache: true,
                credits_used: 0,
                current_balance: None,
            });
        }

        // BALANCE_CHECK (advisory; the debit re-checks under lock)
        match self.ledger.has_sufficient(account_id, policy.credit_cost).await {
            Ok(true) => {}
            Ok(false) => {
                self.log_failure(ctx, name, Some(credential_id), "Insufficient credits")
                    .await;
                return Err(Denial::InsufficientCredits {
                    required: policy.credit_cost,
                    current: client.account.credits,
                });
            }
            Err(err) => {
                tracing::error!(error = %err, "balance check failed");
                self.log_failure(ctx, name, Some(credential_id), "Balance check failed")
                    .await;
                return Err(Denial::Internal {
                    message: "Verification service temporarily unavailable".to_string(),
                });
            }
        }

        // EXECUTE
        let outcome = match tokio::time::timeout(
            self.config.verify_timeout,
            self.verifier.lookup(&query),
        )
        .await
        {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => {
                tracing::error!(error = %err, "verification provider failure");
                self.log_failure(ctx, name, Some(credential_id), "Verification failed")
                    .await;
                return Err(Denial::Internal {
                    message: "Verification service temporarily unavailable".to_string(),
                });
            }
            Err(_) => {
                tracing::error!(timeout = ?self.config.verify_timeout, "verification timed out");
                self.log_failure(ctx, name, Some(credential_id), "Verification timed out")
                    .await;
                return Err(Denial::Internal {
                    message: "Verification service temporarily unavailable".to_string(),
                });
            }
        };

        let data = match outcome {
            LookupOutcome::Match(data) => data,
            LookupOutcome::NoMatch(message) => {
                // A negative result is a normal outcome: 404, never charged.
                self.log_failure(ctx, name, Some(credential_id), &message).await;
                return Err(Denial::NoMatch { message });
            }
        };

        // SETTLE: debit, then cache, then commit the cooldown.
        let description = format!(
            "{} verification for {}",
            match endpoint {
                VerifyEndpoint::Exact => "Exact",
                VerifyEndpoint::Smart => "Smart",
            },
            query.username()
        );

        let receipt = match self
            .ledger
            .debit(account_id, credential_id, policy.credit_cost, &description)
            .await
        {
            Ok(receipt) => receipt,
            Err(err) => {
                // External work was already performed without being billed;
                // this is a hard failure, not a soft one.
                tracing::error!(error = %err, %account_id, "debit failed after verification");
                self.log_failure(ctx, name, Some(credential_id), "Failed to deduct credits")
                    .await;
                return Err(Denial::Internal {
                    message: "Verification service temporarily unavailable".to_string(),
                });
            }
        };

        self.cache
            .store(account_id, &search_hash, &data, self.config.cache_ttl_days)
            .await;

        self.cooldowns
            .commit(account_id, name, policy.cooldown_seconds)
            .await;

        self.usage
            .record(self.entry(
                ctx,
                name,
                Some(credential_id),
                policy.credit_cost,
                true,
                false,
                None,
            ))
            .await;

        Ok(Admitted {
            data,
            from_cache: false,
            credits_used: policy.credit_cost,
            current_balance: Some(receipt.new_balance),
        })
    }

    fn entry(
        &self,
        ctx: &RequestContext,
        endpoint: &str,
        credential_id: Option<Uuid>,
        credits_used: i64,
        was_successful: bool,
        was_duplicate: bool,
        error_message: Option<String>,
    ) -> UsageEntry {
        UsageEntry {
            credential_id,
            endpoint: endpoint.to_string(),
            request_id: ctx.request_id,
            credits_used,
            was_successful,
            was_duplicate,
            response_time_ms: ctx.elapsed_ms(),
            ip_address: ctx.ip_address.clone(),
            user_agent: ctx.user_agent.clone(),
            error_message,
        }
    }

    async fn log_failure(
        &self,
        ctx: &RequestContext,
        endpoint: &str,
        credential_id: Option<Uuid>,
        message: &str,
    ) {
        self.usage
            .record(self.entry(
                ctx,
                endpoint,
                credential_id,
                0,
                false,
                false,
                Some(message.to_string()),
            ))
            .await;
    }
}

/// Deserialize and structurally validate the endpoint-specific body.
///
/// On failure, returns the field-level detail map for the 400 response.
fn parse_query(endpoint: VerifyEndpoint, body: Value) -> Result<VerificationQuery, Value> {
    fn check<T: Validate>(req: T, wrap: impl Fn(T) -> VerificationQuery) -> Result<VerificationQuery, Value> {
        match req.validate() {
            Ok(()) => Ok(wrap(req)),
            Err(errors) => Err(serde_json::to_value(errors).unwrap_or(Value::Null)),
        }
    }

    match endpoint {
        VerifyEndpoint::Exact => match serde_json::from_value::<ExactVerifyRequest>(body) {
            Ok(req) => check(req, VerificationQuery::Exact),
            Err(err) => Err(serde_json::json!({ "body": [err.to_string()] })),
        },
        VerifyEndpoint::Smart => match serde_json::from_value::<SmartVerifyRequest>(body) {
            Ok(req) => check(req, VerificationQuery::Smart),
            Err(err) => Err(serde_json::json!({ "body": [err.to_string()] })),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicI64, Ordering};

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use serde_json::json;

    use crate::models::account::Account;
    use crate::models::credential::{ApiCredential, KEY_PREFIX, LOOKUP_PREFIX_LEN};
    use crate::services::cooldown::remaining_wait;
    use crate::services::credentials::{AuthenticatedClient, IssueError, IssuedKey};
    use crate::services::ledger::{DebitError, DebitReceipt};
    use crate::services::usage::UsageLog;
    use crate::services::verifier::VerifierError;

    const TEST_KEY: &str = "vl_live_0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    fn test_account(credits: i64) -> Account {
        Account {
            id: Uuid::new_v4(),
            email: "ops@lawfirm.example".to_string(),
            credits,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    /// Credential store over a fixed key -> client map, counting lookups
    /// so tests can assert the format gate runs before any store access.
    struct FakeCredentials {
        clients: HashMap<String, AuthenticatedClient>,
        lookups: AtomicI64,
    }

    impl FakeCredentials {
        fn single(key: &str, client: AuthenticatedClient) -> Self {
            let mut clients = HashMap::new();
            clients.insert(key.to_string(), client);
            Self {
                clients,
                lookups: AtomicI64::new(0),
            }
        }
    }

    #[async_trait]
    impl CredentialStore for FakeCredentials {
        async fn issue(&self, _account_id: Uuid, _regenerate: bool) -> Result<IssuedKey, IssueError> {
            unimplemented!("not exercised by pipeline tests")
        }

        async fn authenticate(&self, presented: &str) -> Result<AuthenticatedClient, AuthError> {
            if !presented.starts_with(KEY_PREFIX) || presented.len() < LOOKUP_PREFIX_LEN {
                return Err(AuthError::BadFormat);
            }
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.clients
                .get(presented)
                .cloned()
                .ok_or(AuthError::InvalidKey)
        }

        async fn get_credential(
            &self,
            _credential_id: Uuid,
        ) -> Result<Option<ApiCredential>, sqlx::Error> {
            Ok(None)
        }
    }

    /// Cooldown tracker with a manually advanced clock.
    struct FakeCooldowns {
        now: AtomicI64,
        entries: Mutex<HashMap<(Uuid, String), i64>>,
    }

    impl FakeCooldowns {
        fn new() -> Self {
            Self {
                now: AtomicI64::new(1_000),
                entries: Mutex::new(HashMap::new()),
            }
        }

        fn advance(&self, seconds: i64) {
            self.now.fetch_add(seconds, Ordering::SeqCst);
        }

        fn committed_at(&self, account_id: Uuid, endpoint: &str) -> Option<i64> {
            self.entries
                .lock()
                .unwrap()
                .get(&(account_id, endpoint.to_string()))
                .copied()
        }
    }

    #[async_trait]
    impl CooldownTracker for FakeCooldowns {
        async fn check(
            &self,
            account_id: Uuid,
            endpoint: &str,
            window_seconds: i64,
        ) -> CooldownStatus {
            let now = self.now.load(Ordering::SeqCst);
            let last = self.committed_at(account_id, endpoint);
            match last.and_then(|ts| remaining_wait(ts, now, window_seconds)) {
                Some(retry_after) => CooldownStatus::Cooling { retry_after },
                None => CooldownStatus::Ready,
            }
        }

        async fn commit(&self, account_id: Uuid, endpoint: &str, _window_seconds: i64) {
            let now = self.now.load(Ordering::SeqCst);
            self.entries
                .lock()
                .unwrap()
                .insert((account_id, endpoint.to_string()), now);
        }
    }

    #[derive(Default)]
    struct FakeCache {
        entries: Mutex<HashMap<(Uuid, String), Value>>,
    }

    #[async_trait]
    impl ResultCache for FakeCache {
        async fn lookup(&self, account_id: Uuid, hash: &str) -> Option<Value> {
            self.entries
                .lock()
                .unwrap()
                .get(&(account_id, hash.to_string()))
                .cloned()
        }

        async fn store(&self, account_id: Uuid, hash: &str, payload: &Value, _ttl_days: i64) {
            self.entries
                .lock()
                .unwrap()
                .insert((account_id, hash.to_string()), payload.clone());
        }

        async fn sweep_expired(&self) -> Result<u64, sqlx::Error> {
            Ok(0)
        }
    }

    /// In-memory ledger recording every debit, with an optional forced
    /// failure to simulate a settle-time fault.
    struct FakeLedger {
        balances: Mutex<HashMap<Uuid, i64>>,
        debits: Mutex<Vec<(Uuid, i64, String)>>,
        fail_debits: bool,
    }

    impl FakeLedger {
        fn empty() -> Self {
            Self {
                balances: Mutex::new(HashMap::new()),
                debits: Mutex::new(Vec::new()),
                fail_debits: false,
            }
        }

        fn balance_of(&self, account_id: Uuid) -> i64 {
            *self.balances.lock().unwrap().get(&account_id).unwrap_or(&0)
        }

        fn debit_count(&self) -> usize {
            self.debits.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl CreditLedger for FakeLedger {
        async fn has_sufficient(&self, account_id: Uuid, amount: i64) -> Result<bool, sqlx::Error> {
            Ok(self.balance_of(account_id) >= amount)
        }

        async fn debit(
            &self,
            account_id: Uuid,
            _credential_id: Uuid,
            amount: i64,
            description: &str,
        ) -> Result<DebitReceipt, DebitError> {
            if self.fail_debits {
                return Err(DebitError::Database(sqlx::Error::PoolClosed));
            }
            let mut balances = self.balances.lock().unwrap();
            let balance = balances.get(&account_id).copied().ok_or(DebitError::AccountNotFound)?;
            if balance < amount {
                return Err(DebitError::InsufficientFunds { balance });
            }
            let new_balance = balance - amount;
            balances.insert(account_id, new_balance);
            self.debits
                .lock()
                .unwrap()
                .push((account_id, amount, description.to_string()));
            Ok(DebitReceipt {
                transaction_id: Uuid::new_v4(),
                new_balance,
            })
        }
    }

    #[derive(Default)]
    struct FakeUsage {
        entries: Mutex<Vec<UsageEntry>>,
    }

    impl FakeUsage {
        fn records(&self) -> Vec<UsageEntry> {
            self.entries.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl UsageLog for FakeUsage {
        async fn record(&self, entry: UsageEntry) {
            self.entries.lock().unwrap().push(entry);
        }

        async fn list(
            &self,
            _credential_id: Uuid,
            _filter: &crate::models::usage::UsageFilter,
        ) -> Result<(Vec<crate::models::usage::UsageRecord>, i64), sqlx::Error> {
            Ok((Vec::new(), 0))
        }

        async fn stats_since(
            &self,
            _credential_id: Uuid,
            _since: DateTime<Utc>,
        ) -> Result<crate::models::account::UsageStats, sqlx::Error> {
            Ok(crate::models::account::UsageStats::default())
        }
    }

    /// Verifier with a scripted outcome.
    enum Script {
        Match(Value),
        NoMatch(String),
        Fail,
    }

    struct FakeVerifier {
        script: Script,
        calls: AtomicI64,
    }

    impl FakeVerifier {
        fn matching(data: Value) -> Self {
            Self {
                script: Script::Match(data),
                calls: AtomicI64::new(0),
            }
        }

        fn not_found() -> Self {
            Self {
                script: Script::NoMatch("User not found or does not exist".to_string()),
                calls: AtomicI64::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                script: Script::Fail,
                calls: AtomicI64::new(0),
            }
        }

        fn call_count(&self) -> i64 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Verifier for FakeVerifier {
        async fn lookup(&self, _query: &VerificationQuery) -> Result<LookupOutcome, VerifierError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.script {
                Script::Match(data) => Ok(LookupOutcome::Match(data.clone())),
                Script::NoMatch(message) => Ok(LookupOutcome::NoMatch(message.clone())),
                Script::Fail => Err(VerifierError("upstream unreachable".to_string())),
            }
        }
    }

    struct Harness {
        pipeline: Pipeline,
        credentials: Arc<FakeCredentials>,
        cooldowns: Arc<FakeCooldowns>,
        ledger: Arc<FakeLedger>,
        usage: Arc<FakeUsage>,
        verifier: Arc<FakeVerifier>,
        account_id: Uuid,
    }

    fn test_config() -> PipelineConfig {
        PipelineConfig {
            exact: EndpointPolicy {
                credit_cost: 100,
                cooldown_seconds: 5,
            },
            smart: EndpointPolicy {
                credit_cost: 100,
                cooldown_seconds: 30,
            },
            cache_ttl_days: 30,
            verify_timeout: Duration::from_secs(5),
        }
    }

    fn harness_with(credits: i64, verifier: FakeVerifier, ledger: FakeLedger) -> Harness {
        let account = test_account(credits);
        let account_id = account.id;
        ledger.balances.lock().unwrap().insert(account_id, credits);

        let client = AuthenticatedClient {
            credential_id: Uuid::new_v4(),
            account,
        };

        let credentials = Arc::new(FakeCredentials::single(TEST_KEY, client));
        let cooldowns = Arc::new(FakeCooldowns::new());
        let cache = Arc::new(FakeCache::default());
        let ledger = Arc::new(ledger);
        let usage = Arc::new(FakeUsage::default());
        let verifier = Arc::new(verifier);

        let pipeline = Pipeline::new(
            credentials.clone(),
            cooldowns.clone(),
            cache,
            ledger.clone(),
            usage.clone(),
            verifier.clone(),
            test_config(),
        );

        Harness {
            pipeline,
            credentials,
            cooldowns,
            ledger,
            usage,
            verifier,
            account_id,
        }
    }

    fn harness(credits: i64) -> Harness {
        harness_with(
            credits,
            FakeVerifier::matching(json!({ "user": { "username": "Alice" } })),
            FakeLedger::empty(),
        )
    }

    fn ctx() -> RequestContext {
        RequestContext::new(Some(TEST_KEY.to_string()), Some("203.0.113.9".to_string()), None)
    }

    fn exact_body(username: &str) -> Value {
        json!({ "username": username })
    }

    #[tokio::test]
    async fn billed_call_charges_and_commits_cooldown() {
        let h = harness(1_000);

        let admitted = h
            .pipeline
            .admit(VerifyEndpoint::Exact, exact_body("Alice"), &ctx())
            .await
            .expect("should be admitted");

        assert!(!admitted.from_cache);
        assert_eq!(admitted.credits_used, 100);
        assert_eq!(admitted.current_balance, Some(900));
        assert_eq!(h.ledger.balance_of(h.account_id), 900);
        assert!(h.cooldowns.committed_at(h.account_id, "exact_verify").is_some());

        let records = h.usage.records();
        assert_eq!(records.len(), 1);
        assert!(records[0].was_successful);
        assert!(!records[0].was_duplicate);
        assert_eq!(records[0].credits_used, 100);
    }

    #[tokio::test]
    async fn second_identical_call_is_cached_free_and_skips_cooldown_reset() {
        let h = harness(1_000);

        h.pipeline
            .admit(VerifyEndpoint::Exact, exact_body("Alice"), &ctx())
            .await
            .expect("first call admitted");
        let first_commit = h
            .cooldowns
            .committed_at(h.account_id, "exact_verify")
            .expect("cooldown committed");

        // Past the window so the rate limit cannot interfere.
        h.cooldowns.advance(10);

        let second = h
            .pipeline
            .admit(VerifyEndpoint::Exact, exact_body("Alice"), &ctx())
            .await
            .expect("second call admitted from cache");

        assert!(second.from_cache);
        assert_eq!(second.credits_used, 0);
        assert_eq!(second.current_balance, None);
        // Only the first call was billed or consumed the window.
        assert_eq!(h.ledger.debit_count(), 1);
        assert_eq!(
            h.cooldowns.committed_at(h.account_id, "exact_verify"),
            Some(first_commit)
        );
        // One verifier call total; the cache answered the second.
        assert_eq!(h.verifier.call_count(), 1);

        let records = h.usage.records();
        assert_eq!(records.len(), 2);
        assert!(records[1].was_duplicate);
        assert!(records[1].was_successful);
    }

    #[tokio::test]
    async fn cooldown_active_rejects_with_remaining_wait() {
        let h = harness(1_000);

        h.pipeline
            .admit(VerifyEndpoint::Exact, exact_body("Alice"), &ctx())
            .await
            .expect("first call admitted");

        // 3 of 5 seconds elapsed; a different username avoids the cache.
        h.cooldowns.advance(3);
        let denial = h
            .pipeline
            .admit(VerifyEndpoint::Exact, exact_body("Bob"), &ctx())
            .await
            .expect_err("should be rate limited");

        match denial {
            Denial::RateLimited { retry_after } => assert_eq!(retry_after, 2),
            other => panic!("expected RateLimited, got {other:?}"),
        }
        // Nothing was charged for the rejected attempt.
        assert_eq!(h.ledger.debit_count(), 1);

        // At exactly T+W the caller is eligible again.
        h.cooldowns.advance(2);
        h.pipeline
            .admit(VerifyEndpoint::Exact, exact_body("Bob"), &ctx())
            .await
            .expect("window elapsed, admitted");
    }

    #[tokio::test]
    async fn balance_scenario_exact_cached_then_smart_rejected() {
        let h = harness(100);

        // First exact call for Alice: charged 100, balance drops to 0.
        let first = h
            .pipeline
            .admit(VerifyEndpoint::Exact, exact_body("Alice"), &ctx())
            .await
            .expect("first exact admitted");
        assert_eq!(first.credits_used, 100);
        assert_eq!(h.ledger.balance_of(h.account_id), 0);

        h.cooldowns.advance(10);

        // Identical exact call: cached, free, balance still 0.
        let second = h
            .pipeline
            .admit(VerifyEndpoint::Exact, exact_body("Alice"), &ctx())
            .await
            .expect("second exact served from cache");
        assert!(second.from_cache);
        assert_eq!(h.ledger.balance_of(h.account_id), 0);

        // Smart call for the same username: different endpoint
        // discriminator, so it is a cache miss and dies at BALANCE_CHECK.
        let denial = h
            .pipeline
            .admit(VerifyEndpoint::Smart, exact_body("Alice"), &ctx())
            .await
            .expect_err("smart call should fail the balance check");
        match denial {
            Denial::InsufficientCredits { required, .. } => assert_eq!(required, 100),
            other => panic!("expected InsufficientCredits, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_match_is_uncharged_and_keeps_cooldown_open() {
        let h = harness_with(
            500,
            FakeVerifier::not_found(),
            FakeLedger::empty(),
        );

        let denial = h
            .pipeline
            .admit(VerifyEndpoint::Exact, exact_body("Nobody"), &ctx())
            .await
            .expect_err("should be a no-match");

        assert!(matches!(denial, Denial::NoMatch { .. }));
        // No debit, no ledger entry, no cooldown consumed.
        assert_eq!(h.ledger.debit_count(), 0);
        assert_eq!(h.ledger.balance_of(h.account_id), 500);
        assert!(h.cooldowns.committed_at(h.account_id, "exact_verify").is_none());

        let records = h.usage.records();
        assert_eq!(records.len(), 1);
        assert!(!records[0].was_successful);
        assert_eq!(records[0].credits_used, 0);
    }

    #[tokio::test]
    async fn bad_key_format_is_rejected_before_any_store_lookup() {
        let h = harness(1_000);

        let bad_ctx = RequestContext::new(Some("sk_test_wrongprefix".to_string()), None, None);
        let denial = h
            .pipeline
            .admit(VerifyEndpoint::Exact, exact_body("Alice"), &bad_ctx)
            .await
            .expect_err("bad format must be rejected");

        assert!(matches!(denial, Denial::Unauthorized { .. }));
        assert_eq!(h.credentials.lookups.load(Ordering::SeqCst), 0);
        // The attempt is still logged, with no credential attached.
        let records = h.usage.records();
        assert_eq!(records.len(), 1);
        assert!(records[0].credential_id.is_none());
    }

    #[tokio::test]
    async fn validation_failure_returns_field_details() {
        let h = harness(1_000);

        let denial = h
            .pipeline
            .admit(VerifyEndpoint::Exact, json!({ "username": "" }), &ctx())
            .await
            .expect_err("empty username must fail validation");

        match denial {
            Denial::Invalid { details } => {
                assert!(details.get("username").is_some());
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
        assert_eq!(h.verifier.call_count(), 0);
    }

    #[tokio::test]
    async fn provider_failure_is_internal_and_uncharged() {
        let h = harness_with(1_000, FakeVerifier::failing(), FakeLedger::empty());

        let denial = h
            .pipeline
            .admit(VerifyEndpoint::Exact, exact_body("Alice"), &ctx())
            .await
            .expect_err("provider failure must deny the request");

        assert!(matches!(denial, Denial::Internal { .. }));
        assert_eq!(h.ledger.debit_count(), 0);
        assert_eq!(h.ledger.balance_of(h.account_id), 1_000);
        assert!(h.cooldowns.committed_at(h.account_id, "exact_verify").is_none());
        let records = h.usage.records();
        assert_eq!(records.len(), 1);
        assert!(!records[0].was_successful);
    }

    #[tokio::test]
    async fn settle_failure_is_internal_and_logged_as_hard_failure() {
        let mut ledger = FakeLedger::empty();
        ledger.fail_debits = true;
        let h = harness_with(
            1_000,
            FakeVerifier::matching(json!({ "user": {} })),
            ledger,
        );

        let denial = h
            .pipeline
            .admit(VerifyEndpoint::Exact, exact_body("Alice"), &ctx())
            .await
            .expect_err("debit failure must deny the request");

        assert!(matches!(denial, Denial::Internal { .. }));
        // The verification ran, but the cooldown was never committed and
        // the attempt is logged unsuccessful.
        assert_eq!(h.verifier.call_count(), 1);
        assert!(h.cooldowns.committed_at(h.account_id, "exact_verify").is_none());
        let records = h.usage.records();
        assert_eq!(records.len(), 1);
        assert!(!records[0].was_successful);
    }

    #[tokio::test]
    async fn every_exit_path_writes_exactly_one_usage_record() {
        let h = harness(1_000);

        // Missing key.
        let no_key = RequestContext::new(None, None, None);
        let _ = h
            .pipeline
            .admit(VerifyEndpoint::Exact, exact_body("Alice"), &no_key)
            .await;
        assert_eq!(h.usage.records().len(), 1);
        assert_eq!(h.usage.records()[0].request_id, no_key.request_id);

        // Validation failure.
        let c = ctx();
        let _ = h
            .pipeline
            .admit(VerifyEndpoint::Exact, json!({}), &c)
            .await;
        assert_eq!(h.usage.records().len(), 2);
        assert_eq!(h.usage.records()[1].request_id, c.request_id);

        // Success.
        let c = ctx();
        let _ = h
            .pipeline
            .admit(VerifyEndpoint::Exact, exact_body("Alice"), &c)
            .await;
        assert_eq!(h.usage.records().len(), 3);
        assert_eq!(h.usage.records()[2].request_id, c.request_id);

        // Rate limited.
        let c = ctx();
        let _ = h
            .pipeline
            .admit(VerifyEndpoint::Exact, exact_body("Bob"), &c)
            .await;
        assert_eq!(h.usage.records().len(), 4);
        assert_eq!(h.usage.records()[3].request_id, c.request_id);
    }
}
