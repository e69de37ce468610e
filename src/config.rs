//! Application configuration management.
//!
//! This module handles loading configuration from environment variables.
//! It uses the `envy` crate to automatically deserialize environment variables into a type-safe struct.

use serde::Deserialize;

/// Application configuration loaded from environment variables.
///
/// # Environment Variables
///
/// - `DATABASE_URL` (required): PostgreSQL connection string
/// - `REDIS_URL` (optional): Redis connection string for the cooldown store, defaults to `redis://127.0.0.1:6379`
/// - `SERVER_PORT` (optional): HTTP server port, defaults to 3000
/// - `EXACT_CREDIT_COST` / `SMART_CREDIT_COST` (optional): credits charged per billed call, default 100 each
/// - `EXACT_COOLDOWN_SECONDS` / `SMART_COOLDOWN_SECONDS` (optional): per-endpoint cooldown windows, default 5 / 30
/// - `CACHE_TTL_DAYS` (optional): verification result cache lifetime, default 30
/// - `VERIFY_TIMEOUT_SECONDS` (optional): hard timeout around the external verification call, default 10
///
/// Pricing and cooldowns are configuration rather than constants so the two
/// endpoint classes can be priced independently without a code change.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,

    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    #[serde(default = "default_port")]
    pub server_port: u16,

    #[serde(default = "default_credit_cost")]
    pub exact_credit_cost: i64,

    #[serde(default = "default_credit_cost")]
    pub smart_credit_cost: i64,

    #[serde(default = "default_exact_cooldown")]
    pub exact_cooldown_seconds: i64,

    #[serde(default = "default_smart_cooldown")]
    pub smart_cooldown_seconds: i64,

    #[serde(default = "default_cache_ttl_days")]
    pub cache_ttl_days: i64,

    #[serde(default = "default_verify_timeout")]
    pub verify_timeout_seconds: u64,
}

/// Default port if SERVER_PORT environment variable is not set.
fn default_port() -> u16 {
    3000
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_credit_cost() -> i64 {
    100
}

fn default_exact_cooldown() -> i64 {
    5
}

fn default_smart_cooldown() -> i64 {
    30
}

fn default_cache_ttl_days() -> i64 {
    30
}

fn default_verify_timeout() -> u64 {
    10
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// This method first attempts to load a `.env` file (which is optional),
    /// then reads environment variables and deserializes them into a Config struct.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Required environment variables are missing (e.g., DATABASE_URL)
    /// - Environment variable values cannot be parsed into expected types
    pub fn from_env() -> Result<Self, envy::Error> {
        // Try to load .env file if it exists (does nothing if not found)
        dotenvy::dotenv().ok();

        // Parse environment variables into Config struct
        // Field names are automatically converted: database_url -> DATABASE_URL
        envy::from_env::<Config>()
    }
}
