//! HTTP request handlers (route handlers).
//!
//! Each handler is an async function that:
//! 1. Receives HTTP request data (JSON body, URL params, etc.)
//! 2. Performs business logic (pipeline, services, database queries)
//! 3. Returns HTTP response (JSON, status code, headers)

/// Account info endpoint
pub mod account;
/// Health check endpoint
pub mod health;
/// API key issuance and rotation
pub mod keys;
/// Usage log listing
pub mod usage;
/// Credit-metered verification endpoints
pub mod verify;
