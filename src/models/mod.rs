//! Data models representing database entities.
//!
//! This module contains all data structures that map to database tables,
//! plus the request/response types for the verification endpoints.

/// Billable customer account model
pub mod account;
/// API credential (bearer key) model
pub mod credential;
/// Append-only credit ledger transaction model
pub mod transaction;
/// API usage audit log model
pub mod usage;
/// Verification request schemas and response envelopes
pub mod verify;
