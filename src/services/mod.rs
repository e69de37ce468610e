//! Business logic services.
//!
//! Services contain core business logic separated from HTTP handlers.
//! Each admission-pipeline collaborator is defined as a trait with a
//! production implementation (PostgreSQL or Redis backed), so the pipeline
//! can be exercised against in-memory fakes in tests.

pub mod cache;
pub mod cooldown;
pub mod credentials;
pub mod ledger;
pub mod pipeline;
pub mod usage;
pub mod verifier;
