//! Credit ledger transaction type tags.
//!
//! Every credit movement is recorded as an append-only row in
//! `credit_transactions`, including zero-delta administrative events such as
//! key generation. Rows are never mutated after creation, and
//! `balance_after = balance_before + credits_changed` always holds: the row
//! is inserted in the same database transaction as the balance update, so
//! the ledger can never disagree with the account.

/// Type tag for a billed verification debit.
pub const TX_DEBIT: &str = "debit";
/// Type tag for first-time key issuance (zero delta).
pub const TX_KEY_GENERATED: &str = "key_generated";
/// Type tag for key rotation (zero delta).
pub const TX_KEY_REGENERATED: &str = "key_regenerated";
