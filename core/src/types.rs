//! Shared primitive types used across the entire ledger.

/// A monetary amount in minor units (cents). Never a float.
pub type Amount = i64;

/// Stable identifier of a card.
pub type CardId = String;

/// Stable identifier of the user who owns a card.
pub type UserId = String;

/// Stable identifier of a billing statement.
pub type StatementId = String;

/// Caller-visible payment identifier. Doubles as the webhook idempotency key.
pub type PaymentId = String;
