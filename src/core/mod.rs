//! Core business logic - framework-agnostic scheduling, batching, enrollment and
//! payment reconciliation.
//!
//! Functions that need several writes to land together open their own transaction
//! and take `&DatabaseConnection`; the building blocks they compose are generic over
//! `ConnectionTrait` so they run equally on a connection or inside a transaction.

/// Batch versioning: current batch reads and re-runs
pub mod batch;
/// Checkout intents handed to the payment provider
pub mod checkout;
/// Enrollment ledger and its state machine
pub mod enrollment;
/// Notification outbox
pub mod notify;
/// Offering creation and status management
pub mod offering;
/// Idempotent payment reconciliation
pub mod reconcile;
/// Schedule expansion and session materialisation
pub mod schedule;
/// Session status lifecycle and reminders
pub mod session;
/// Guardian spending limits
pub mod spending;

use sea_orm::{DbErr, SqlErr};

/// Whether a database error came from a UNIQUE constraint.
pub(crate) fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

/// Rejects amounts that are not finite or are below zero (or zero, unless allowed).
pub(crate) fn validate_amount(amount: f64, allow_zero: bool) -> crate::errors::Result<()> {
    let valid = amount.is_finite() && (amount > 0.0 || (allow_zero && amount == 0.0));
    if valid {
        Ok(())
    } else {
        Err(crate::errors::Error::InvalidAmount { amount })
    }
}
