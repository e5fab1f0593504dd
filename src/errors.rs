//! Unified error types and result handling.
//!
//! Business conditions (stale batch, duplicate enrollment, spending limit, ...) are
//! ordinary variants rather than panics; every one of them is an expected, recoverable
//! outcome that the API layer turns into a rejected request with a readable reason.

use serde::Serialize;
use thiserror::Error;

/// Closed taxonomy of failure kinds, independent of the error payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Schedule plan failed validation
    InvalidSchedule,
    /// Sessions for the batch can no longer be regenerated
    ScheduleLocked,
    /// Caller does not own the offering
    NotOwner,
    /// Offering id is unknown
    OfferingNotFound,
    /// Batch number is not the offering's current batch
    StaleBatch,
    /// Payment was not confirmed by the provider
    PaymentNotConfirmed,
    /// Participant already holds a live enrollment in the batch
    DuplicateEnrollment,
    /// Guardian spending limit would be exceeded
    LimitExceeded,
    /// Amount is zero, negative or not finite
    InvalidAmount,
    /// Request field failed validation
    InvalidInput,
    /// Enrollment id is unknown
    EnrollmentNotFound,
    /// Session id is unknown
    SessionNotFound,
    /// Requested state change is not in the transition table
    InvalidTransition,
    /// Batch is not accepting enrollments yet
    BatchNotOpen,
    /// Batch has reached its participant cap
    BatchFull,
    /// Checkout reference is unknown
    CheckoutNotFound,
    /// Redelivered payment signal disagrees with the stored record
    ReconciliationMismatch,
    /// Infrastructure failure (database, configuration, I/O)
    Internal,
}

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid schedule: {reason}")]
    InvalidSchedule { reason: String },

    #[error("Schedule for offering {offering_id} batch {batch_number} is locked")]
    ScheduleLocked { offering_id: i64, batch_number: i32 },

    #[error("User {user_id} does not own offering {offering_id}")]
    NotOwner { offering_id: i64, user_id: String },

    #[error("Offering not found: {offering_id}")]
    OfferingNotFound { offering_id: i64 },

    #[error("Batch {requested} is stale; offering is on batch {current}")]
    StaleBatch { requested: i32, current: i32 },

    #[error("Payment for session '{external_session_id}' is not confirmed")]
    PaymentNotConfirmed { external_session_id: String },

    #[error("Participant {participant_id} is already enrolled in offering {offering_id} batch {batch_number}")]
    DuplicateEnrollment {
        participant_id: String,
        offering_id: i64,
        batch_number: i32,
    },

    #[error("Spending limit exceeded: limit {limit:.2}, committed {committed:.2}, proposed {proposed:.2}")]
    LimitExceeded {
        limit: f64,
        committed: f64,
        proposed: f64,
    },

    #[error("Invalid amount: {amount}")]
    InvalidAmount { amount: f64 },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Enrollment not found: {enrollment_id}")]
    EnrollmentNotFound { enrollment_id: i64 },

    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: i64 },

    #[error("Cannot move {entity} from '{from}' to '{to}'")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("Offering {offering_id} batch {batch_number} is not open for enrollment: {reason}")]
    BatchNotOpen {
        offering_id: i64,
        batch_number: i32,
        reason: String,
    },

    #[error("Offering {offering_id} batch {batch_number} is full ({max_participants} participants)")]
    BatchFull {
        offering_id: i64,
        batch_number: i32,
        max_participants: i32,
    },

    #[error("Checkout not found: {checkout_ref}")]
    CheckoutNotFound { checkout_ref: String },

    #[error("Payment session '{external_session_id}' does not match its recorded target")]
    ReconciliationMismatch { external_session_id: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),

    #[error("Invalid bind address: {0}")]
    AddrParse(#[from] std::net::AddrParseError),
}

impl Error {
    /// Returns the taxonomy kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidSchedule { .. } => ErrorKind::InvalidSchedule,
            Self::ScheduleLocked { .. } => ErrorKind::ScheduleLocked,
            Self::NotOwner { .. } => ErrorKind::NotOwner,
            Self::OfferingNotFound { .. } => ErrorKind::OfferingNotFound,
            Self::StaleBatch { .. } => ErrorKind::StaleBatch,
            Self::PaymentNotConfirmed { .. } => ErrorKind::PaymentNotConfirmed,
            Self::DuplicateEnrollment { .. } => ErrorKind::DuplicateEnrollment,
            Self::LimitExceeded { .. } => ErrorKind::LimitExceeded,
            Self::InvalidAmount { .. } => ErrorKind::InvalidAmount,
            Self::InvalidInput { .. } => ErrorKind::InvalidInput,
            Self::EnrollmentNotFound { .. } => ErrorKind::EnrollmentNotFound,
            Self::SessionNotFound { .. } => ErrorKind::SessionNotFound,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::BatchNotOpen { .. } => ErrorKind::BatchNotOpen,
            Self::BatchFull { .. } => ErrorKind::BatchFull,
            Self::CheckoutNotFound { .. } => ErrorKind::CheckoutNotFound,
            Self::ReconciliationMismatch { .. } => ErrorKind::ReconciliationMismatch,
            Self::Config { .. }
            | Self::Database(_)
            | Self::Io(_)
            | Self::EnvVar(_)
            | Self::AddrParse(_) => ErrorKind::Internal,
        }
    }

    /// Whether redelivering the same payment signal later can succeed.
    ///
    /// Infrastructure failures and a batch that is not open yet may clear up on their
    /// own. A stale batch needs the participant to check out again against the new one.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Internal | ErrorKind::BatchNotOpen)
    }
}

/// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;
