//! Payment reconciliation entity - One row per external payment-completion signal.
//!
//! `external_session_id` is unique; it is the idempotency key for the reconciler.
//! `enrollment_completed` only ever goes from false to true.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Processing state of a reconciliation record
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "completed")]
    Completed,
}

/// Payment reconciliation database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payment_reconciliations")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub external_session_id: String,
    pub offering_id: i64,
    pub participant_id: String,
    pub amount: f64,
    pub currency: String,
    /// Checkout intent the payment was started from, when the provider echoes it back
    pub checkout_ref: Option<String>,
    pub enrollment_completed: bool,
    pub enrollment_id: Option<i64>,
    pub status: ReconciliationStatus,
    /// Number of times the signal has been processed
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

/// Reconciliation records are a log keyed by the provider; no enforced relations
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
