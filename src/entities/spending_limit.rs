//! Spending limit entity - A guardian's cap on what may be spent for one dependent.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Window over which committed spending is summed
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum LimitPeriod {
    /// Only enrollments made in the current calendar month (UTC)
    #[sea_orm(string_value = "monthly")]
    Monthly,
    /// Every live enrollment regardless of date
    #[sea_orm(string_value = "lifetime")]
    Lifetime,
}

/// Spending limit database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "spending_limits")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub guardian_id: String,
    pub dependent_id: String,
    pub period: LimitPeriod,
    /// `None` means unlimited
    pub cap: Option<f64>,
    pub updated_at: DateTimeUtc,
}

/// `SpendingLimit` has no relationships with other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
