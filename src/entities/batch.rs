//! Batch entity - Snapshot of offering metadata taken when a batch is opened.
//!
//! Rows are append-only: a re-run inserts a new row and never edits older ones.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Batch database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "batches")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub offering_id: i64,
    pub batch_number: i32,
    /// Offering title at the time the batch was opened
    pub title: String,
    pub price: f64,
    pub monthly_charge: Option<f64>,
    pub currency: String,
    pub max_participants: i32,
    pub created_at: DateTimeUtc,
}

/// Defines relationships between Batch and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each batch belongs to one offering
    #[sea_orm(
        belongs_to = "super::offering::Entity",
        from = "Column::OfferingId",
        to = "super::offering::Column::Id"
    )]
    Offering,
}

impl Related<super::offering::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Offering.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
