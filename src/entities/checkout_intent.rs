//! Checkout intent entity - Records a checkout handed to the payment provider.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Checkout intent database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "checkout_intents")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Opaque reference handed to the provider and echoed back on completion
    #[sea_orm(unique)]
    pub checkout_ref: String,
    pub offering_id: i64,
    /// Batch that was current when the checkout was priced
    pub batch_number: i32,
    pub participant_id: String,
    pub guardian_id: Option<String>,
    pub amount: f64,
    pub currency: String,
    pub created_at: DateTimeUtc,
}

/// Defines relationships between `CheckoutIntent` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each intent targets one offering
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
