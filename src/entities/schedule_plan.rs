//! Schedule plan entity - The recurrence rule attached to one `(offering, batch)`.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Recurrence frequency of a schedule plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    #[sea_orm(string_value = "daily")]
    Daily,
    #[sea_orm(string_value = "weekly")]
    Weekly,
    #[sea_orm(string_value = "monthly")]
    Monthly,
}

/// Schedule plan database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "schedule_plans")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub offering_id: i64,
    pub batch_number: i32,
    pub frequency: Frequency,
    pub start_date: Date,
    pub end_date: Option<Date>,
    /// Occurrence cap that was applied when expanding
    pub max_instances: Option<i32>,
    pub created_at: DateTimeUtc,
}

/// Defines relationships between `SchedulePlan` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each plan belongs to one offering
    #[sea_orm(
        belongs_to = "super::offering::Entity",
        from = "Column::OfferingId",
        to = "super::offering::Column::Id"
    )]
    Offering,
    /// One plan has many time slots
    #[sea_orm(has_many = "super::schedule_slot::Entity")]
    Slots,
}

impl Related<super::offering::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Offering.def()
    }
}

impl Related<super::schedule_slot::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Slots.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
