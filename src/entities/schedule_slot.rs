//! Schedule slot entity - One time-of-day window of a schedule plan.
//!
//! Weekly slots carry `day_of_week` (0 = Monday .. 6 = Sunday), monthly slots carry
//! `day_of_month` (1..=31), daily slots carry neither.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Schedule slot database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "schedule_slots")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub plan_id: i64,
    pub day_of_week: Option<i16>,
    pub day_of_month: Option<i16>,
    pub start_time: Time,
    pub end_time: Time,
}

/// Defines relationships between `ScheduleSlot` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each slot belongs to one plan
    #[sea_orm(
        belongs_to = "super::schedule_plan::Entity",
        from = "Column::PlanId",
        to = "super::schedule_plan::Column::Id",
        on_delete = "Cascade"
    )]
    Plan,
}

impl Related<super::schedule_plan::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Plan.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
