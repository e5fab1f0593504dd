//! Session instance entity - One concrete dated occurrence of a class batch.
//!
//! Generated by the schedule expander; afterwards only `status` changes.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Status of a single session
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[sea_orm(string_value = "upcoming")]
    Upcoming,
    #[sea_orm(string_value = "ongoing")]
    Ongoing,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl SessionStatus {
    /// Transition table: upcoming -> ongoing -> completed, cancellation before completion.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Upcoming, Self::Ongoing | Self::Cancelled)
                | (Self::Ongoing, Self::Completed | Self::Cancelled)
        )
    }
}

/// Session instance database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "session_instances")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub offering_id: i64,
    pub batch_number: i32,
    /// 1-based, contiguous within `(offering_id, batch_number)`
    pub sequence: i32,
    pub date: Date,
    pub start_time: Time,
    pub end_time: Time,
    pub status: SessionStatus,
}

/// Defines relationships between `SessionInstance` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each session belongs to one offering
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
