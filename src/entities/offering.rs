//! Offering entity - A tutor-authored class product.
//!
//! The offering row carries the *current* batch number. Every dependent row
//! (batches, schedule plans, sessions, enrollments) is addressed by
//! `(offering_id, batch_number)`, so bumping the counter never touches history.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Lifecycle status of an offering
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum OfferingStatus {
    /// Being authored, not visible for enrollment
    #[sea_orm(string_value = "draft")]
    Draft,
    /// Published and accepting enrollments
    #[sea_orm(string_value = "active")]
    Active,
    /// Sessions are under way; still accepting enrollments
    #[sea_orm(string_value = "running")]
    Running,
    /// Temporarily withdrawn
    #[sea_orm(string_value = "inactive")]
    Inactive,
    /// Finished; can only be reopened by a re-run
    #[sea_orm(string_value = "completed")]
    Completed,
}

impl OfferingStatus {
    /// Transition table for manual status changes.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Draft, Self::Active)
                | (Self::Active, Self::Running | Self::Inactive | Self::Completed)
                | (Self::Running, Self::Inactive | Self::Completed)
                | (Self::Inactive, Self::Active)
        )
    }

    /// Whether enrollments may be created while in this status
    #[must_use]
    pub const fn accepts_enrollments(self) -> bool {
        matches!(self, Self::Active | Self::Running)
    }
}

/// Where the class takes place
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    #[sea_orm(string_value = "online")]
    Online,
    #[sea_orm(string_value = "offline")]
    Offline,
}

/// How the class is delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum ClassFormat {
    #[sea_orm(string_value = "live")]
    Live,
    #[sea_orm(string_value = "recorded")]
    Recorded,
    #[sea_orm(string_value = "inbound")]
    Inbound,
    #[sea_orm(string_value = "outbound")]
    Outbound,
}

/// Group class or one-on-one
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum ClassSize {
    #[sea_orm(string_value = "group")]
    Group,
    #[sea_orm(string_value = "one_on_one")]
    OneOnOne,
}

/// Recurring (charged monthly) or fixed-duration course
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum DurationType {
    #[sea_orm(string_value = "recurring")]
    Recurring,
    #[sea_orm(string_value = "fixed")]
    Fixed,
}

/// Offering database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "offerings")]
pub struct Model {
    /// Unique identifier for the offering
    #[sea_orm(primary_key)]
    pub id: i64,
    /// User id of the tutor who owns the offering
    pub tutor_id: String,
    pub title: String,
    pub subject: String,
    pub delivery_mode: DeliveryMode,
    pub format: ClassFormat,
    pub size: ClassSize,
    pub duration_type: DurationType,
    /// One-off price
    pub price: f64,
    /// Monthly charge for recurring offerings
    pub monthly_charge: Option<f64>,
    /// Currency tag carried through to enrollments; never converted
    pub currency: String,
    pub max_participants: i32,
    pub status: OfferingStatus,
    /// Current batch number, starts at 1 and only ever increases
    pub batch_number: i32,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

impl Model {
    /// Amount charged to join the current batch.
    #[must_use]
    pub fn enrollment_amount(&self) -> f64 {
        match (self.duration_type, self.monthly_charge) {
            (DurationType::Recurring, Some(charge)) => charge,
            _ => self.price,
        }
    }
}

/// Defines relationships between Offering and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One offering has many batches
    #[sea_orm(has_many = "super::batch::Entity")]
    Batches,
    /// One offering has many session instances
    #[sea_orm(has_many = "super::session_instance::Entity")]
    Sessions,
    /// One offering has many enrollments
    #[sea_orm(has_many = "super::enrollment::Entity")]
    Enrollments,
}

impl Related<super::batch::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Batches.def()
    }
}

impl Related<super::session_instance::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Sessions.def()
    }
}

impl Related<super::enrollment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Enrollments.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
