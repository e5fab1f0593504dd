//! Notification event entity - Outbox rows for the external notification dispatcher.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Kind of event emitted by the core
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    #[sea_orm(string_value = "enrollment_created")]
    EnrollmentCreated,
    #[sea_orm(string_value = "session_reminder_due")]
    SessionReminderDue,
}

/// Notification event database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "notification_events")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub kind: NotificationKind,
    /// Makes emission idempotent; a second insert with the same key is dropped
    #[sea_orm(unique)]
    pub dedupe_key: String,
    pub offering_id: i64,
    pub participant_id: String,
    pub enrollment_id: Option<i64>,
    pub session_id: Option<i64>,
    /// When the thing the event is about happens (session start, enrollment time)
    pub occurs_at: DateTimeUtc,
    pub created_at: DateTimeUtc,
    pub dispatched_at: Option<DateTimeUtc>,
}

/// `NotificationEvent` has no enforced relationships
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
