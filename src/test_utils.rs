//! Shared test utilities for `ClassBuddy`.
//!
//! This module provides common helper functions for setting up test databases
//! and creating offerings, schedules and enrollments with sensible defaults.

use crate::{
    core::{
        enrollment::{self, NewEnrollment},
        offering::{self, NewOffering},
        schedule::{self, PlanSpec, ScheduleLimits, TimeSlot},
    },
    entities::{
        self,
        offering::{ClassFormat, ClassSize, DeliveryMode, DurationType, OfferingStatus},
        schedule_plan::Frequency,
    },
    errors::Result,
};
use chrono::{NaiveDate, NaiveTime, Utc, Weekday};
use sea_orm::DatabaseConnection;

/// Tutor id that owns every offering created by these helpers
pub const TEST_TUTOR: &str = "tutor-1";

/// Schedule limits used when attaching plans in tests
pub const TEST_LIMITS: ScheduleLimits = ScheduleLimits::DEFAULT;

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all integration tests.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = sea_orm::Database::connect("sqlite::memory:").await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// Offering fields with sensible defaults.
///
/// # Defaults
/// * tutor: `TEST_TUTOR`
/// * group, live, online, fixed duration
/// * price: 100.0, no monthly charge
/// * currency: "usd" (stored upper-cased)
/// * `max_participants`: 10
pub fn test_new_offering() -> NewOffering {
    NewOffering {
        tutor_id: TEST_TUTOR.to_string(),
        title: "Algebra Foundations".to_string(),
        subject: "Mathematics".to_string(),
        delivery_mode: DeliveryMode::Online,
        format: ClassFormat::Live,
        size: ClassSize::Group,
        duration_type: DurationType::Fixed,
        price: 100.0,
        monthly_charge: None,
        currency: "usd".to_string(),
        max_participants: 10,
    }
}

/// An offering model that never touched a database, for pure unit tests.
pub fn sample_offering_model() -> entities::offering::Model {
    let now = Utc::now();
    entities::offering::Model {
        id: 1,
        tutor_id: TEST_TUTOR.to_string(),
        title: "Algebra Foundations".to_string(),
        subject: "Mathematics".to_string(),
        delivery_mode: DeliveryMode::Online,
        format: ClassFormat::Live,
        size: ClassSize::Group,
        duration_type: DurationType::Fixed,
        price: 100.0,
        monthly_charge: None,
        currency: "USD".to_string(),
        max_participants: 10,
        status: OfferingStatus::Draft,
        batch_number: 1,
        created_at: now,
        updated_at: now,
    }
}

/// Creates a draft offering at batch 1 from `test_new_offering`.
pub async fn create_test_offering(db: &DatabaseConnection) -> Result<entities::offering::Model> {
    offering::create_offering(db, test_new_offering()).await
}

/// Weekly Tuesday and Thursday, 16:00-17:00, 2024-01-02 through 2024-01-25.
/// Expands to 8 sessions.
#[allow(clippy::unwrap_used)]
pub fn tue_thu_plan() -> PlanSpec {
    let start = NaiveTime::from_hms_opt(16, 0, 0).unwrap();
    let end = NaiveTime::from_hms_opt(17, 0, 0).unwrap();
    PlanSpec {
        frequency: Frequency::Weekly,
        start_date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
        end_date: NaiveDate::from_ymd_opt(2024, 1, 25),
        max_instances: None,
        slots: vec![
            TimeSlot::weekly(Weekday::Tue, start, end),
            TimeSlot::weekly(Weekday::Thu, start, end),
        ],
    }
}

/// Creates an offering, schedules batch 1 with `tue_thu_plan` and publishes it.
async fn open_offering(
    db: &DatabaseConnection,
    new: NewOffering,
) -> Result<entities::offering::Model> {
    let created = offering::create_offering(db, new).await?;
    schedule::attach_schedule(db, created.id, 1, TEST_TUTOR, tue_thu_plan(), TEST_LIMITS).await?;
    offering::set_offering_status(db, created.id, TEST_TUTOR, OfferingStatus::Active).await
}

/// A fresh database holding one offering whose batch 1 accepts enrollments.
pub async fn setup_open_offering() -> Result<(DatabaseConnection, entities::offering::Model)> {
    let db = setup_test_db().await?;
    let offering = open_offering(&db, test_new_offering()).await?;
    Ok((db, offering))
}

/// Same as `setup_open_offering` with a custom participant cap.
pub async fn setup_open_offering_with_capacity(
    max_participants: i32,
) -> Result<(DatabaseConnection, entities::offering::Model)> {
    let db = setup_test_db().await?;
    let mut new = test_new_offering();
    new.max_participants = max_participants;
    let offering = open_offering(&db, new).await?;
    Ok((db, offering))
}

/// Same as `setup_open_offering` with a custom price.
pub async fn setup_open_offering_priced(
    price: f64,
) -> Result<(DatabaseConnection, entities::offering::Model)> {
    let db = setup_test_db().await?;
    let mut new = test_new_offering();
    new.price = price;
    let offering = open_offering(&db, new).await?;
    Ok((db, offering))
}

/// Creates a pending, unpaid enrollment without a guardian.
pub async fn create_test_enrollment(
    db: &DatabaseConnection,
    offering_id: i64,
    batch_number: i32,
    participant_id: &str,
) -> Result<entities::enrollment::Model> {
    enrollment::create_enrollment(
        db,
        NewEnrollment::unpaid(offering_id, batch_number, participant_id, None),
    )
    .await
}

/// Creates an enrollment and activates it.
pub async fn create_active_enrollment(
    db: &DatabaseConnection,
    offering_id: i64,
    batch_number: i32,
    participant_id: &str,
) -> Result<entities::enrollment::Model> {
    let created = create_test_enrollment(db, offering_id, batch_number, participant_id).await?;
    enrollment::activate_enrollment(db, created.id).await
}
