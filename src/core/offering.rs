//! Offering business logic - Creating offerings and moving them through their
//! status lifecycle.

use crate::{
    core::{batch, validate_amount},
    entities::{
        Offering,
        offering::{self, ClassFormat, ClassSize, DeliveryMode, DurationType, OfferingStatus},
    },
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{Set, TransactionTrait, prelude::*};
use serde::Deserialize;
use tracing::{info, instrument};

/// Fields a tutor supplies when authoring an offering.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOffering {
    pub tutor_id: String,
    pub title: String,
    pub subject: String,
    pub delivery_mode: DeliveryMode,
    pub format: ClassFormat,
    pub size: ClassSize,
    pub duration_type: DurationType,
    pub price: f64,
    #[serde(default)]
    pub monthly_charge: Option<f64>,
    pub currency: String,
    pub max_participants: i32,
}

fn invalid_input(message: impl Into<String>) -> Error {
    Error::InvalidInput {
        message: message.into(),
    }
}

/// Creates a draft offering at batch 1 together with its batch-1 snapshot.
///
/// Validates that title, subject and currency are present, amounts are non-negative
/// and finite, and capacity fits the class size (one-on-one means one participant).
#[instrument(skip(db, new), fields(tutor_id = %new.tutor_id))]
pub async fn create_offering(db: &DatabaseConnection, new: NewOffering) -> Result<offering::Model> {
    if new.tutor_id.trim().is_empty() {
        return Err(invalid_input("Tutor id cannot be empty"));
    }
    if new.title.trim().is_empty() {
        return Err(invalid_input("Offering title cannot be empty"));
    }
    if new.subject.trim().is_empty() {
        return Err(invalid_input("Offering subject cannot be empty"));
    }
    if new.currency.trim().is_empty() {
        return Err(invalid_input("Currency cannot be empty"));
    }
    validate_amount(new.price, true)?;
    if let Some(charge) = new.monthly_charge {
        validate_amount(charge, true)?;
    }
    if new.max_participants < 1 {
        return Err(invalid_input("An offering needs room for at least one participant"));
    }
    if new.size == ClassSize::OneOnOne && new.max_participants != 1 {
        return Err(invalid_input("One-on-one offerings take exactly one participant"));
    }

    let now = Utc::now();
    let txn = db.begin().await?;

    let model = offering::ActiveModel {
        tutor_id: Set(new.tutor_id),
        title: Set(new.title.trim().to_string()),
        subject: Set(new.subject.trim().to_string()),
        delivery_mode: Set(new.delivery_mode),
        format: Set(new.format),
        size: Set(new.size),
        duration_type: Set(new.duration_type),
        price: Set(new.price),
        monthly_charge: Set(new.monthly_charge),
        currency: Set(new.currency.trim().to_uppercase()),
        max_participants: Set(new.max_participants),
        status: Set(OfferingStatus::Draft),
        batch_number: Set(1),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    batch::insert_batch_snapshot(&txn, &model).await?;
    txn.commit().await?;

    info!(offering_id = model.id, "Offering created");
    Ok(model)
}

/// Finds an offering by id.
pub async fn get_offering(
    db: &DatabaseConnection,
    offering_id: i64,
) -> Result<Option<offering::Model>> {
    Offering::find_by_id(offering_id)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Loads an offering or fails with `OfferingNotFound`.
pub async fn require_offering<C>(db: &C, offering_id: i64) -> Result<offering::Model>
where
    C: ConnectionTrait,
{
    Offering::find_by_id(offering_id)
        .one(db)
        .await?
        .ok_or(Error::OfferingNotFound { offering_id })
}

/// Fails with `NotOwner` unless `user_id` authored the offering.
pub fn ensure_owner(offering: &offering::Model, user_id: &str) -> Result<()> {
    if offering.tutor_id == user_id {
        Ok(())
    } else {
        Err(Error::NotOwner {
            offering_id: offering.id,
            user_id: user_id.to_string(),
        })
    }
}

/// Moves an offering to a new status following the transition table.
///
/// Requesting the status the offering already has is a no-op.
#[instrument(skip(db))]
pub async fn set_offering_status(
    db: &DatabaseConnection,
    offering_id: i64,
    tutor_id: &str,
    status: OfferingStatus,
) -> Result<offering::Model> {
    let offering = require_offering(db, offering_id).await?;
    ensure_owner(&offering, tutor_id)?;

    if offering.status == status {
        return Ok(offering);
    }
    if !offering.status.can_transition_to(status) {
        return Err(Error::InvalidTransition {
            entity: "offering",
            from: offering.status.to_value(),
            to: status.to_value(),
        });
    }

    let previous = offering.status;
    let mut active: offering::ActiveModel = offering.into();
    active.status = Set(status);
    active.updated_at = Set(Utc::now());
    let updated = active.update(db).await?;

    info!(offering_id, from = ?previous, to = ?status, "Offering status changed");
    Ok(updated)
}
