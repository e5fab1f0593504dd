//! Batch business logic - Versioned re-runs of an offering.
//!
//! The offering row holds the current batch number. Opening a new batch bumps that
//! counter with a single atomic `UPDATE` and appends a metadata snapshot; rows tied
//! to earlier batch numbers (sessions, enrollments, snapshots) are never touched.

use crate::{
    core::offering,
    entities::{
        Batch, Offering, batch,
        offering::{Column as OfferingColumn, OfferingStatus},
    },
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{QueryOrder, QuerySelect, Set, TransactionTrait, prelude::*, sea_query::Expr};
use tracing::{info, instrument};

/// Reads the offering's current batch number in one statement.
///
/// Every operation that acts on "the current batch" resolves it through here once
/// and then carries the number explicitly.
pub async fn current_batch<C>(db: &C, offering_id: i64) -> Result<i32>
where
    C: ConnectionTrait,
{
    Offering::find_by_id(offering_id)
        .select_only()
        .column(OfferingColumn::BatchNumber)
        .into_tuple::<i32>()
        .one(db)
        .await?
        .ok_or(Error::OfferingNotFound { offering_id })
}

/// Records the metadata snapshot for the offering's current batch.
pub(crate) async fn insert_batch_snapshot<C>(
    db: &C,
    offering: &crate::entities::offering::Model,
) -> Result<batch::Model>
where
    C: ConnectionTrait,
{
    batch::ActiveModel {
        offering_id: Set(offering.id),
        batch_number: Set(offering.batch_number),
        title: Set(offering.title.clone()),
        price: Set(offering.price),
        monthly_charge: Set(offering.monthly_charge),
        currency: Set(offering.currency.clone()),
        max_participants: Set(offering.max_participants),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(Into::into)
}

/// Opens the next batch of an offering and returns its number.
///
/// The counter is incremented atomically (`batch_number = batch_number + 1`), the
/// offering's metadata is cloned into a new snapshot row, and a completed or
/// inactive offering is reopened as `active`. The new batch has no schedule yet, so
/// it accepts enrollments only after a plan is attached.
///
/// # Errors
/// `OfferingNotFound` for an unknown id, `NotOwner` if `tutor_id` is not the author.
#[instrument(skip(db))]
pub async fn create_next_batch(
    db: &DatabaseConnection,
    offering_id: i64,
    tutor_id: &str,
) -> Result<i32> {
    let txn = db.begin().await?;

    let existing = offering::require_offering(&txn, offering_id).await?;
    offering::ensure_owner(&existing, tutor_id)?;

    let mut update = Offering::update_many()
        .col_expr(
            OfferingColumn::BatchNumber,
            Expr::col(OfferingColumn::BatchNumber).add(1),
        )
        .col_expr(OfferingColumn::UpdatedAt, Expr::value(Utc::now()));
    if matches!(
        existing.status,
        OfferingStatus::Completed | OfferingStatus::Inactive
    ) {
        update = update.col_expr(
            OfferingColumn::Status,
            Expr::value(OfferingStatus::Active.to_value()),
        );
    }
    update
        .filter(OfferingColumn::Id.eq(offering_id))
        .exec(&txn)
        .await?;

    let updated = offering::require_offering(&txn, offering_id).await?;
    insert_batch_snapshot(&txn, &updated).await?;

    txn.commit().await?;

    info!(
        offering_id,
        previous_batch = existing.batch_number,
        batch_number = updated.batch_number,
        "Opened next batch"
    );
    Ok(updated.batch_number)
}

/// All batch snapshots of an offering, oldest first.
pub async fn list_batches(db: &DatabaseConnection, offering_id: i64) -> Result<Vec<batch::Model>> {
    Batch::find()
        .filter(batch::Column::OfferingId.eq(offering_id))
        .order_by_asc(batch::Column::BatchNumber)
        .all(db)
        .await
        .map_err(Into::into)
}

/// The snapshot of one batch, if it exists.
pub async fn get_batch(
    db: &DatabaseConnection,
    offering_id: i64,
    batch_number: i32,
) -> Result<Option<batch::Model>> {
    Batch::find()
        .filter(batch::Column::OfferingId.eq(offering_id))
        .filter(batch::Column::BatchNumber.eq(batch_number))
        .one(db)
        .await
        .map_err(Into::into)
}
