//! Enrollment ledger - Records who joined which `(offering, batch)` and tracks the
//! enrollment state machine.
//!
//! ```text
//! pending -> active -> completed
//!    \         \
//!     +---------+--> cancelled
//! ```
//!
//! A participant holds at most one live (pending/active) enrollment per batch. The
//! in-code check gives a clean error; the partial unique index on
//! `(participant_id, offering_id, batch_number) WHERE status <> 'cancelled'` is what
//! actually guarantees it under concurrency.

use crate::{
    core::{is_unique_violation, notify, offering, validate_amount},
    entities::{
        Enrollment, SessionInstance,
        enrollment::{self, EnrollmentStatus, PaymentStatus},
        notification_event::NotificationKind,
        offering::Model as OfferingModel,
        session_instance,
    },
    errors::{Error, Result},
};
use chrono::{DateTime, Utc};
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*};
use tracing::{info, instrument};

/// Payment that backs an enrollment created by reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentDetails {
    pub amount: f64,
    pub external_session_id: String,
}

/// Request to create an enrollment in a specific batch.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEnrollment {
    pub offering_id: i64,
    pub batch_number: i32,
    pub participant_id: String,
    pub guardian_id: Option<String>,
    /// `Some` for paid enrollments, which start `active`; `None` starts `pending`
    pub payment: Option<PaymentDetails>,
}

impl NewEnrollment {
    /// An enrollment awaiting payment
    #[must_use]
    pub fn unpaid(
        offering_id: i64,
        batch_number: i32,
        participant_id: &str,
        guardian_id: Option<&str>,
    ) -> Self {
        Self {
            offering_id,
            batch_number,
            participant_id: participant_id.to_string(),
            guardian_id: guardian_id.map(str::to_string),
            payment: None,
        }
    }
}

/// Finds the participant's live enrollment in a batch, if any.
pub async fn find_live_enrollment<C>(
    db: &C,
    participant_id: &str,
    offering_id: i64,
    batch_number: i32,
) -> Result<Option<enrollment::Model>>
where
    C: ConnectionTrait,
{
    Enrollment::find()
        .filter(enrollment::Column::ParticipantId.eq(participant_id))
        .filter(enrollment::Column::OfferingId.eq(offering_id))
        .filter(enrollment::Column::BatchNumber.eq(batch_number))
        .filter(enrollment::Column::Status.ne(EnrollmentStatus::Cancelled))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Checks that the offering's current batch is taking enrollments.
///
/// The offering must be active or running and the batch must have had its schedule
/// expanded.
pub async fn ensure_batch_open<C>(db: &C, offering: &OfferingModel) -> Result<()>
where
    C: ConnectionTrait,
{
    if !offering.status.accepts_enrollments() {
        return Err(Error::BatchNotOpen {
            offering_id: offering.id,
            batch_number: offering.batch_number,
            reason: format!("offering is {}", offering.status.to_value()),
        });
    }

    let sessions = SessionInstance::find()
        .filter(session_instance::Column::OfferingId.eq(offering.id))
        .filter(session_instance::Column::BatchNumber.eq(offering.batch_number))
        .count(db)
        .await?;
    if sessions == 0 {
        return Err(Error::BatchNotOpen {
            offering_id: offering.id,
            batch_number: offering.batch_number,
            reason: "no sessions scheduled".to_string(),
        });
    }

    Ok(())
}

/// Inserts an enrollment on an existing connection or transaction.
///
/// Checks, in order: the offering exists, `batch_number` is the current batch, the
/// participant has no live enrollment in it, the batch is open, and it has room.
/// Emits an "enrollment created" event on the same connection.
pub async fn insert_enrollment<C>(
    db: &C,
    new: NewEnrollment,
    now: DateTime<Utc>,
) -> Result<enrollment::Model>
where
    C: ConnectionTrait,
{
    if new.participant_id.trim().is_empty() {
        return Err(Error::InvalidInput {
            message: "Participant id cannot be empty".to_string(),
        });
    }

    let offering = offering::require_offering(db, new.offering_id).await?;
    if new.batch_number != offering.batch_number {
        return Err(Error::StaleBatch {
            requested: new.batch_number,
            current: offering.batch_number,
        });
    }

    let duplicate = || Error::DuplicateEnrollment {
        participant_id: new.participant_id.clone(),
        offering_id: new.offering_id,
        batch_number: new.batch_number,
    };

    if find_live_enrollment(db, &new.participant_id, new.offering_id, new.batch_number)
        .await?
        .is_some()
    {
        return Err(duplicate());
    }

    ensure_batch_open(db, &offering).await?;

    let seats_taken = Enrollment::find()
        .filter(enrollment::Column::OfferingId.eq(new.offering_id))
        .filter(enrollment::Column::BatchNumber.eq(new.batch_number))
        .filter(enrollment::Column::Status.ne(EnrollmentStatus::Cancelled))
        .count(db)
        .await?;
    if seats_taken >= u64::try_from(offering.max_participants).unwrap_or(0) {
        return Err(Error::BatchFull {
            offering_id: offering.id,
            batch_number: offering.batch_number,
            max_participants: offering.max_participants,
        });
    }

    let (status, payment_status, amount, payment_session_id) = match &new.payment {
        Some(payment) => {
            validate_amount(payment.amount, false)?;
            (
                EnrollmentStatus::Active,
                PaymentStatus::Paid,
                payment.amount,
                Some(payment.external_session_id.clone()),
            )
        }
        None => (
            EnrollmentStatus::Pending,
            PaymentStatus::Pending,
            offering.enrollment_amount(),
            None,
        ),
    };

    let inserted = enrollment::ActiveModel {
        offering_id: Set(new.offering_id),
        batch_number: Set(new.batch_number),
        participant_id: Set(new.participant_id.clone()),
        guardian_id: Set(new.guardian_id.clone()),
        status: Set(status),
        payment_status: Set(payment_status),
        amount: Set(amount),
        currency: Set(offering.currency.clone()),
        payment_session_id: Set(payment_session_id),
        enrolled_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await;

    let model = match inserted {
        Ok(model) => model,
        Err(err) if is_unique_violation(&err) => return Err(duplicate()),
        Err(err) => return Err(err.into()),
    };

    notify::emit(
        db,
        notify::NewEvent {
            kind: NotificationKind::EnrollmentCreated,
            dedupe_key: format!("enrollment:{}", model.id),
            offering_id: model.offering_id,
            participant_id: model.participant_id.clone(),
            enrollment_id: Some(model.id),
            session_id: None,
            occurs_at: now,
        },
    )
    .await?;

    Ok(model)
}

/// Creates an enrollment in its own transaction.
///
/// # Errors
/// `OfferingNotFound`, `StaleBatch`, `DuplicateEnrollment`, `BatchNotOpen`,
/// `BatchFull`, or `InvalidAmount` for a paid enrollment with a bad amount.
#[instrument(skip(db, new), fields(offering_id = new.offering_id, batch_number = new.batch_number))]
pub async fn create_enrollment(
    db: &DatabaseConnection,
    new: NewEnrollment,
) -> Result<enrollment::Model> {
    let txn = db.begin().await?;
    let model = insert_enrollment(&txn, new, Utc::now()).await?;
    txn.commit().await?;

    info!(
        enrollment_id = model.id,
        participant_id = %model.participant_id,
        "Enrollment created"
    );
    Ok(model)
}

/// Finds an enrollment by id.
pub async fn get_enrollment(
    db: &DatabaseConnection,
    enrollment_id: i64,
) -> Result<Option<enrollment::Model>> {
    Enrollment::find_by_id(enrollment_id)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Applies a status transition. Being in the target state already is a no-op so
/// that retries are harmless.
async fn transition(
    db: &DatabaseConnection,
    enrollment_id: i64,
    target: EnrollmentStatus,
) -> Result<enrollment::Model> {
    let current = Enrollment::find_by_id(enrollment_id)
        .one(db)
        .await?
        .ok_or(Error::EnrollmentNotFound { enrollment_id })?;

    if current.status == target {
        return Ok(current);
    }
    if !current.status.can_transition_to(target) {
        return Err(Error::InvalidTransition {
            entity: "enrollment",
            from: current.status.to_value(),
            to: target.to_value(),
        });
    }

    let from = current.status;
    let mut active: enrollment::ActiveModel = current.into();
    active.status = Set(target);
    if target == EnrollmentStatus::Active {
        active.payment_status = Set(PaymentStatus::Paid);
    }
    active.updated_at = Set(Utc::now());
    let updated = active.update(db).await?;

    info!(enrollment_id, ?from, to = ?target, "Enrollment status changed");
    Ok(updated)
}

/// Marks a pending enrollment active once its payment has cleared.
pub async fn activate_enrollment(
    db: &DatabaseConnection,
    enrollment_id: i64,
) -> Result<enrollment::Model> {
    transition(db, enrollment_id, EnrollmentStatus::Active).await
}

/// Cancels a pending or active enrollment; cancelling twice is a no-op.
pub async fn cancel_enrollment(
    db: &DatabaseConnection,
    enrollment_id: i64,
) -> Result<enrollment::Model> {
    transition(db, enrollment_id, EnrollmentStatus::Cancelled).await
}

/// Completes an active enrollment; completing twice is a no-op.
pub async fn complete_enrollment(
    db: &DatabaseConnection,
    enrollment_id: i64,
) -> Result<enrollment::Model> {
    transition(db, enrollment_id, EnrollmentStatus::Completed).await
}

/// All enrollments of one batch, oldest first.
pub async fn list_enrollments_for_batch(
    db: &DatabaseConnection,
    offering_id: i64,
    batch_number: i32,
) -> Result<Vec<enrollment::Model>> {
    Enrollment::find()
        .filter(enrollment::Column::OfferingId.eq(offering_id))
        .filter(enrollment::Column::BatchNumber.eq(batch_number))
        .order_by_asc(enrollment::Column::EnrolledAt)
        .all(db)
        .await
        .map_err(Into::into)
}

/// A participant's enrollments across all offerings and batches, newest first.
pub async fn list_enrollments_for_participant(
    db: &DatabaseConnection,
    participant_id: &str,
) -> Result<Vec<enrollment::Model>> {
    Enrollment::find()
        .filter(enrollment::Column::ParticipantId.eq(participant_id))
        .order_by_desc(enrollment::Column::EnrolledAt)
        .all(db)
        .await
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::entities::{NotificationEvent, offering::OfferingStatus};
    use crate::test_utils::*;

    #[tokio::test]
    async fn test_create_enrollment_starts_pending() -> Result<()> {
        let (db, offering) = setup_open_offering().await?;

        let created = create_test_enrollment(&db, offering.id, 1, "learner-1").await?;
        assert_eq!(created.status, EnrollmentStatus::Pending);
        assert_eq!(created.payment_status, PaymentStatus::Pending);
        assert_eq!(created.batch_number, 1);
        assert_eq!(created.currency, "USD");
        assert!((created.amount - offering.price).abs() < f64::EPSILON);

        let events = NotificationEvent::find().all(&db).await?;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, NotificationKind::EnrollmentCreated);
        assert_eq!(events[0].enrollment_id, Some(created.id));

        Ok(())
    }

    #[tokio::test]
    async fn test_duplicate_enrollment_rejected() -> Result<()> {
        let (db, offering) = setup_open_offering().await?;

        create_test_enrollment(&db, offering.id, 1, "learner-1").await?;
        let result = create_test_enrollment(&db, offering.id, 1, "learner-1").await;
        assert!(matches!(
            result,
            Err(Error::DuplicateEnrollment { batch_number: 1, .. })
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_reenroll_after_cancel() -> Result<()> {
        let (db, offering) = setup_open_offering().await?;

        let first = create_test_enrollment(&db, offering.id, 1, "learner-1").await?;
        cancel_enrollment(&db, first.id).await?;

        let second = create_test_enrollment(&db, offering.id, 1, "learner-1").await?;
        assert_ne!(first.id, second.id);
        assert_eq!(second.status, EnrollmentStatus::Pending);

        Ok(())
    }

    #[tokio::test]
    async fn test_unique_index_backs_duplicate_check() -> Result<()> {
        let (db, offering) = setup_open_offering().await?;
        let first = create_test_enrollment(&db, offering.id, 1, "learner-1").await?;

        // Bypass the ledger: a raw second live row must hit the partial unique index
        let mut raw = enrollment::ActiveModel::from(first).reset_all();
        raw.id = sea_orm::ActiveValue::NotSet;
        let result = raw.insert(&db).await;
        assert!(result.is_err_and(|e| is_unique_violation(&e)));

        Ok(())
    }

    #[tokio::test]
    async fn test_batch_must_be_open() -> Result<()> {
        let db = setup_test_db().await?;
        let offering = create_test_offering(&db).await?;

        // Draft offering
        let result = create_test_enrollment(&db, offering.id, 1, "learner-1").await;
        assert!(matches!(result, Err(Error::BatchNotOpen { .. })));

        // Active but never scheduled
        crate::core::offering::set_offering_status(
            &db,
            offering.id,
            TEST_TUTOR,
            OfferingStatus::Active,
        )
        .await?;
        let result = create_test_enrollment(&db, offering.id, 1, "learner-1").await;
        assert!(matches!(result, Err(Error::BatchNotOpen { .. })));

        Ok(())
    }

    #[tokio::test]
    async fn test_batch_capacity_enforced() -> Result<()> {
        let (db, offering) = setup_open_offering_with_capacity(2).await?;

        create_test_enrollment(&db, offering.id, 1, "learner-1").await?;
        create_test_enrollment(&db, offering.id, 1, "learner-2").await?;
        let result = create_test_enrollment(&db, offering.id, 1, "learner-3").await;
        assert!(matches!(
            result,
            Err(Error::BatchFull {
                max_participants: 2,
                ..
            })
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_offering() -> Result<()> {
        let db = setup_test_db().await?;
        let result = create_test_enrollment(&db, 77, 1, "learner-1").await;
        assert!(matches!(
            result,
            Err(Error::OfferingNotFound { offering_id: 77 })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_state_machine() -> Result<()> {
        let (db, offering) = setup_open_offering().await?;
        let created = create_test_enrollment(&db, offering.id, 1, "learner-1").await?;

        // pending -> completed is not allowed
        let result = complete_enrollment(&db, created.id).await;
        assert!(matches!(result, Err(Error::InvalidTransition { .. })));

        let active = activate_enrollment(&db, created.id).await?;
        assert_eq!(active.status, EnrollmentStatus::Active);
        assert_eq!(active.payment_status, PaymentStatus::Paid);

        let completed = complete_enrollment(&db, created.id).await?;
        assert_eq!(completed.status, EnrollmentStatus::Completed);

        // Retrying the same transition is a no-op
        let again = complete_enrollment(&db, created.id).await?;
        assert_eq!(again.status, EnrollmentStatus::Completed);
        assert_eq!(again.updated_at, completed.updated_at);

        // No way out of completed
        let result = cancel_enrollment(&db, created.id).await;
        assert!(matches!(result, Err(Error::InvalidTransition { .. })));

        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() -> Result<()> {
        let (db, offering) = setup_open_offering().await?;
        let created = create_test_enrollment(&db, offering.id, 1, "learner-1").await?;

        let cancelled = cancel_enrollment(&db, created.id).await?;
        assert_eq!(cancelled.status, EnrollmentStatus::Cancelled);
        let again = cancel_enrollment(&db, created.id).await?;
        assert_eq!(again.status, EnrollmentStatus::Cancelled);

        let result = activate_enrollment(&db, created.id).await;
        assert!(matches!(result, Err(Error::InvalidTransition { .. })));

        let result = cancel_enrollment(&db, 9999).await;
        assert!(matches!(
            result,
            Err(Error::EnrollmentNotFound {
                enrollment_id: 9999
            })
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_list_enrollments() -> Result<()> {
        let (db, offering) = setup_open_offering().await?;
        create_test_enrollment(&db, offering.id, 1, "learner-1").await?;
        create_test_enrollment(&db, offering.id, 1, "learner-2").await?;

        let batch = list_enrollments_for_batch(&db, offering.id, 1).await?;
        assert_eq!(batch.len(), 2);

        let mine = list_enrollments_for_participant(&db, "learner-2").await?;
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].participant_id, "learner-2");

        Ok(())
    }
}
