//! Payment reconciler - Turns a confirmed payment into exactly one enrollment.
//!
//! The provider delivers completion signals at least once and possibly
//! concurrently, from any number of worker processes. Nothing here relies on an
//! in-process lock:
//!
//! 1. The reconciliation record is created with insert-or-fail on the unique
//!    `external_session_id`; a losing racer re-reads the winner's row.
//! 2. The enrollment insert is backed by the partial unique index on live
//!    enrollments.
//! 3. `enrollment_completed` is flipped with a conditional `UPDATE .. WHERE
//!    enrollment_completed = false` in the same transaction as the enrollment, so
//!    only one caller ever reports `already_processed = false`.
//!
//! A failure between record creation and step 3 leaves the record `pending`; the
//! next delivery of the same signal retries enrollment creation.

use crate::{
    core::{
        batch, checkout,
        enrollment::{self, NewEnrollment, PaymentDetails},
        is_unique_violation, offering, validate_amount,
    },
    entities::{
        Enrollment, PaymentReconciliation,
        enrollment::Model as EnrollmentModel,
        payment_reconciliation::{self, Column as RecordColumn, ReconciliationStatus},
    },
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{Set, TransactionTrait, prelude::*, sea_query::Expr};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

/// A payment-completion signal as delivered by the provider callback.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSignal {
    pub external_session_id: String,
    pub offering_id: i64,
    pub participant_id: String,
    pub amount: f64,
    /// Set by the caller after verifying the payment with the provider
    pub payment_confirmed: bool,
    /// Reference from `create_checkout_intent`, when the provider echoes it back
    #[serde(default)]
    pub checkout_ref: Option<String>,
}

/// Result of a reconcile call
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileOutcome {
    pub enrollment: EnrollmentModel,
    /// True when an earlier delivery already created the enrollment
    pub already_processed: bool,
}

/// Batch and guardian an enrollment will be created under
struct Target {
    batch_number: i32,
    guardian_id: Option<String>,
}

/// Looks up the reconciliation record for a provider session.
pub async fn find_record<C>(
    db: &C,
    external_session_id: &str,
) -> Result<Option<payment_reconciliation::Model>>
where
    C: ConnectionTrait,
{
    PaymentReconciliation::find()
        .filter(RecordColumn::ExternalSessionId.eq(external_session_id))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Inserts a pending record, or returns the one a concurrent caller just created.
async fn create_record(
    db: &DatabaseConnection,
    signal: &PaymentSignal,
) -> Result<payment_reconciliation::Model> {
    let offering = offering::require_offering(db, signal.offering_id).await?;
    let now = Utc::now();

    let inserted = payment_reconciliation::ActiveModel {
        external_session_id: Set(signal.external_session_id.clone()),
        offering_id: Set(signal.offering_id),
        participant_id: Set(signal.participant_id.clone()),
        amount: Set(signal.amount),
        currency: Set(offering.currency),
        checkout_ref: Set(signal.checkout_ref.clone()),
        enrollment_completed: Set(false),
        enrollment_id: Set(None),
        status: Set(ReconciliationStatus::Pending),
        attempts: Set(0),
        last_error: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await;

    match inserted {
        Ok(record) => Ok(record),
        Err(err) if is_unique_violation(&err) => find_record(db, &signal.external_session_id)
            .await?
            .ok_or_else(|| err.into()),
        Err(err) => Err(err.into()),
    }
}

fn ensure_matches(record: &payment_reconciliation::Model, signal: &PaymentSignal) -> Result<()> {
    if record.offering_id == signal.offering_id && record.participant_id == signal.participant_id
    {
        Ok(())
    } else {
        Err(Error::ReconciliationMismatch {
            external_session_id: signal.external_session_id.clone(),
        })
    }
}

/// Builds the `already_processed` outcome from a completed record.
async fn processed_outcome<C>(
    db: &C,
    record: &payment_reconciliation::Model,
) -> Result<ReconcileOutcome>
where
    C: ConnectionTrait,
{
    let enrollment_id = record.enrollment_id.unwrap_or_default();
    let enrollment = Enrollment::find_by_id(enrollment_id)
        .one(db)
        .await?
        .ok_or(Error::EnrollmentNotFound { enrollment_id })?;

    Ok(ReconcileOutcome {
        enrollment,
        already_processed: true,
    })
}

/// Resolves batch and guardian from the checkout intent behind `checkout_ref`.
///
/// Without a reference the offering's current batch is used and the guardian comes
/// from the participant's latest intent for that batch, if any.
async fn resolve_target(
    db: &DatabaseConnection,
    signal: &PaymentSignal,
    checkout_ref: Option<&str>,
) -> Result<Target> {
    let Some(checkout_ref) = checkout_ref else {
        let batch_number = batch::current_batch(db, signal.offering_id).await?;
        let intent = checkout::latest_intent_for(
            db,
            signal.offering_id,
            &signal.participant_id,
            batch_number,
        )
        .await?;
        return Ok(Target {
            batch_number,
            guardian_id: intent.and_then(|i| i.guardian_id),
        });
    };

    let intent = checkout::find_checkout_intent(db, checkout_ref)
        .await?
        .ok_or_else(|| Error::CheckoutNotFound {
            checkout_ref: checkout_ref.to_string(),
        })?;
    if intent.offering_id != signal.offering_id || intent.participant_id != signal.participant_id
    {
        return Err(Error::ReconciliationMismatch {
            external_session_id: signal.external_session_id.clone(),
        });
    }

    Ok(Target {
        batch_number: intent.batch_number,
        guardian_id: intent.guardian_id,
    })
}

/// Creates (or adopts) the enrollment and marks the record completed.
async fn complete(
    db: &DatabaseConnection,
    record: &payment_reconciliation::Model,
    signal: &PaymentSignal,
) -> Result<ReconcileOutcome> {
    // The first delivery's reference wins over whatever a redelivery carries
    let checkout_ref = record
        .checkout_ref
        .as_deref()
        .or(signal.checkout_ref.as_deref());
    let target = resolve_target(db, signal, checkout_ref).await?;

    PaymentReconciliation::update_many()
        .col_expr(RecordColumn::Attempts, Expr::col(RecordColumn::Attempts).add(1))
        .filter(RecordColumn::Id.eq(record.id))
        .exec(db)
        .await?;

    let now = Utc::now();
    let txn = db.begin().await?;

    let new = NewEnrollment {
        offering_id: signal.offering_id,
        batch_number: target.batch_number,
        participant_id: signal.participant_id.clone(),
        guardian_id: target.guardian_id,
        payment: Some(PaymentDetails {
            amount: signal.amount,
            external_session_id: signal.external_session_id.clone(),
        }),
    };
    let enrollment = match enrollment::insert_enrollment(&txn, new, now).await {
        Ok(created) => created,
        Err(err @ Error::DuplicateEnrollment { .. }) => {
            // Same payment session already enrolled them: a concurrent delivery won
            let live = enrollment::find_live_enrollment(
                &txn,
                &signal.participant_id,
                signal.offering_id,
                target.batch_number,
            )
            .await?;
            match live {
                Some(existing)
                    if existing.payment_session_id.as_deref()
                        == Some(signal.external_session_id.as_str()) =>
                {
                    existing
                }
                _ => return Err(err),
            }
        }
        Err(err) => return Err(err),
    };

    let marked = PaymentReconciliation::update_many()
        .col_expr(RecordColumn::EnrollmentCompleted, Expr::value(true))
        .col_expr(RecordColumn::EnrollmentId, Expr::value(Some(enrollment.id)))
        .col_expr(
            RecordColumn::Status,
            Expr::value(ReconciliationStatus::Completed.to_value()),
        )
        .col_expr(RecordColumn::LastError, Expr::value(Option::<String>::None))
        .col_expr(RecordColumn::UpdatedAt, Expr::value(now))
        .filter(RecordColumn::Id.eq(record.id))
        .filter(RecordColumn::EnrollmentCompleted.eq(false))
        .exec(&txn)
        .await?;

    if marked.rows_affected == 0 {
        txn.rollback().await?;
        let latest = find_record(db, &signal.external_session_id)
            .await?
            .ok_or_else(|| Error::ReconciliationMismatch {
                external_session_id: signal.external_session_id.clone(),
            })?;
        return processed_outcome(db, &latest).await;
    }

    txn.commit().await?;

    info!(
        enrollment_id = enrollment.id,
        batch_number = enrollment.batch_number,
        "Payment reconciled into enrollment"
    );
    Ok(ReconcileOutcome {
        enrollment,
        already_processed: false,
    })
}

/// Records why the last attempt failed; the record stays pending for redelivery.
async fn record_failure(db: &DatabaseConnection, record_id: i64, err: &Error) {
    let result = PaymentReconciliation::update_many()
        .col_expr(RecordColumn::LastError, Expr::value(Some(err.to_string())))
        .col_expr(RecordColumn::UpdatedAt, Expr::value(Utc::now()))
        .filter(RecordColumn::Id.eq(record_id))
        .filter(RecordColumn::EnrollmentCompleted.eq(false))
        .exec(db)
        .await;

    if let Err(write_err) = result {
        warn!(record_id, error = %write_err, "Failed to record reconciliation error");
    }
}

/// Converts a confirmed payment into an enrollment, idempotently per
/// `external_session_id`.
///
/// Safe to call any number of times, concurrently, with the same signal. Exactly one
/// call returns `already_processed = false`; later calls return the same enrollment
/// with `already_processed = true` and write nothing.
///
/// Any error leaves the signal retryable: callers must redeliver later rather than
/// treat the failure as final.
///
/// # Errors
/// - `PaymentNotConfirmed` when the caller has not verified the payment (no writes)
/// - `InvalidAmount`, `OfferingNotFound`
/// - `StaleBatch` when the batch moved on since checkout
/// - `DuplicateEnrollment` when the participant enrolled through another payment
/// - `CheckoutNotFound` / `ReconciliationMismatch` for inconsistent signals
#[instrument(
    skip(db, signal),
    fields(
        external_session_id = %signal.external_session_id,
        offering_id = signal.offering_id,
    )
)]
pub async fn reconcile(db: &DatabaseConnection, signal: PaymentSignal) -> Result<ReconcileOutcome> {
    if !signal.payment_confirmed {
        return Err(Error::PaymentNotConfirmed {
            external_session_id: signal.external_session_id,
        });
    }
    if signal.external_session_id.trim().is_empty() {
        return Err(Error::InvalidInput {
            message: "External session id cannot be empty".to_string(),
        });
    }
    validate_amount(signal.amount, false)?;

    let record = match find_record(db, &signal.external_session_id).await? {
        Some(existing) => existing,
        None => create_record(db, &signal).await?,
    };
    ensure_matches(&record, &signal)?;

    if record.enrollment_completed {
        info!("Payment already reconciled");
        return processed_outcome(db, &record).await;
    }

    match complete(db, &record, &signal).await {
        Ok(outcome) => Ok(outcome),
        Err(err) => {
            warn!(error = %err, retryable = err.is_retryable(), "Reconciliation attempt failed");
            record_failure(db, record.id, &err).await;
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::{
        checkout::{CheckoutRequest, create_checkout_intent},
        schedule, spending,
    };
    use crate::entities::{
        enrollment::EnrollmentStatus, offering::OfferingStatus, spending_limit::LimitPeriod,
    };
    use crate::test_utils::*;

    fn signal(session: &str, offering_id: i64, participant: &str) -> PaymentSignal {
        PaymentSignal {
            external_session_id: session.to_string(),
            offering_id,
            participant_id: participant.to_string(),
            amount: 100.0,
            payment_confirmed: true,
            checkout_ref: None,
        }
    }

    async fn record_for(db: &DatabaseConnection, session: &str) -> payment_reconciliation::Model {
        find_record(db, session).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_reconcile_twice_creates_one_enrollment() -> Result<()> {
        let (db, offering) = setup_open_offering().await?;

        let first = reconcile(&db, signal("cs_1", offering.id, "learner-1")).await?;
        assert!(!first.already_processed);
        assert_eq!(first.enrollment.status, EnrollmentStatus::Active);
        assert_eq!(first.enrollment.batch_number, 1);
        assert_eq!(first.enrollment.payment_session_id.as_deref(), Some("cs_1"));

        let second = reconcile(&db, signal("cs_1", offering.id, "learner-1")).await?;
        assert!(second.already_processed);
        assert_eq!(second.enrollment.id, first.enrollment.id);

        let all = Enrollment::find().all(&db).await?;
        assert_eq!(all.len(), 1);

        let record = record_for(&db, "cs_1").await;
        assert!(record.enrollment_completed);
        assert_eq!(record.status, ReconciliationStatus::Completed);
        assert_eq!(record.enrollment_id, Some(first.enrollment.id));
        // The redelivery wrote nothing
        assert_eq!(record.attempts, 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_deliveries_create_one_enrollment() -> Result<()> {
        let (db, offering) = setup_open_offering().await?;

        let (a, b) = tokio::join!(
            reconcile(&db, signal("cs_race", offering.id, "learner-1")),
            reconcile(&db, signal("cs_race", offering.id, "learner-1")),
        );
        let (a, b) = (a?, b?);

        assert_eq!(a.enrollment.id, b.enrollment.id);
        assert!(a.already_processed ^ b.already_processed);
        assert_eq!(Enrollment::find().count(&db).await?, 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_unconfirmed_payment_writes_nothing() -> Result<()> {
        let (db, offering) = setup_open_offering().await?;

        let mut unconfirmed = signal("cs_2", offering.id, "learner-1");
        unconfirmed.payment_confirmed = false;
        let result = reconcile(&db, unconfirmed).await;
        assert!(matches!(result, Err(Error::PaymentNotConfirmed { .. })));

        assert!(find_record(&db, "cs_2").await?.is_none());
        assert_eq!(Enrollment::find().count(&db).await?, 0);

        Ok(())
    }

    #[tokio::test]
    async fn test_failed_attempt_stays_pending_and_retries() -> Result<()> {
        let db = setup_test_db().await?;
        let offering = create_test_offering(&db).await?;
        crate::core::offering::set_offering_status(
            &db,
            offering.id,
            TEST_TUTOR,
            OfferingStatus::Active,
        )
        .await?;

        // No sessions yet: the batch is not open
        let result = reconcile(&db, signal("cs_3", offering.id, "learner-1")).await;
        let err = result.unwrap_err();
        assert!(matches!(err, Error::BatchNotOpen { .. }));
        assert!(err.is_retryable());

        let record = record_for(&db, "cs_3").await;
        assert!(!record.enrollment_completed);
        assert_eq!(record.status, ReconciliationStatus::Pending);
        assert_eq!(record.attempts, 1);
        assert!(record.last_error.is_some());

        schedule::attach_schedule(&db, offering.id, 1, TEST_TUTOR, tue_thu_plan(), TEST_LIMITS)
            .await?;

        // Redelivery re-attempts instead of reporting success
        let outcome = reconcile(&db, signal("cs_3", offering.id, "learner-1")).await?;
        assert!(!outcome.already_processed);

        let record = record_for(&db, "cs_3").await;
        assert!(record.enrollment_completed);
        assert_eq!(record.attempts, 2);
        assert_eq!(record.last_error, None);

        Ok(())
    }

    #[tokio::test]
    async fn test_checkout_ref_pins_batch_and_guardian() -> Result<()> {
        let (db, offering) = setup_open_offering().await?;
        let intent = create_checkout_intent(
            &db,
            CheckoutRequest {
                offering_id: offering.id,
                participant_id: "kid".to_string(),
                guardian_id: Some("parent".to_string()),
            },
        )
        .await?;

        let mut paid = signal("cs_4", offering.id, "kid");
        paid.checkout_ref = Some(intent.checkout_ref.clone());
        let outcome = reconcile(&db, paid).await?;
        assert_eq!(outcome.enrollment.guardian_id.as_deref(), Some("parent"));
        assert_eq!(outcome.enrollment.batch_number, intent.batch_number);

        Ok(())
    }

    #[tokio::test]
    async fn test_batch_rerun_during_checkout_is_stale() -> Result<()> {
        let (db, offering) = setup_open_offering().await?;
        let intent = create_checkout_intent(
            &db,
            CheckoutRequest {
                offering_id: offering.id,
                participant_id: "learner-1".to_string(),
                guardian_id: None,
            },
        )
        .await?;

        batch::create_next_batch(&db, offering.id, TEST_TUTOR).await?;
        schedule::attach_schedule(&db, offering.id, 2, TEST_TUTOR, tue_thu_plan(), TEST_LIMITS)
            .await?;

        let mut paid = signal("cs_5", offering.id, "learner-1");
        paid.checkout_ref = Some(intent.checkout_ref);
        let result = reconcile(&db, paid).await;
        assert!(matches!(
            result,
            Err(Error::StaleBatch {
                requested: 1,
                current: 2
            })
        ));
        assert!(!record_for(&db, "cs_5").await.enrollment_completed);

        Ok(())
    }

    #[tokio::test]
    async fn test_guardian_recovered_when_signal_has_no_ref() -> Result<()> {
        let (db, offering) = setup_open_offering_priced(450.0).await?;
        spending::set_spending_limit(&db, "parent", "kid", LimitPeriod::Lifetime, Some(500.0))
            .await?;
        create_checkout_intent(
            &db,
            CheckoutRequest {
                offering_id: offering.id,
                participant_id: "kid".to_string(),
                guardian_id: Some("parent".to_string()),
            },
        )
        .await?;

        let mut paid = signal("cs_12", offering.id, "kid");
        paid.amount = 450.0;
        let outcome = reconcile(&db, paid).await?;
        assert_eq!(outcome.enrollment.guardian_id.as_deref(), Some("parent"));

        // The reconciled enrollment now counts against the cap
        let check = spending::check_limit(&db, "parent", "kid", 100.0, Utc::now()).await?;
        assert!(!check.allowed);
        assert_eq!(check.remaining, Some(50.0));

        Ok(())
    }

    #[tokio::test]
    async fn test_redelivery_without_ref_keeps_checkout_batch() -> Result<()> {
        let (db, offering) = setup_open_offering().await?;
        let intent = create_checkout_intent(
            &db,
            CheckoutRequest {
                offering_id: offering.id,
                participant_id: "kid".to_string(),
                guardian_id: Some("parent".to_string()),
            },
        )
        .await?;

        batch::create_next_batch(&db, offering.id, TEST_TUTOR).await?;
        schedule::attach_schedule(&db, offering.id, 2, TEST_TUTOR, tue_thu_plan(), TEST_LIMITS)
            .await?;

        let mut paid = signal("cs_13", offering.id, "kid");
        paid.checkout_ref = Some(intent.checkout_ref.clone());
        let result = reconcile(&db, paid).await;
        assert!(matches!(result, Err(Error::StaleBatch { .. })));

        // Same payment redelivered without the reference
        let result = reconcile(&db, signal("cs_13", offering.id, "kid")).await;
        assert!(matches!(
            result,
            Err(Error::StaleBatch {
                requested: 1,
                current: 2
            })
        ));

        let record = record_for(&db, "cs_13").await;
        assert_eq!(record.checkout_ref, Some(intent.checkout_ref));
        assert!(!record.enrollment_completed);
        assert_eq!(record.attempts, 2);
        assert_eq!(Enrollment::find().count(&db).await?, 0);

        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_checkout_ref() -> Result<()> {
        let (db, offering) = setup_open_offering().await?;

        let mut paid = signal("cs_6", offering.id, "learner-1");
        paid.checkout_ref = Some("missing".to_string());
        let result = reconcile(&db, paid).await;
        assert!(matches!(result, Err(Error::CheckoutNotFound { .. })));

        Ok(())
    }

    #[tokio::test]
    async fn test_redelivery_with_different_target_is_mismatch() -> Result<()> {
        let (db, offering) = setup_open_offering().await?;
        reconcile(&db, signal("cs_7", offering.id, "learner-1")).await?;

        let result = reconcile(&db, signal("cs_7", offering.id, "learner-2")).await;
        assert!(matches!(result, Err(Error::ReconciliationMismatch { .. })));

        Ok(())
    }

    #[tokio::test]
    async fn test_other_payment_for_enrolled_participant_is_duplicate() -> Result<()> {
        let (db, offering) = setup_open_offering().await?;
        reconcile(&db, signal("cs_8", offering.id, "learner-1")).await?;

        let result = reconcile(&db, signal("cs_9", offering.id, "learner-1")).await;
        assert!(matches!(result, Err(Error::DuplicateEnrollment { .. })));
        assert!(!record_for(&db, "cs_9").await.enrollment_completed);

        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_amount_and_unknown_offering() -> Result<()> {
        let (db, offering) = setup_open_offering().await?;

        let mut free = signal("cs_10", offering.id, "learner-1");
        free.amount = 0.0;
        let result = reconcile(&db, free).await;
        assert!(matches!(result, Err(Error::InvalidAmount { .. })));

        let result = reconcile(&db, signal("cs_11", 999, "learner-1")).await;
        assert!(matches!(
            result,
            Err(Error::OfferingNotFound { offering_id: 999 })
        ));
        assert!(find_record(&db, "cs_11").await?.is_none());

        Ok(())
    }
}
