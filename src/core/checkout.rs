//! Checkout intents - The hand-off to the external payment provider.
//!
//! An intent pins the batch number and the price at the moment the participant
//! starts paying. The reconciler later reads it back through the `checkout_ref`
//! the provider echoes, so a batch re-run in between is detected as a stale batch.

use crate::{
    core::{enrollment, offering, spending},
    entities::{CheckoutIntent, checkout_intent},
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{QueryOrder, Set, prelude::*};
use serde::Deserialize;
use tracing::{info, instrument};
use uuid::Uuid;

/// Request to start a checkout for the offering's current batch
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub offering_id: i64,
    pub participant_id: String,
    #[serde(default)]
    pub guardian_id: Option<String>,
}

/// Creates a checkout intent and returns it; its `checkout_ref` goes to the provider.
///
/// Rejects a closed batch or an existing live enrollment up front, and runs the
/// spending guard when a guardian pays, failing closed.
///
/// # Errors
/// `OfferingNotFound`, `BatchNotOpen`, `DuplicateEnrollment`, `LimitExceeded`.
#[instrument(skip(db, request), fields(offering_id = request.offering_id))]
pub async fn create_checkout_intent(
    db: &DatabaseConnection,
    request: CheckoutRequest,
) -> Result<checkout_intent::Model> {
    if request.participant_id.trim().is_empty() {
        return Err(Error::InvalidInput {
            message: "Participant id cannot be empty".to_string(),
        });
    }

    let offering = offering::require_offering(db, request.offering_id).await?;
    enrollment::ensure_batch_open(db, &offering).await?;

    if enrollment::find_live_enrollment(
        db,
        &request.participant_id,
        offering.id,
        offering.batch_number,
    )
    .await?
    .is_some()
    {
        return Err(Error::DuplicateEnrollment {
            participant_id: request.participant_id,
            offering_id: offering.id,
            batch_number: offering.batch_number,
        });
    }

    let amount = offering.enrollment_amount();
    if let Some(guardian_id) = request.guardian_id.as_deref() {
        spending::enforce_limit(db, guardian_id, &request.participant_id, amount).await?;
    }

    let intent = checkout_intent::ActiveModel {
        checkout_ref: Set(Uuid::new_v4().to_string()),
        offering_id: Set(offering.id),
        batch_number: Set(offering.batch_number),
        participant_id: Set(request.participant_id),
        guardian_id: Set(request.guardian_id),
        amount: Set(amount),
        currency: Set(offering.currency.clone()),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await?;

    info!(
        checkout_ref = %intent.checkout_ref,
        batch_number = intent.batch_number,
        amount = intent.amount,
        "Checkout intent created"
    );
    Ok(intent)
}

/// Looks up an intent by its reference.
pub async fn find_checkout_intent<C>(
    db: &C,
    checkout_ref: &str,
) -> Result<Option<checkout_intent::Model>>
where
    C: ConnectionTrait,
{
    CheckoutIntent::find()
        .filter(checkout_intent::Column::CheckoutRef.eq(checkout_ref))
        .one(db)
        .await
        .map_err(Into::into)
}

/// The participant's most recent intent for one `(offering, batch)`.
///
/// Used when a payment signal arrives without its `checkout_ref`.
pub async fn latest_intent_for<C>(
    db: &C,
    offering_id: i64,
    participant_id: &str,
    batch_number: i32,
) -> Result<Option<checkout_intent::Model>>
where
    C: ConnectionTrait,
{
    CheckoutIntent::find()
        .filter(checkout_intent::Column::OfferingId.eq(offering_id))
        .filter(checkout_intent::Column::ParticipantId.eq(participant_id))
        .filter(checkout_intent::Column::BatchNumber.eq(batch_number))
        .order_by_desc(checkout_intent::Column::Id)
        .one(db)
        .await
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{offering::OfferingStatus, spending_limit::LimitPeriod};
    use crate::test_utils::*;

    fn request(offering_id: i64, participant: &str, guardian: Option<&str>) -> CheckoutRequest {
        CheckoutRequest {
            offering_id,
            participant_id: participant.to_string(),
            guardian_id: guardian.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_checkout_intent_pins_batch_and_price() -> Result<()> {
        let (db, offering) = setup_open_offering().await?;

        let intent = create_checkout_intent(&db, request(offering.id, "learner-1", None)).await?;
        assert_eq!(intent.batch_number, 1);
        assert!((intent.amount - offering.price).abs() < f64::EPSILON);
        assert_eq!(intent.currency, "USD");
        assert!(Uuid::parse_str(&intent.checkout_ref).is_ok());

        let found = find_checkout_intent(&db, &intent.checkout_ref).await?;
        assert_eq!(found.map(|i| i.id), Some(intent.id));
        assert!(find_checkout_intent(&db, "nope").await?.is_none());

        Ok(())
    }

    #[tokio::test]
    async fn test_latest_intent_for_participant() -> Result<()> {
        let (db, offering) = setup_open_offering().await?;
        assert!(latest_intent_for(&db, offering.id, "kid", 1).await?.is_none());

        create_checkout_intent(&db, request(offering.id, "kid", None)).await?;
        let second =
            create_checkout_intent(&db, request(offering.id, "kid", Some("parent"))).await?;
        create_checkout_intent(&db, request(offering.id, "other", None)).await?;

        let latest = latest_intent_for(&db, offering.id, "kid", 1).await?;
        assert_eq!(
            latest.map(|i| (i.id, i.guardian_id)),
            Some((second.id, Some("parent".to_string())))
        );
        assert!(latest_intent_for(&db, offering.id, "kid", 2).await?.is_none());

        Ok(())
    }

    #[tokio::test]
    async fn test_checkout_rejected_for_closed_batch() -> Result<()> {
        let db = setup_test_db().await?;
        let offering = create_test_offering(&db).await?;
        assert_eq!(offering.status, OfferingStatus::Draft);

        let result = create_checkout_intent(&db, request(offering.id, "learner-1", None)).await;
        assert!(matches!(result, Err(Error::BatchNotOpen { .. })));

        Ok(())
    }

    #[tokio::test]
    async fn test_checkout_rejected_when_already_enrolled() -> Result<()> {
        let (db, offering) = setup_open_offering().await?;
        create_test_enrollment(&db, offering.id, 1, "learner-1").await?;

        let result = create_checkout_intent(&db, request(offering.id, "learner-1", None)).await;
        assert!(matches!(result, Err(Error::DuplicateEnrollment { .. })));

        Ok(())
    }

    #[tokio::test]
    async fn test_checkout_fails_closed_on_spending_limit() -> Result<()> {
        let (db, offering) = setup_open_offering_priced(100.0).await?;
        spending::set_spending_limit(&db, "parent", "kid", LimitPeriod::Lifetime, Some(50.0))
            .await?;

        let result =
            create_checkout_intent(&db, request(offering.id, "kid", Some("parent"))).await;
        assert!(matches!(
            result,
            Err(Error::LimitExceeded { limit, .. }) if (limit - 50.0).abs() < f64::EPSILON
        ));

        // Without a guardian there is nothing to guard
        create_checkout_intent(&db, request(offering.id, "kid", None)).await?;

        Ok(())
    }
}
