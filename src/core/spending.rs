//! Spending guard - Guardian-configured caps on what may be committed for a
//! dependent.
//!
//! The check is advisory: it reads and sums without locking, so two concurrent
//! checkouts near the cap can both pass. It runs when a checkout intent is created
//! and is not repeated at reconciliation time.

use crate::{
    core::validate_amount,
    entities::{
        Enrollment, SpendingLimit, enrollment,
        spending_limit::{self, LimitPeriod},
    },
    errors::{Error, Result},
};
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use sea_orm::{Set, prelude::*};
use serde::Serialize;
use tracing::{info, instrument};

/// Outcome of a limit check
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitCheck {
    pub allowed: bool,
    /// Headroom left before the proposed amount; `None` when no cap is configured
    pub remaining: Option<f64>,
    pub limit: Option<f64>,
    pub committed: f64,
}

fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(now.year(), now.month(), 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map_or(now, |naive| Utc.from_utc_datetime(&naive))
}

/// Looks up the limit a guardian set for a dependent.
pub async fn get_spending_limit<C>(
    db: &C,
    guardian_id: &str,
    dependent_id: &str,
) -> Result<Option<spending_limit::Model>>
where
    C: ConnectionTrait,
{
    SpendingLimit::find()
        .filter(spending_limit::Column::GuardianId.eq(guardian_id))
        .filter(spending_limit::Column::DependentId.eq(dependent_id))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Sums the dependent's live enrollments made by this guardian.
async fn committed_amount<C>(
    db: &C,
    guardian_id: &str,
    dependent_id: &str,
    since: Option<DateTime<Utc>>,
) -> Result<f64>
where
    C: ConnectionTrait,
{
    let mut query = Enrollment::find()
        .filter(enrollment::Column::GuardianId.eq(guardian_id))
        .filter(enrollment::Column::ParticipantId.eq(dependent_id));
    if let Some(since) = since {
        query = query.filter(enrollment::Column::EnrolledAt.gte(since));
    }

    let rows = query.all(db).await?;
    Ok(rows
        .iter()
        .filter(|e| e.status.is_live())
        .map(|e| e.amount)
        .sum())
}

/// Checks whether committing `proposed` more would stay within the guardian's cap.
///
/// `allowed` is `committed + proposed <= cap`, or always true without a cap.
/// `remaining` is the headroom before the proposed amount, floored at zero.
pub async fn check_limit<C>(
    db: &C,
    guardian_id: &str,
    dependent_id: &str,
    proposed: f64,
    now: DateTime<Utc>,
) -> Result<LimitCheck>
where
    C: ConnectionTrait,
{
    validate_amount(proposed, true)?;

    let limit = get_spending_limit(db, guardian_id, dependent_id).await?;
    let Some((cap, period)) = limit.and_then(|l| l.cap.map(|cap| (cap, l.period))) else {
        let committed = committed_amount(db, guardian_id, dependent_id, None).await?;
        return Ok(LimitCheck {
            allowed: true,
            remaining: None,
            limit: None,
            committed,
        });
    };

    let since = match period {
        LimitPeriod::Monthly => Some(month_start(now)),
        LimitPeriod::Lifetime => None,
    };
    let committed = committed_amount(db, guardian_id, dependent_id, since).await?;

    Ok(LimitCheck {
        allowed: committed + proposed <= cap,
        remaining: Some((cap - committed).max(0.0)),
        limit: Some(cap),
        committed,
    })
}

/// Like `check_limit`, but fails closed with `LimitExceeded`.
pub async fn enforce_limit<C>(
    db: &C,
    guardian_id: &str,
    dependent_id: &str,
    proposed: f64,
) -> Result<LimitCheck>
where
    C: ConnectionTrait,
{
    let check = check_limit(db, guardian_id, dependent_id, proposed, Utc::now()).await?;
    match check.limit {
        Some(limit) if !check.allowed => Err(Error::LimitExceeded {
            limit,
            committed: check.committed,
            proposed,
        }),
        _ => Ok(check),
    }
}

/// Creates or replaces the guardian's limit for one dependent.
///
/// A `cap` of `None` removes the cap while keeping the row.
#[instrument(skip(db))]
pub async fn set_spending_limit(
    db: &DatabaseConnection,
    guardian_id: &str,
    dependent_id: &str,
    period: LimitPeriod,
    cap: Option<f64>,
) -> Result<spending_limit::Model> {
    if guardian_id.trim().is_empty() || dependent_id.trim().is_empty() {
        return Err(Error::InvalidInput {
            message: "Guardian and dependent ids are required".to_string(),
        });
    }
    if let Some(cap) = cap {
        validate_amount(cap, true)?;
    }

    let model = match get_spending_limit(db, guardian_id, dependent_id).await? {
        Some(existing) => {
            let mut active: spending_limit::ActiveModel = existing.into();
            active.period = Set(period);
            active.cap = Set(cap);
            active.updated_at = Set(Utc::now());
            active.update(db).await?
        }
        None => {
            spending_limit::ActiveModel {
                guardian_id: Set(guardian_id.to_string()),
                dependent_id: Set(dependent_id.to_string()),
                period: Set(period),
                cap: Set(cap),
                updated_at: Set(Utc::now()),
                ..Default::default()
            }
            .insert(db)
            .await?
        }
    };

    info!(?cap, ?period, "Spending limit updated");
    Ok(model)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::enrollment::{self as ledger, NewEnrollment};
    use crate::test_utils::*;
    use chrono::Duration;

    const GUARDIAN: &str = "guardian-1";
    const CHILD: &str = "child-1";

    #[tokio::test]
    async fn test_no_limit_always_allows() -> Result<()> {
        let db = setup_test_db().await?;

        let check = check_limit(&db, GUARDIAN, CHILD, 10_000.0, Utc::now()).await?;
        assert!(check.allowed);
        assert_eq!(check.remaining, None);
        assert_eq!(check.limit, None);

        // A row without a cap is also unlimited
        set_spending_limit(&db, GUARDIAN, CHILD, LimitPeriod::Lifetime, None).await?;
        let check = check_limit(&db, GUARDIAN, CHILD, 10_000.0, Utc::now()).await?;
        assert!(check.allowed);

        Ok(())
    }

    #[tokio::test]
    async fn test_limit_500_committed_450_rejects_100() -> Result<()> {
        let (db, offering) = setup_open_offering_priced(450.0).await?;
        set_spending_limit(&db, GUARDIAN, CHILD, LimitPeriod::Lifetime, Some(500.0)).await?;
        ledger::create_enrollment(
            &db,
            NewEnrollment::unpaid(offering.id, 1, CHILD, Some(GUARDIAN)),
        )
        .await?;

        let check = check_limit(&db, GUARDIAN, CHILD, 100.0, Utc::now()).await?;
        assert!(!check.allowed);
        assert_eq!(check.remaining, Some(50.0));
        assert!((check.committed - 450.0).abs() < f64::EPSILON);

        let check = check_limit(&db, GUARDIAN, CHILD, 50.0, Utc::now()).await?;
        assert!(check.allowed);

        let result = enforce_limit(&db, GUARDIAN, CHILD, 100.0).await;
        assert!(matches!(result, Err(Error::LimitExceeded { .. })));

        Ok(())
    }

    #[tokio::test]
    async fn test_cancelled_and_other_guardians_not_counted() -> Result<()> {
        let (db, offering) = setup_open_offering_priced(300.0).await?;
        set_spending_limit(&db, GUARDIAN, CHILD, LimitPeriod::Lifetime, Some(500.0)).await?;

        let cancelled = ledger::create_enrollment(
            &db,
            NewEnrollment::unpaid(offering.id, 1, CHILD, Some(GUARDIAN)),
        )
        .await?;
        ledger::cancel_enrollment(&db, cancelled.id).await?;

        ledger::create_enrollment(
            &db,
            NewEnrollment::unpaid(offering.id, 1, "child-2", Some(GUARDIAN)),
        )
        .await?;

        let check = check_limit(&db, GUARDIAN, CHILD, 200.0, Utc::now()).await?;
        assert!(check.allowed);
        assert!((check.committed - 0.0).abs() < f64::EPSILON);

        Ok(())
    }

    #[tokio::test]
    async fn test_monthly_period_ignores_earlier_months() -> Result<()> {
        let (db, offering) = setup_open_offering_priced(450.0).await?;
        set_spending_limit(&db, GUARDIAN, CHILD, LimitPeriod::Monthly, Some(500.0)).await?;
        ledger::create_enrollment(
            &db,
            NewEnrollment::unpaid(offering.id, 1, CHILD, Some(GUARDIAN)),
        )
        .await?;

        let now = Utc::now();
        let this_month = check_limit(&db, GUARDIAN, CHILD, 100.0, now).await?;
        assert!(!this_month.allowed);

        let next_month =
            check_limit(&db, GUARDIAN, CHILD, 100.0, now + Duration::days(40)).await?;
        assert!(next_month.allowed);
        assert_eq!(next_month.remaining, Some(500.0));

        Ok(())
    }

    #[tokio::test]
    async fn test_set_spending_limit_upserts() -> Result<()> {
        let db = setup_test_db().await?;

        let first =
            set_spending_limit(&db, GUARDIAN, CHILD, LimitPeriod::Monthly, Some(100.0)).await?;
        let second =
            set_spending_limit(&db, GUARDIAN, CHILD, LimitPeriod::Lifetime, Some(250.0)).await?;
        assert_eq!(first.id, second.id);
        assert_eq!(second.period, LimitPeriod::Lifetime);
        assert_eq!(second.cap, Some(250.0));

        let result =
            set_spending_limit(&db, GUARDIAN, CHILD, LimitPeriod::Monthly, Some(-1.0)).await;
        assert!(matches!(result, Err(Error::InvalidAmount { .. })));

        Ok(())
    }

    #[test]
    fn test_month_start() {
        let now = Utc.with_ymd_and_hms(2024, 2, 29, 18, 30, 0).unwrap();
        assert_eq!(
            month_start(now),
            Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()
        );
    }
}
