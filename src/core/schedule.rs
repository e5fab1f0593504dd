//! Schedule business logic - Expands recurrence plans into concrete sessions.
//!
//! [`expand`] is a pure function: the same plan always yields the same ordered list
//! of sessions, materialised eagerly. [`attach_schedule`] persists a plan together
//! with its expansion for one `(offering, batch)` and enforces the re-expansion lock.
//!
//! Month-day policy: a monthly slot whose day does not exist in a given month (31 in
//! April, 30 in February, ...) produces no session that month. It is neither clamped
//! to the last day nor rolled into the next month.

use crate::{
    core::{batch, offering},
    entities::{
        Enrollment, SchedulePlan, ScheduleSlot, SessionInstance, enrollment,
        enrollment::EnrollmentStatus,
        schedule_plan::{self, Frequency},
        schedule_slot, session_instance,
        session_instance::SessionStatus,
    },
    errors::{Error, Result},
};
use chrono::{Datelike, Days, NaiveDate, NaiveTime, Utc, Weekday};
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{info, instrument};

/// One time-of-day window of a plan.
///
/// Weekly slots set `day_of_week`, monthly slots set `day_of_month`, daily slots
/// set neither.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSlot {
    #[serde(default)]
    pub day_of_week: Option<Weekday>,
    #[serde(default)]
    pub day_of_month: Option<u32>,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

impl TimeSlot {
    /// A slot repeated every day
    #[must_use]
    pub const fn daily(start_time: NaiveTime, end_time: NaiveTime) -> Self {
        Self {
            day_of_week: None,
            day_of_month: None,
            start_time,
            end_time,
        }
    }

    /// A slot on one weekday
    #[must_use]
    pub const fn weekly(day: Weekday, start_time: NaiveTime, end_time: NaiveTime) -> Self {
        Self {
            day_of_week: Some(day),
            day_of_month: None,
            start_time,
            end_time,
        }
    }

    /// A slot on one day of the month
    #[must_use]
    pub const fn monthly(day: u32, start_time: NaiveTime, end_time: NaiveTime) -> Self {
        Self {
            day_of_week: None,
            day_of_month: Some(day),
            start_time,
            end_time,
        }
    }
}

/// A recurrence plan before it is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSpec {
    pub frequency: Frequency,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    /// Maximum number of sessions to generate; required when `end_date` is absent
    #[serde(default)]
    pub max_instances: Option<u32>,
    pub slots: Vec<TimeSlot>,
}

/// A generated session, not yet persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlannedSession {
    /// 1-based position in the ordered expansion
    pub sequence: u32,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

/// Hard ceiling on the sessions one plan may produce, dated or not
pub const MAX_PLAN_INSTANCES: u32 = 10_000;

/// Rows per session `INSERT`; keeps bound parameters under SQLite's variable limit
const INSERT_CHUNK_ROWS: usize = 100;

/// Bounds applied when a plan is attached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleLimits {
    /// Cap for plans with neither an end date nor a cap of their own
    pub default_max_instances: u32,
    /// Plans expanding past this many sessions are rejected
    pub max_plan_instances: u32,
}

impl ScheduleLimits {
    /// 52 sessions for open-ended plans, [`MAX_PLAN_INSTANCES`] overall
    pub const DEFAULT: Self = Self {
        default_max_instances: 52,
        max_plan_instances: MAX_PLAN_INSTANCES,
    };
}

impl Default for ScheduleLimits {
    fn default() -> Self {
        Self::DEFAULT
    }
}

fn invalid(reason: impl Into<String>) -> Error {
    Error::InvalidSchedule {
        reason: reason.into(),
    }
}

fn validate_plan(plan: &PlanSpec) -> Result<()> {
    if plan.slots.is_empty() {
        return Err(invalid("at least one time slot is required"));
    }

    if let Some(end) = plan.end_date {
        if end < plan.start_date {
            return Err(invalid(format!(
                "end date {end} is before start date {}",
                plan.start_date
            )));
        }
    }

    match (plan.end_date, plan.max_instances) {
        (None, None) => {
            return Err(invalid(
                "a plan without an end date needs a maximum instance count",
            ));
        }
        (_, Some(0)) => return Err(invalid("maximum instance count must be positive")),
        _ => {}
    }

    let mut seen = HashSet::new();
    for slot in &plan.slots {
        if slot.start_time >= slot.end_time {
            return Err(invalid(format!(
                "slot {}-{} ends before it starts",
                slot.start_time, slot.end_time
            )));
        }

        match (plan.frequency, slot.day_of_week, slot.day_of_month) {
            (Frequency::Daily, None, None) | (Frequency::Weekly, Some(_), None) => {}
            (Frequency::Monthly, None, Some(day)) if (1..=31).contains(&day) => {}
            (Frequency::Monthly, None, Some(day)) => {
                return Err(invalid(format!("day of month {day} is out of range")));
            }
            (Frequency::Daily, _, _) => {
                return Err(invalid("daily slots must not name a day"));
            }
            (Frequency::Weekly, _, _) => {
                return Err(invalid("weekly slots need a day of week and no day of month"));
            }
            (Frequency::Monthly, _, _) => {
                return Err(invalid("monthly slots need a day of month and no day of week"));
            }
        }

        let key = (
            slot.day_of_week.map(|d| d.num_days_from_monday()),
            slot.day_of_month,
            slot.start_time,
        );
        if !seen.insert(key) {
            return Err(invalid(format!(
                "duplicate slot starting at {}",
                slot.start_time
            )));
        }
    }

    Ok(())
}

/// Generates the dates for one slot, bounded by the plan's end date and `cap`.
fn slot_dates(plan: &PlanSpec, slot: &TimeSlot, cap: usize) -> Vec<NaiveDate> {
    let within_end = |date: NaiveDate| plan.end_date.is_none_or(|end| date <= end);
    let mut dates = Vec::new();

    match plan.frequency {
        Frequency::Daily => {
            let mut date = Some(plan.start_date);
            while let Some(current) = date {
                if !within_end(current) || dates.len() >= cap {
                    break;
                }
                dates.push(current);
                date = current.succ_opt();
            }
        }
        Frequency::Weekly => {
            let Some(weekday) = slot.day_of_week else {
                return dates;
            };
            let offset = (7 + weekday.num_days_from_monday()
                - plan.start_date.weekday().num_days_from_monday())
                % 7;
            let mut date = plan.start_date.checked_add_days(Days::new(u64::from(offset)));
            while let Some(current) = date {
                if !within_end(current) || dates.len() >= cap {
                    break;
                }
                dates.push(current);
                date = current.checked_add_days(Days::new(7));
            }
        }
        Frequency::Monthly => {
            let Some(day) = slot.day_of_month else {
                return dates;
            };
            let (mut year, mut month) = (plan.start_date.year(), plan.start_date.month());
            while dates.len() < cap {
                let Some(first_of_month) = NaiveDate::from_ymd_opt(year, month, 1) else {
                    break;
                };
                if !within_end(first_of_month) {
                    break;
                }
                // Months without this day are skipped.
                if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
                    if date >= plan.start_date && within_end(date) {
                        dates.push(date);
                    }
                }
                if month == 12 {
                    year += 1;
                    month = 1;
                } else {
                    month += 1;
                }
            }
        }
    }

    dates
}

/// Expands a plan into its ordered, numbered sessions.
///
/// Sessions are sorted by `(date, start_time)` before sequence numbers are assigned,
/// so several slots on the same day come out in start-time order. When the plan has
/// a `max_instances` cap the first that many sessions in that order are kept.
///
/// # Errors
/// `InvalidSchedule` when the plan fails validation, produces no session at all, or
/// produces more than [`MAX_PLAN_INSTANCES`].
pub fn expand(plan: &PlanSpec) -> Result<Vec<PlannedSession>> {
    expand_bounded(plan, MAX_PLAN_INSTANCES)
}

/// [`expand`] with an explicit ceiling on the number of sessions.
///
/// No slot generates more than `ceiling + 1` dates, so a far-off end date is
/// rejected without materialising it.
///
/// # Errors
/// `InvalidSchedule` as for [`expand`], with `ceiling` as the limit.
pub fn expand_bounded(plan: &PlanSpec, ceiling: u32) -> Result<Vec<PlannedSession>> {
    validate_plan(plan)?;

    let ceiling = ceiling as usize;
    let per_slot = plan
        .max_instances
        .map_or(ceiling + 1, |cap| (cap as usize).min(ceiling + 1));

    let mut occurrences: Vec<(NaiveDate, NaiveTime, NaiveTime)> = plan
        .slots
        .iter()
        .flat_map(|slot| {
            slot_dates(plan, slot, per_slot)
                .into_iter()
                .map(|date| (date, slot.start_time, slot.end_time))
        })
        .collect();

    occurrences.sort_unstable();
    if let Some(cap) = plan.max_instances {
        occurrences.truncate(cap as usize);
    }

    if occurrences.is_empty() {
        return Err(invalid("plan produces no sessions"));
    }
    if occurrences.len() > ceiling {
        return Err(invalid(format!("plan produces more than {ceiling} sessions")));
    }

    Ok(occurrences
        .into_iter()
        .zip(1..)
        .map(|((date, start_time, end_time), sequence)| PlannedSession {
            sequence,
            date,
            start_time,
            end_time,
        })
        .collect())
}

/// Plan and sessions as persisted for one batch.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduledBatch {
    pub plan: schedule_plan::Model,
    pub slots: Vec<schedule_slot::Model>,
    pub sessions: Vec<session_instance::Model>,
}

/// Attaches a schedule plan to the offering's current batch and materialises its
/// sessions.
///
/// If the batch already has a plan it is replaced, but only while every existing
/// session is still `upcoming` and nobody holds a live enrollment in the batch;
/// otherwise the schedule is locked. `limits.default_max_instances` is applied to
/// plans that have neither an end date nor their own cap, and plans expanding past
/// `limits.max_plan_instances` are rejected.
///
/// # Errors
/// - `OfferingNotFound` / `NotOwner`
/// - `StaleBatch` when `batch_number` is not the current batch
/// - `InvalidSchedule` from expansion
/// - `ScheduleLocked` when sessions were consumed or enrollments exist
#[instrument(skip(db, plan))]
pub async fn attach_schedule(
    db: &DatabaseConnection,
    offering_id: i64,
    batch_number: i32,
    tutor_id: &str,
    mut plan: PlanSpec,
    limits: ScheduleLimits,
) -> Result<ScheduledBatch> {
    if plan.end_date.is_none() && plan.max_instances.is_none() {
        plan.max_instances = Some(limits.default_max_instances);
    }
    let planned = expand_bounded(&plan, limits.max_plan_instances)?;

    let txn = db.begin().await?;

    let offering = offering::require_offering(&txn, offering_id).await?;
    offering::ensure_owner(&offering, tutor_id)?;
    if offering.batch_number != batch_number {
        return Err(Error::StaleBatch {
            requested: batch_number,
            current: offering.batch_number,
        });
    }

    let existing = sessions_for_batch(&txn, offering_id, batch_number).await?;
    let consumed = existing
        .iter()
        .any(|session| session.status != SessionStatus::Upcoming);
    let enrolled = Enrollment::find()
        .filter(enrollment::Column::OfferingId.eq(offering_id))
        .filter(enrollment::Column::BatchNumber.eq(batch_number))
        .filter(enrollment::Column::Status.ne(EnrollmentStatus::Cancelled))
        .count(&txn)
        .await?;
    if consumed || enrolled > 0 {
        return Err(Error::ScheduleLocked {
            offering_id,
            batch_number,
        });
    }

    // Re-expansion fully replaces the previous plan for this batch.
    SessionInstance::delete_many()
        .filter(session_instance::Column::OfferingId.eq(offering_id))
        .filter(session_instance::Column::BatchNumber.eq(batch_number))
        .exec(&txn)
        .await?;
    if let Some(old_plan) = SchedulePlan::find()
        .filter(schedule_plan::Column::OfferingId.eq(offering_id))
        .filter(schedule_plan::Column::BatchNumber.eq(batch_number))
        .one(&txn)
        .await?
    {
        ScheduleSlot::delete_many()
            .filter(schedule_slot::Column::PlanId.eq(old_plan.id))
            .exec(&txn)
            .await?;
        old_plan.delete(&txn).await?;
    }

    let plan_model = schedule_plan::ActiveModel {
        offering_id: Set(offering_id),
        batch_number: Set(batch_number),
        frequency: Set(plan.frequency),
        start_date: Set(plan.start_date),
        end_date: Set(plan.end_date),
        max_instances: Set(plan.max_instances.map(|n| i32::try_from(n).unwrap_or(i32::MAX))),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    let mut slots = Vec::with_capacity(plan.slots.len());
    for slot in &plan.slots {
        // Both values were range-checked by `expand`
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let (day_of_week, day_of_month) = (
            slot.day_of_week.map(|d| d.num_days_from_monday() as i16),
            slot.day_of_month.map(|d| d as i16),
        );
        let model = schedule_slot::ActiveModel {
            plan_id: Set(plan_model.id),
            day_of_week: Set(day_of_week),
            day_of_month: Set(day_of_month),
            start_time: Set(slot.start_time),
            end_time: Set(slot.end_time),
            ..Default::default()
        }
        .insert(&txn)
        .await?;
        slots.push(model);
    }

    for chunk in planned.chunks(INSERT_CHUNK_ROWS) {
        let rows = chunk.iter().map(|session| session_instance::ActiveModel {
            offering_id: Set(offering_id),
            batch_number: Set(batch_number),
            sequence: Set(i32::try_from(session.sequence).unwrap_or(i32::MAX)),
            date: Set(session.date),
            start_time: Set(session.start_time),
            end_time: Set(session.end_time),
            status: Set(SessionStatus::Upcoming),
            ..Default::default()
        });
        SessionInstance::insert_many(rows).exec(&txn).await?;
    }

    let sessions = sessions_for_batch(&txn, offering_id, batch_number).await?;
    txn.commit().await?;

    info!(
        offering_id,
        batch_number,
        sessions = sessions.len(),
        replaced = !existing.is_empty(),
        "Schedule attached"
    );

    Ok(ScheduledBatch {
        plan: plan_model,
        slots,
        sessions,
    })
}

/// Which batch a read refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchSelector {
    /// Whatever batch is current at read time
    Current,
    /// An explicit, possibly historical, batch
    Number(i32),
}

/// Sessions of one `(offering, batch)` ordered by sequence.
pub async fn sessions_for_batch<C>(
    db: &C,
    offering_id: i64,
    batch_number: i32,
) -> Result<Vec<session_instance::Model>>
where
    C: ConnectionTrait,
{
    SessionInstance::find()
        .filter(session_instance::Column::OfferingId.eq(offering_id))
        .filter(session_instance::Column::BatchNumber.eq(batch_number))
        .order_by_asc(session_instance::Column::Sequence)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Lists the sessions of an offering's batch, resolving `Current` with a single read.
///
/// Returns the resolved batch number alongside the sessions.
pub async fn list_sessions(
    db: &DatabaseConnection,
    offering_id: i64,
    selector: BatchSelector,
) -> Result<(i32, Vec<session_instance::Model>)> {
    let batch_number = match selector {
        BatchSelector::Current => batch::current_batch(db, offering_id).await?,
        BatchSelector::Number(n) => {
            offering::require_offering(db, offering_id).await?;
            n
        }
    };
    let sessions = sessions_for_batch(db, offering_id, batch_number).await?;
    Ok((batch_number, sessions))
}
