//! Session lifecycle - Status changes of individual sessions and the periodic sweep
//! that advances them by wall-clock time and queues reminders.
//!
//! Session dates and times are interpreted as UTC.

use crate::{
    core::{notify, offering},
    entities::{
        Enrollment, SessionInstance,
        enrollment::{self, EnrollmentStatus},
        notification_event::NotificationKind,
        session_instance::{self, SessionStatus},
    },
    errors::{Error, Result},
};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use sea_orm::{QueryOrder, Set, prelude::*};
use serde::Serialize;
use tracing::{debug, info, instrument};

/// What one sweep changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepSummary {
    pub started: usize,
    pub completed: usize,
    pub reminders: usize,
}

fn at(date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(time))
}

/// Moves a session to a new status on behalf of the offering's tutor.
///
/// Same-state requests are no-ops.
#[instrument(skip(db))]
pub async fn set_session_status(
    db: &DatabaseConnection,
    session_id: i64,
    tutor_id: &str,
    status: SessionStatus,
) -> Result<session_instance::Model> {
    let session = SessionInstance::find_by_id(session_id)
        .one(db)
        .await?
        .ok_or(Error::SessionNotFound { session_id })?;
    let owner = offering::require_offering(db, session.offering_id).await?;
    offering::ensure_owner(&owner, tutor_id)?;

    if session.status == status {
        return Ok(session);
    }
    if !session.status.can_transition_to(status) {
        return Err(Error::InvalidTransition {
            entity: "session",
            from: session.status.to_value(),
            to: status.to_value(),
        });
    }

    let mut active: session_instance::ActiveModel = session.into();
    active.status = Set(status);
    let updated = active.update(db).await?;

    info!(session_id, ?status, "Session status changed");
    Ok(updated)
}

/// Advances session statuses by the clock.
///
/// Upcoming sessions that have started become ongoing; sessions whose end has
/// passed become completed, including upcoming ones the sweep never saw running.
/// Cancelled sessions are left alone. Returns `(started, completed)`.
pub async fn sync_session_statuses(
    db: &DatabaseConnection,
    now: DateTime<Utc>,
) -> Result<(usize, usize)> {
    let candidates = SessionInstance::find()
        .filter(
            session_instance::Column::Status
                .is_in([SessionStatus::Upcoming, SessionStatus::Ongoing]),
        )
        .filter(session_instance::Column::Date.lte(now.date_naive()))
        .all(db)
        .await?;

    let (mut started, mut completed) = (0, 0);
    for session in candidates {
        let starts = at(session.date, session.start_time);
        let ends = at(session.date, session.end_time);

        let next = if ends <= now {
            SessionStatus::Completed
        } else if starts <= now && session.status == SessionStatus::Upcoming {
            SessionStatus::Ongoing
        } else {
            continue;
        };

        let mut active: session_instance::ActiveModel = session.into();
        active.status = Set(next);
        active.update(db).await?;

        if next == SessionStatus::Completed {
            completed += 1;
        } else {
            started += 1;
        }
    }

    Ok((started, completed))
}

/// Queues a "session reminder due" event for every active participant of each
/// upcoming session starting within `lead` of `now`.
///
/// Deduplicated per (session, participant), so repeated sweeps emit nothing new.
/// Returns the number of events written.
pub async fn emit_due_reminders(
    db: &DatabaseConnection,
    now: DateTime<Utc>,
    lead: Duration,
) -> Result<usize> {
    let horizon = now + lead;
    let sessions = SessionInstance::find()
        .filter(session_instance::Column::Status.eq(SessionStatus::Upcoming))
        .filter(session_instance::Column::Date.between(now.date_naive(), horizon.date_naive()))
        .order_by_asc(session_instance::Column::Date)
        .order_by_asc(session_instance::Column::StartTime)
        .all(db)
        .await?;

    let mut emitted = 0;
    for session in sessions {
        let starts = at(session.date, session.start_time);
        if starts <= now || starts > horizon {
            continue;
        }

        let participants = Enrollment::find()
            .filter(enrollment::Column::OfferingId.eq(session.offering_id))
            .filter(enrollment::Column::BatchNumber.eq(session.batch_number))
            .filter(enrollment::Column::Status.eq(EnrollmentStatus::Active))
            .all(db)
            .await?;

        for participant in participants {
            let inserted = notify::emit(
                db,
                notify::NewEvent {
                    kind: NotificationKind::SessionReminderDue,
                    dedupe_key: format!("reminder:{}:{}", session.id, participant.participant_id),
                    offering_id: session.offering_id,
                    participant_id: participant.participant_id,
                    enrollment_id: Some(participant.id),
                    session_id: Some(session.id),
                    occurs_at: starts,
                },
            )
            .await?;
            if inserted {
                emitted += 1;
            }
        }
    }

    Ok(emitted)
}

/// One pass of the background task: status sync, then reminders.
#[instrument(skip(db))]
pub async fn sweep(
    db: &DatabaseConnection,
    now: DateTime<Utc>,
    lead: Duration,
) -> Result<SweepSummary> {
    let (started, completed) = sync_session_statuses(db, now).await?;
    let reminders = emit_due_reminders(db, now, lead).await?;

    let summary = SweepSummary {
        started,
        completed,
        reminders,
    };
    if summary == SweepSummary::default() {
        debug!("Sweep found nothing to do");
    } else {
        info!(started, completed, reminders, "Sweep applied changes");
    }
    Ok(summary)
}
