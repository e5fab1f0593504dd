//! Notification outbox - Events the core emits for an external dispatcher.
//!
//! Emission is idempotent: each event carries a dedupe key and a second insert with
//! the same key is silently dropped. Delivery itself happens elsewhere; the
//! dispatcher polls `pending_events` and acknowledges with `mark_dispatched`.

use crate::{
    entities::{
        NotificationEvent,
        notification_event::{self, NotificationKind},
    },
    errors::Result,
};
use chrono::{DateTime, Utc};
use sea_orm::{
    QueryOrder, QuerySelect, Set,
    prelude::*,
    sea_query::{Expr, OnConflict},
};
use tracing::{debug, instrument};

/// An event about to be written to the outbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    pub kind: NotificationKind,
    pub dedupe_key: String,
    pub offering_id: i64,
    pub participant_id: String,
    pub enrollment_id: Option<i64>,
    pub session_id: Option<i64>,
    pub occurs_at: DateTime<Utc>,
}

/// Writes an event unless one with the same dedupe key already exists.
///
/// Returns whether a row was inserted.
pub async fn emit<C>(db: &C, event: NewEvent) -> Result<bool>
where
    C: ConnectionTrait,
{
    let key = event.dedupe_key.clone();
    let row = notification_event::ActiveModel {
        kind: Set(event.kind),
        dedupe_key: Set(event.dedupe_key),
        offering_id: Set(event.offering_id),
        participant_id: Set(event.participant_id),
        enrollment_id: Set(event.enrollment_id),
        session_id: Set(event.session_id),
        occurs_at: Set(event.occurs_at),
        created_at: Set(Utc::now()),
        dispatched_at: Set(None),
        ..Default::default()
    };

    let inserted = NotificationEvent::insert(row)
        .on_conflict(
            OnConflict::column(notification_event::Column::DedupeKey)
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;

    debug!(dedupe_key = %key, inserted, "Notification event emitted");
    Ok(inserted > 0)
}

/// Undispatched events, oldest first.
pub async fn pending_events(
    db: &DatabaseConnection,
    limit: u64,
) -> Result<Vec<notification_event::Model>> {
    NotificationEvent::find()
        .filter(notification_event::Column::DispatchedAt.is_null())
        .order_by_asc(notification_event::Column::Id)
        .limit(limit)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Marks events as delivered. Already-dispatched ids are left untouched.
///
/// Returns the number of events newly marked.
#[instrument(skip(db, ids), fields(count = ids.len()))]
pub async fn mark_dispatched(db: &DatabaseConnection, ids: &[i64]) -> Result<u64> {
    if ids.is_empty() {
        return Ok(0);
    }

    let result = NotificationEvent::update_many()
        .col_expr(
            notification_event::Column::DispatchedAt,
            Expr::value(Some(Utc::now())),
        )
        .filter(notification_event::Column::Id.is_in(ids.iter().copied()))
        .filter(notification_event::Column::DispatchedAt.is_null())
        .exec(db)
        .await?;

    Ok(result.rows_affected)
}
