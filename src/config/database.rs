//! Database configuration module.
//!
//! Handles `SQLite` connection and table creation using `SeaORM`. Tables come from
//! `Schema::create_table_from_entity`; the composite and partial uniqueness
//! constraints the ledger relies on are plain `CREATE UNIQUE INDEX` statements,
//! since entity attributes only express single-column uniqueness.

use crate::entities::{
    Batch, CheckoutIntent, Enrollment, NotificationEvent, Offering, PaymentReconciliation,
    SchedulePlan, ScheduleSlot, SessionInstance, SpendingLimit,
};
use crate::errors::Result;
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, EntityTrait, Schema};
use std::path::Path;
use tracing::{debug, info};

/// Fallback when neither config nor environment name a database
pub const DEFAULT_DATABASE_URL: &str = "sqlite://data/class_buddy.sqlite?mode=rwc";

const UNIQUE_INDEXES: &[&str] = &[
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_batches_offering_batch
        ON batches(offering_id, batch_number)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_schedule_plans_offering_batch
        ON schedule_plans(offering_id, batch_number)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_offering_batch_sequence
        ON session_instances(offering_id, batch_number, sequence)",
    // At most one live enrollment per participant and batch; cancelled rows are history.
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_enrollments_live_participant
        ON enrollments(participant_id, offering_id, batch_number)
        WHERE status <> 'cancelled'",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_spending_limits_guardian_dependent
        ON spending_limits(guardian_id, dependent_id)",
];

/// Establishes a connection to the given database URL.
pub async fn create_connection(database_url: &str) -> Result<DatabaseConnection> {
    debug!("Connecting to database: {database_url}");
    if let Some(location) = database_url.strip_prefix("sqlite://") {
        let file = location.split('?').next().unwrap_or_default();
        if let Some(parent) = Path::new(file).parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
    }
    Database::connect(database_url).await.map_err(Into::into)
}

async fn create_table<C, E>(db: &C, entity: E) -> Result<()>
where
    C: ConnectionTrait,
    E: EntityTrait,
{
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);
    let mut statement = schema.create_table_from_entity(entity);
    statement.if_not_exists();
    db.execute(builder.build(&statement)).await?;
    Ok(())
}

/// Creates all tables and uniqueness constraints if they do not exist yet.
///
/// Parents are created before children so foreign keys resolve.
pub async fn create_tables(db: &DatabaseConnection) -> Result<()> {
    create_table(db, Offering).await?;
    create_table(db, Batch).await?;
    create_table(db, SchedulePlan).await?;
    create_table(db, ScheduleSlot).await?;
    create_table(db, SessionInstance).await?;
    create_table(db, Enrollment).await?;
    create_table(db, PaymentReconciliation).await?;
    create_table(db, SpendingLimit).await?;
    create_table(db, CheckoutIntent).await?;
    create_table(db, NotificationEvent).await?;

    for sql in UNIQUE_INDEXES {
        db.execute_unprepared(sql).await?;
    }

    info!("Database tables and unique indexes ensured");
    Ok(())
}
