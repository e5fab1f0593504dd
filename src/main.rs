use chrono::{Duration, Utc};
use class_buddy::{
    api::{self, AppState},
    config::{self, database},
    core::session,
    errors::{Error, Result},
};
use dotenvy::dotenv;
use sea_orm::DatabaseConnection;
use std::net::SocketAddr;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Runs the session status and reminder sweep forever.
async fn run_sweeper(db: DatabaseConnection, interval_secs: u64, lead_minutes: i64) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs.max(1)));
    let lead = Duration::minutes(lead_minutes);
    loop {
        ticker.tick().await;
        if let Err(e) = session::sweep(&db, Utc::now(), lead).await {
            error!("Session sweep failed: {}", e);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file; env vars can also be set externally
    dotenv().ok();

    // 3. Load the application configuration
    let app_config = config::load_default_config()
        .inspect_err(|e| error!("Failed to load configuration: {}", e))?;

    // 4. Connect and create tables
    let db = database::create_connection(&app_config.database.url)
        .await
        .inspect_err(|e| error!("Failed to connect to database: {}", e))?;
    database::create_tables(&db)
        .await
        .inspect(|_| info!("Database initialized successfully."))
        .inspect_err(|e| error!("Failed to initialize database: {}", e))?;

    // 5. Background sweep for session statuses and reminders
    tokio::spawn(run_sweeper(
        db.clone(),
        app_config.reminders.sweep_interval_secs,
        app_config.reminders.lead_minutes,
    ));

    // 6. Serve the API
    let addr: SocketAddr = app_config.server.bind_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);

    let app = api::router(AppState::new(db, app_config));
    axum::serve(listener, app).await.map_err(Error::from)?;

    Ok(())
}
