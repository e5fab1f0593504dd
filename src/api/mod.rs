//! HTTP API - The external surface of the scheduling and enrollment core.
//!
//! Handlers only translate between JSON and `core` calls; all rules live in `core`.
//! Authentication is handled upstream, so tutor identity arrives as `tutorId` in
//! request bodies.

/// Enrollment, checkout and reconciliation handlers
pub mod enroll;
/// `IntoResponse` for crate errors
pub mod error;
/// Guardian spending-limit handlers
pub mod guardians;
/// Offering, schedule and batch handlers
pub mod offerings;

use crate::{config::AppConfig, errors::Result};
use axum::{
    Json, Router,
    extract::State,
    routing::{get, post, put},
};
use sea_orm::DatabaseConnection;
use serde_json::{Value, json};
use std::sync::Arc;

/// Shared state for all handlers
#[derive(Debug, Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Bundles a connection and configuration into handler state.
    #[must_use]
    pub fn new(db: DatabaseConnection, config: AppConfig) -> Self {
        Self {
            db,
            config: Arc::new(config),
        }
    }
}

/// `GET /health`
async fn health(State(state): State<AppState>) -> Result<Json<Value>> {
    state.db.ping().await?;
    Ok(Json(json!({ "status": "ok" })))
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/enroll/checkout-intent", post(enroll::create_checkout_intent))
        .route("/enroll/reconcile", post(enroll::reconcile_payment))
        .route("/offerings", post(offerings::create_offering))
        .route("/offerings/:id/status", post(offerings::set_status))
        .route("/offerings/:id/schedule", put(offerings::attach_schedule))
        .route("/offerings/:id/next-batch", post(offerings::next_batch))
        .route("/offerings/:id/sessions", get(offerings::list_sessions))
        .route("/enrollments/:id/cancel", post(enroll::cancel_enrollment))
        .route("/enrollments/:id/complete", post(enroll::complete_enrollment))
        .route(
            "/guardians/:id/limits/:dependent_id",
            put(guardians::set_limit),
        )
        .with_state(state)
}
