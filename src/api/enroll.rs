//! Enrollment endpoints: checkout intents, payment reconciliation and enrollment
//! status changes.

use super::AppState;
use crate::{
    core::{
        checkout::{self, CheckoutRequest},
        enrollment,
        reconcile::{self, PaymentSignal},
    },
    entities::enrollment::{EnrollmentStatus, Model as EnrollmentModel, PaymentStatus},
    errors::Result,
};
use axum::{
    Json,
    extract::{Path, State},
};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Response of `POST /enroll/checkout-intent`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutIntentResponse {
    pub checkout_ref: String,
    pub batch_number: i32,
    pub amount: f64,
    pub currency: String,
}

/// Response of `POST /enroll/reconcile`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileResponse {
    pub enrollment_id: i64,
    pub already_processed: bool,
}

/// Enrollment as returned by the API
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentView {
    pub id: i64,
    pub offering_id: i64,
    pub batch_number: i32,
    pub participant_id: String,
    pub guardian_id: Option<String>,
    pub status: EnrollmentStatus,
    pub payment_status: PaymentStatus,
    pub amount: f64,
    pub currency: String,
    pub enrolled_at: DateTime<Utc>,
}

impl From<EnrollmentModel> for EnrollmentView {
    fn from(model: EnrollmentModel) -> Self {
        Self {
            id: model.id,
            offering_id: model.offering_id,
            batch_number: model.batch_number,
            participant_id: model.participant_id,
            guardian_id: model.guardian_id,
            status: model.status,
            payment_status: model.payment_status,
            amount: model.amount,
            currency: model.currency,
            enrolled_at: model.enrolled_at,
        }
    }
}

/// `POST /enroll/checkout-intent`
pub async fn create_checkout_intent(
    State(state): State<AppState>,
    Json(request): Json<CheckoutRequest>,
) -> Result<Json<CheckoutIntentResponse>> {
    let intent = checkout::create_checkout_intent(&state.db, request).await?;
    Ok(Json(CheckoutIntentResponse {
        checkout_ref: intent.checkout_ref,
        batch_number: intent.batch_number,
        amount: intent.amount,
        currency: intent.currency,
    }))
}

/// `POST /enroll/reconcile`
///
/// Callers must redeliver on any error response; a repeat is always safe.
pub async fn reconcile_payment(
    State(state): State<AppState>,
    Json(signal): Json<PaymentSignal>,
) -> Result<Json<ReconcileResponse>> {
    let outcome = reconcile::reconcile(&state.db, signal).await?;
    Ok(Json(ReconcileResponse {
        enrollment_id: outcome.enrollment.id,
        already_processed: outcome.already_processed,
    }))
}

/// `POST /enrollments/{id}/cancel`
pub async fn cancel_enrollment(
    State(state): State<AppState>,
    Path(enrollment_id): Path<i64>,
) -> Result<Json<EnrollmentView>> {
    let updated = enrollment::cancel_enrollment(&state.db, enrollment_id).await?;
    Ok(Json(updated.into()))
}

/// `POST /enrollments/{id}/complete`
pub async fn complete_enrollment(
    State(state): State<AppState>,
    Path(enrollment_id): Path<i64>,
) -> Result<Json<EnrollmentView>> {
    let updated = enrollment::complete_enrollment(&state.db, enrollment_id).await?;
    Ok(Json(updated.into()))
}
