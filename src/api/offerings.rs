//! Offering endpoints: authoring, status, schedules, batches and session listings.

use super::AppState;
use crate::{
    core::{
        batch, offering,
        offering::NewOffering,
        schedule::{self, BatchSelector, PlanSpec},
    },
    entities::{
        offering::{Model as OfferingModel, OfferingStatus},
        session_instance::{Model as SessionModel, SessionStatus},
    },
    errors::{Error, Result},
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// Offering as returned by the API
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferingView {
    pub id: i64,
    pub tutor_id: String,
    pub title: String,
    pub subject: String,
    pub price: f64,
    pub monthly_charge: Option<f64>,
    pub currency: String,
    pub max_participants: i32,
    pub status: OfferingStatus,
    pub batch_number: i32,
}

impl From<OfferingModel> for OfferingView {
    fn from(model: OfferingModel) -> Self {
        Self {
            id: model.id,
            tutor_id: model.tutor_id,
            title: model.title,
            subject: model.subject,
            price: model.price,
            monthly_charge: model.monthly_charge,
            currency: model.currency,
            max_participants: model.max_participants,
            status: model.status,
            batch_number: model.batch_number,
        }
    }
}

/// Session as returned by the API
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub id: i64,
    pub sequence: i32,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub status: SessionStatus,
}

impl From<SessionModel> for SessionView {
    fn from(model: SessionModel) -> Self {
        Self {
            id: model.id,
            sequence: model.sequence,
            date: model.date,
            start_time: model.start_time,
            end_time: model.end_time,
            status: model.status,
        }
    }
}

/// Sessions of one batch
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionsResponse {
    pub batch_number: i32,
    pub sessions: Vec<SessionView>,
}

/// Body of the tutor-only endpoints that take nothing else
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TutorRequest {
    pub tutor_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRequest {
    pub tutor_id: String,
    pub status: OfferingStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRequest {
    pub tutor_id: String,
    /// Defaults to the offering's current batch
    #[serde(default)]
    pub batch_number: Option<i32>,
    pub plan: PlanSpec,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NextBatchResponse {
    pub batch_number: i32,
}

#[derive(Debug, Deserialize)]
pub struct SessionsQuery {
    /// `current` or a batch number
    pub batch: Option<String>,
}

fn parse_selector(raw: Option<&str>) -> Result<BatchSelector> {
    match raw.map(str::trim) {
        None | Some("current" | "") => Ok(BatchSelector::Current),
        Some(value) => value
            .parse::<i32>()
            .ok()
            .filter(|n| *n >= 1)
            .map(BatchSelector::Number)
            .ok_or_else(|| Error::InvalidInput {
                message: format!("batch must be 'current' or a positive number, got '{value}'"),
            }),
    }
}

/// `POST /offerings`
pub async fn create_offering(
    State(state): State<AppState>,
    Json(new): Json<NewOffering>,
) -> Result<(StatusCode, Json<OfferingView>)> {
    let created = offering::create_offering(&state.db, new).await?;
    Ok((StatusCode::CREATED, Json(created.into())))
}

/// `POST /offerings/{id}/status`
pub async fn set_status(
    State(state): State<AppState>,
    Path(offering_id): Path<i64>,
    Json(request): Json<StatusRequest>,
) -> Result<Json<OfferingView>> {
    let updated =
        offering::set_offering_status(&state.db, offering_id, &request.tutor_id, request.status)
            .await?;
    Ok(Json(updated.into()))
}

/// `PUT /offerings/{id}/schedule`
pub async fn attach_schedule(
    State(state): State<AppState>,
    Path(offering_id): Path<i64>,
    Json(request): Json<ScheduleRequest>,
) -> Result<Json<SessionsResponse>> {
    let batch_number = match request.batch_number {
        Some(n) => n,
        None => batch::current_batch(&state.db, offering_id).await?,
    };
    let scheduled = schedule::attach_schedule(
        &state.db,
        offering_id,
        batch_number,
        &request.tutor_id,
        request.plan,
        state.config.schedule.limits(),
    )
    .await?;

    Ok(Json(SessionsResponse {
        batch_number,
        sessions: scheduled.sessions.into_iter().map(Into::into).collect(),
    }))
}

/// `POST /offerings/{id}/next-batch`
pub async fn next_batch(
    State(state): State<AppState>,
    Path(offering_id): Path<i64>,
    Json(request): Json<TutorRequest>,
) -> Result<Json<NextBatchResponse>> {
    let batch_number = batch::create_next_batch(&state.db, offering_id, &request.tutor_id).await?;
    Ok(Json(NextBatchResponse { batch_number }))
}

/// `GET /offerings/{id}/sessions?batch=current|N`
pub async fn list_sessions(
    State(state): State<AppState>,
    Path(offering_id): Path<i64>,
    Query(query): Query<SessionsQuery>,
) -> Result<Json<SessionsResponse>> {
    let selector = parse_selector(query.batch.as_deref())?;
    let (batch_number, sessions) = schedule::list_sessions(&state.db, offering_id, selector).await?;
    Ok(Json(SessionsResponse {
        batch_number,
        sessions: sessions.into_iter().map(Into::into).collect(),
    }))
}
