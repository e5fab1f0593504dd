//! Guardian endpoints: spending limits per dependent.

use super::AppState;
use crate::{
    core::spending,
    entities::spending_limit::{LimitPeriod, Model as SpendingLimitModel},
    errors::Result,
};
use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitRequest {
    pub period: LimitPeriod,
    /// `null` removes the cap
    #[serde(default)]
    pub cap: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitView {
    pub guardian_id: String,
    pub dependent_id: String,
    pub period: LimitPeriod,
    pub cap: Option<f64>,
}

impl From<SpendingLimitModel> for LimitView {
    fn from(model: SpendingLimitModel) -> Self {
        Self {
            guardian_id: model.guardian_id,
            dependent_id: model.dependent_id,
            period: model.period,
            cap: model.cap,
        }
    }
}

/// `PUT /guardians/{id}/limits/{dependentId}`
pub async fn set_limit(
    State(state): State<AppState>,
    Path((guardian_id, dependent_id)): Path<(String, String)>,
    Json(request): Json<LimitRequest>,
) -> Result<Json<LimitView>> {
    let limit = spending::set_spending_limit(
        &state.db,
        &guardian_id,
        &dependent_id,
        request.period,
        request.cap,
    )
    .await?;
    Ok(Json(limit.into()))
}
