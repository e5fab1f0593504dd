//! HTTP mapping of crate errors.
//!
//! Every error becomes a JSON body `{ "error": KIND, "message": text }`. Business
//! conditions are logged at `warn`, infrastructure failures at `error`.

use crate::errors::{Error, ErrorKind};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::{error, warn};

/// JSON error payload
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorKind,
    pub message: String,
}

/// Status code for each error kind.
#[must_use]
pub const fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidSchedule
        | ErrorKind::InvalidInput
        | ErrorKind::InvalidAmount
        | ErrorKind::PaymentNotConfirmed => StatusCode::BAD_REQUEST,
        ErrorKind::NotOwner => StatusCode::FORBIDDEN,
        ErrorKind::OfferingNotFound
        | ErrorKind::EnrollmentNotFound
        | ErrorKind::SessionNotFound
        | ErrorKind::CheckoutNotFound => StatusCode::NOT_FOUND,
        ErrorKind::StaleBatch
        | ErrorKind::DuplicateEnrollment
        | ErrorKind::ScheduleLocked
        | ErrorKind::InvalidTransition
        | ErrorKind::BatchFull
        | ErrorKind::BatchNotOpen
        | ErrorKind::ReconciliationMismatch => StatusCode::CONFLICT,
        ErrorKind::LimitExceeded => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let status = status_for(kind);

        let message = if kind == ErrorKind::Internal {
            error!(error = %self, "Request failed");
            "Internal server error".to_string()
        } else {
            warn!(?kind, error = %self, "Request rejected");
            self.to_string()
        };

        (
            status,
            Json(ErrorBody {
                error: kind,
                message,
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(ErrorKind::StaleBatch), StatusCode::CONFLICT);
        assert_eq!(status_for(ErrorKind::NotOwner), StatusCode::FORBIDDEN);
        assert_eq!(
            status_for(ErrorKind::LimitExceeded),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(ErrorKind::OfferingNotFound),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_internal_errors_hide_details() {
        let response =
            Error::from(sea_orm::DbErr::Custom("disk on fire".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
