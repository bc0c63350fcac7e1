use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

use clinic_core::error::ClinicError;

/// Wraps the domain error for the HTTP boundary.
pub struct ApiError(pub ClinicError);

impl From<ClinicError> for ApiError {
    fn from(err: ClinicError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ClinicError::Validation(_)
            | ClinicError::NotAvailable
            | ClinicError::InvalidTransition
            | ClinicError::EmptyCategory(_)
            | ClinicError::ExhaustedPool
            | ClinicError::NotifyUnlinked => StatusCode::BAD_REQUEST,
            ClinicError::AdmissionDenied { .. } => StatusCode::FORBIDDEN,
            ClinicError::NotFound | ClinicError::UserNotRegistered => StatusCode::NOT_FOUND,
            ClinicError::Store(_) | ClinicError::Transient(_) => {
                tracing::error!("Request failed: {}", self.0);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}
