use api_shared::{AuthError, ErrorRes};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use journal_core::RecordError;
use journal_messaging::PublishError;

/// Everything a handler can fail with, mapped onto an HTTP status.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error(transparent)]
    Publish(#[from] PublishError),
    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Record(RecordError::InvalidInput(_)) => StatusCode::BAD_REQUEST,
            ApiError::Record(RecordError::DuplicatePersonalNumber(_)) => StatusCode::CONFLICT,
            ApiError::Record(
                RecordError::PatientNotFound(_)
                | RecordError::JournalEntryNotFound(_)
                | RecordError::MissingPatient(_),
            ) => StatusCode::NOT_FOUND,
            ApiError::Record(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Publish(PublishError::Channel(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Publish(PublishError::Encode(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Auth(AuthError::MissingToken | AuthError::InvalidToken) => {
                StatusCode::UNAUTHORIZED
            }
            ApiError::Auth(AuthError::Forbidden(_)) => StatusCode::FORBIDDEN,
            ApiError::Auth(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("request failed: {:?}", self);
            "Internal error".to_string()
        } else {
            tracing::debug!(status = status.as_u16(), "request rejected: {}", self);
            self.to_string()
        };
        (status, Json(ErrorRes { error })).into_response()
    }
}
