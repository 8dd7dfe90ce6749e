//! Mapping of request failures onto HTTP responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use core_pipeline::InputError;
use llm_bridge::{AggregatedResult, ServiceError};
use serde::Serialize;

/// Error returned by request handlers
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Service(ServiceError),
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        Self::Service(err)
    }
}

impl From<InputError> for ApiError {
    fn from(err: InputError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    models: Option<AggregatedResult>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error = match &self {
            Self::BadRequest(message) => message.clone(),
            Self::Service(err) => err.to_string(),
        };

        let (status, models) = match self {
            Self::BadRequest(_) | Self::Service(ServiceError::Invalid(_)) => {
                (StatusCode::BAD_REQUEST, None)
            }
            Self::Service(ServiceError::AllModelsFailed(result)) => {
                (StatusCode::SERVICE_UNAVAILABLE, Some(result))
            }
            Self::Service(ServiceError::Internal) => (StatusCode::INTERNAL_SERVER_ERROR, None),
        };

        (status, Json(ErrorBody { error, models })).into_response()
    }
}
