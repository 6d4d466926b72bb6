use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::response;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Client input problem. The message is surfaced to the caller verbatim.
    #[error("{0}")]
    Validation(String),
    #[error("Generation failed: {0}")]
    Generation(String),
    #[error("Generation failed: timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),
    #[error("Generation failed: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn invalid_parameter(cause: impl std::fmt::Display) -> Self {
        ServiceError::Validation(format!("Invalid parameter: {cause}"))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
            ServiceError::Generation(_) | ServiceError::Timeout(_) | ServiceError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        response::error(&self.to_string(), self.status_code())
    }
}
