use application::ApplicationError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use domain::DomainError;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                error: message.into(),
                code,
            },
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<DomainError> for ApiError {
    fn from(error: DomainError) -> Self {
        match error {
            DomainError::ValidationError { field, message } => ApiError::new(
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                format!("{field}: {message}"),
            ),
            DomainError::NotFound { resource_type, .. } => ApiError::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("{resource_type} not found"),
            ),
            DomainError::InvalidState { message } => {
                ApiError::new(StatusCode::BAD_REQUEST, "INVALID_STATE", message)
            }
            DomainError::Conflict { message } => {
                ApiError::new(StatusCode::CONFLICT, "CONFLICT", message)
            }
        }
    }
}

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        match error {
            ApplicationError::Domain(err) => err.into(),
            ApplicationError::Repository(err) => {
                // 真实原因只写入日志
                tracing::error!(error = %err, "存储操作失败");
                ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STORE_ERROR",
                    "internal server error",
                )
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
