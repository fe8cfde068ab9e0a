use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

use crate::models::workflow::WorkflowStatus;

/// Token validation failures. Display strings double as the machine-readable
/// codes carried in API responses.
#[derive(Error, Debug)]
pub enum TokenError {
    #[error("INVALID_TOKEN")]
    Invalid,
    #[error("EXPIRED_TOKEN")]
    Expired,
    #[error("ALREADY_USED")]
    AlreadyUsed,
    #[error("EMAIL_MISMATCH")]
    EmailMismatch,
    #[error("TOKEN_STORE_ERROR")]
    Store(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO_ERROR: {0}")]
    Io(#[from] std::io::Error),
    #[error("SERIALIZATION_ERROR: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum EmailError {
    #[error("Daily email limit exceeded")]
    DailyLimitExceeded,
    #[error("Monthly email limit exceeded")]
    MonthlyLimitExceeded,
    #[error("Email transport failed: {0}")]
    Transport(String),
    #[error("EMAIL_STORE_ERROR")]
    Store(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Email(#[from] EmailError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("REVIEW_NOT_FOUND")]
    ReviewNotFound,
    #[error("WORKFLOW_NOT_FOUND")]
    WorkflowNotFound,
    #[error("INVALID_STATE")]
    InvalidState(WorkflowStatus),
}

/// Error surface of the HTTP layer. Every failure renders as
/// `{"success": false, "error": "<code or message>"}`.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("INVALID_SORT_FIELD")]
    InvalidSortField,
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidSortField | ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Workflow(WorkflowError::Token(TokenError::Store(_))) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::Workflow(WorkflowError::Token(_)) => StatusCode::BAD_REQUEST,
            ApiError::Workflow(WorkflowError::ReviewNotFound)
            | ApiError::Workflow(WorkflowError::WorkflowNotFound) => StatusCode::NOT_FOUND,
            ApiError::Workflow(WorkflowError::InvalidState(_)) => StatusCode::CONFLICT,
            ApiError::Workflow(WorkflowError::Email(EmailError::DailyLimitExceeded))
            | ApiError::Workflow(WorkflowError::Email(EmailError::MonthlyLimitExceeded)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "success": false,
            "error": self.to_string(),
        }))
    }
}
