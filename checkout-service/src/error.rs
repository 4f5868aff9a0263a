use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use payment_gateway::{webhook::WebhookError, GatewayError};
use serde::Serialize;
use shared::{MoneyError, StatusParseError, TransitionError};
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("payment gateway error: {0}")]
    Gateway(String),
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Unauthorized(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl CheckoutError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            CheckoutError::Validation(_) => StatusCode::BAD_REQUEST,
            CheckoutError::NotFound(_) => StatusCode::NOT_FOUND,
            CheckoutError::Gateway(_) => StatusCode::BAD_GATEWAY,
            CheckoutError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CheckoutError::Conflict(_) => StatusCode::CONFLICT,
            CheckoutError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        }
    }
}

impl From<diesel::result::Error> for CheckoutError {
    fn from(err: diesel::result::Error) -> Self {
        match err {
            diesel::result::Error::NotFound => CheckoutError::NotFound("record not found".to_string()),
            other => CheckoutError::Persistence(other.to_string()),
        }
    }
}

impl From<GatewayError> for CheckoutError {
    fn from(err: GatewayError) -> Self {
        CheckoutError::Gateway(err.to_string())
    }
}

impl From<TransitionError> for CheckoutError {
    fn from(err: TransitionError) -> Self {
        CheckoutError::Conflict(err.to_string())
    }
}

impl From<MoneyError> for CheckoutError {
    fn from(err: MoneyError) -> Self {
        CheckoutError::Validation(err.to_string())
    }
}

// A stored status we cannot read back means the row is corrupt, not the request.
impl From<StatusParseError> for CheckoutError {
    fn from(err: StatusParseError) -> Self {
        CheckoutError::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for CheckoutError {
    fn from(err: serde_json::Error) -> Self {
        CheckoutError::Persistence(format!("failed to encode event: {}", err))
    }
}

impl From<WebhookError> for CheckoutError {
    fn from(err: WebhookError) -> Self {
        match err {
            WebhookError::InvalidPayload(_) => CheckoutError::Validation(err.to_string()),
            other => CheckoutError::Unauthorized(other.to_string()),
        }
    }
}

impl IntoResponse for CheckoutError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(%status, "request failed: {}", self);
        }
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
