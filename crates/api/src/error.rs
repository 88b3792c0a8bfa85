//! API error type and HTTP response mapping.
//!
//! Webhook endpoints answer 400 for anything the provider should fix
//! (signature, payload shape) and 500 for anything on our side, so the
//! provider keeps redelivering until the record is written.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use coinchart_billing::BillingError;
use serde_json::json;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid webhook signature: {0}")]
    InvalidSignature(&'static str),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("{0}")]
    NotFound(&'static str),

    #[error(transparent)]
    Billing(#[from] BillingError),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidSignature(_) | ApiError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Billing(BillingError::InvalidPayload(_)) => StatusCode::BAD_REQUEST,
            ApiError::Billing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::warn!(error = %self, status = %status, "request rejected");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
