//! API error type and its HTTP mapping.
//!
//! The webhook endpoint is machine-to-machine: status codes and server logs
//! are the whole failure surface. 400 means the delivery is terminally
//! rejected; 500 invites the provider to redeliver.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use invisifeed_billing::BillingError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A deployment fault (e.g. missing secret). Answered with a generic
    /// body so nothing about the configuration leaks.
    #[error("server configuration error")]
    Configuration,

    #[error("internal error: {0}")]
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::MissingWebhookSecret => ApiError::Configuration,
            BillingError::SignatureMismatch => {
                ApiError::BadRequest("invalid webhook signature".to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message.clone()),
            ApiError::Configuration => {
                tracing::error!("Request failed on a server configuration fault");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
            ApiError::Internal(message) => {
                tracing::error!(error = %message, "Request failed on an internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn billing_errors_map_to_the_right_status() {
        let config: ApiError = BillingError::MissingWebhookSecret.into();
        assert!(matches!(config, ApiError::Configuration));

        let bad: ApiError = BillingError::SignatureMismatch.into();
        assert!(matches!(bad, ApiError::BadRequest(_)));

        let internal: ApiError =
            BillingError::InvalidPayload("shape".to_string()).into();
        assert!(matches!(internal, ApiError::Internal(_)));
    }
}
