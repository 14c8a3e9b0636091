//! HTTP error mapping

use axum::{http::StatusCode, Json};
use serde::Serialize;

use chainpay_billing::BillingError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Handler error: status plus JSON body
pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn api_error(status: StatusCode, code: &str, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.into(),
        }),
    )
}

pub fn bad_request(error: impl Into<String>) -> ApiError {
    api_error(StatusCode::BAD_REQUEST, "INVALID_INPUT", error)
}

pub const fn status_for(err: &BillingError) -> StatusCode {
    match err {
        BillingError::TransactionNotFound(_)
        | BillingError::EventNotFound { .. }
        | BillingError::MerchantNotFound(_)
        | BillingError::PlanNotFound(_)
        | BillingError::SubscriptionNotFound(_)
        | BillingError::PaymentNotFound(_) => StatusCode::NOT_FOUND,
        BillingError::NotDue { .. } | BillingError::Validation(_) => StatusCode::BAD_REQUEST,
        BillingError::InvalidTransition { .. } => StatusCode::CONFLICT,
        BillingError::Unconfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
        BillingError::UpstreamFailure(_) => StatusCode::BAD_GATEWAY,
    }
}

impl From<BillingError> for ErrorResponse {
    fn from(err: BillingError) -> Self {
        Self {
            error: err.user_message(),
            code: err.code().into(),
        }
    }
}

/// Map a billing error, logging server-side failures
pub fn billing_error(err: BillingError) -> ApiError {
    let status = status_for(&err);
    if status.is_server_error() {
        tracing::error!(code = err.code(), "Request failed: {}", err);
    } else {
        tracing::debug!(code = err.code(), "Request rejected: {}", err);
    }
    (status, Json(err.into()))
}
