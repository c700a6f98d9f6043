//! API error types with HTTP response mapping.

use std::time::Duration;

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use payments::{GatewayError, ServiceError, WebhookError};

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Webhook rejected or deferred by the reconciliation engine.
    Webhook(WebhookError),
    /// Administrative or voucher operation failure.
    Service(ServiceError),
    /// Bad request from the client.
    BadRequest(String),
    /// No authenticated principal, or rejected credentials.
    Unauthorized,
    /// Token bucket empty for this client.
    RateLimited { retry_after: Duration, secs: u64 },
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Webhook(err) => webhook_error_to_response(err),
            ApiError::Service(err) => {
                let (status, message) = service_error_to_response(err);
                failure(status, message)
            }
            ApiError::BadRequest(msg) => failure(StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized => {
                failure(StatusCode::UNAUTHORIZED, "authentication required".to_string())
            }
            ApiError::RateLimited { retry_after, secs } => {
                let body = serde_json::json!({
                    "success": false,
                    "error": "rate limit exceeded",
                    "retry_after_ms": retry_after.as_millis() as u64,
                });
                let mut response =
                    (StatusCode::TOO_MANY_REQUESTS, axum::Json(body)).into_response();
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(secs));
                response
            }
        }
    }
}

fn failure(status: StatusCode, message: String) -> Response {
    let body = serde_json::json!({ "success": false, "error": message });
    (status, axum::Json(body)).into_response()
}

fn webhook_error_to_response(err: WebhookError) -> Response {
    match &err {
        WebhookError::MissingSignature | WebhookError::MalformedPayload(_) => {
            failure(StatusCode::BAD_REQUEST, err.to_string())
        }
        WebhookError::InvalidSignature => failure(StatusCode::UNAUTHORIZED, err.to_string()),
        WebhookError::Transient(cause) => {
            tracing::warn!(error = %cause, "webhook deferred, provider should retry");
            let body = serde_json::json!({ "success": false, "status": "retry" });
            (StatusCode::SERVICE_UNAVAILABLE, axum::Json(body)).into_response()
        }
        WebhookError::Store(cause) => {
            tracing::error!(error = %cause, "webhook failed on store error");
            failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error".to_string(),
            )
        }
    }
}

fn service_error_to_response(err: ServiceError) -> (StatusCode, String) {
    match &err {
        ServiceError::ReservationNotFound(_) | ServiceError::VoucherNotFound(_) => {
            (StatusCode::NOT_FOUND, err.to_string())
        }
        ServiceError::InvalidVoucherCode(_) | ServiceError::InvalidBooking(_) => {
            (StatusCode::BAD_REQUEST, err.to_string())
        }
        ServiceError::Gateway(GatewayError::Rejected(_)) => {
            tracing::warn!(error = %err, "payment provider rejected the charge");
            (StatusCode::BAD_GATEWAY, err.to_string())
        }
        ServiceError::Transition(_) | ServiceError::Voucher(_) | ServiceError::NotConfirmed { .. } => {
            (StatusCode::CONFLICT, err.to_string())
        }
        _ if err.is_transient() => {
            tracing::warn!(error = %err, "transient service failure");
            (StatusCode::SERVICE_UNAVAILABLE, "temporarily unavailable".to_string())
        }
        _ => {
            tracing::error!(error = %err, "internal server error");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
        }
    }
}

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        ApiError::Webhook(err)
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        ApiError::Service(err)
    }
}
