//! Payment provider webhook endpoints.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use chrono::Utc;
use common::ReservationId;
use payments::{AckStatus, SIGNATURE_HEADER};
use serde::Serialize;
use store::ReservationStore;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Serialize)]
pub struct WebhookResponse {
    pub success: bool,
    pub status: AckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reservation_id: Option<ReservationId>,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub success: bool,
    pub status: &'static str,
    pub timestamp: i64,
}

/// POST /webhooks/asaas: verify and apply a provider notification.
///
/// The body is taken as raw bytes; the signature covers them exactly.
pub async fn receive<S: ReservationStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .map(|value| value.to_str().unwrap_or_default());

    let ack = state.engine.handle(&body, signature).await?;

    Ok(Json(WebhookResponse {
        success: true,
        status: ack.status,
        reservation_id: ack.reservation_id,
    }))
}

/// GET /webhooks/asaas/status: liveness check for the provider dashboard.
pub async fn status() -> Json<StatusResponse> {
    Json(StatusResponse {
        success: true,
        status: "webhook handler is operational",
        timestamp: Utc::now().timestamp(),
    })
}
