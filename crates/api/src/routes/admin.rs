//! Administrative reservation endpoints. All require an authenticated principal.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use common::ReservationId;
use domain::{Reservation, ReservationStatus};
use payments::ReservationStats;
use serde::{Deserialize, Serialize};
use store::{ReservationQuery, ReservationStore};

use crate::error::ApiError;
use crate::routes::vouchers::VoucherResponse;
use crate::state::AppState;

// -- Request types --

#[derive(Deserialize, Debug, Default)]
pub struct ListParams {
    pub status: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Deserialize, Debug, Default)]
pub struct RejectRequest {
    pub reason: Option<String>,
}

// -- Response types --

#[derive(Serialize)]
pub struct ReservationResponse {
    pub id: String,
    pub payment_id: Option<String>,
    pub external_reference: String,
    pub customer_name: String,
    pub customer_email: String,
    pub party_size: u32,
    pub amount_cents: i64,
    pub status: ReservationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Reservation> for ReservationResponse {
    fn from(r: Reservation) -> Self {
        Self {
            id: r.id.to_string(),
            payment_id: r.payment_id.map(|p| p.as_str().to_string()),
            external_reference: r.external_reference,
            customer_name: r.customer_name,
            customer_email: r.customer_email,
            party_size: r.party_size,
            amount_cents: r.amount.cents(),
            status: r.status,
            rejection_reason: r.rejection_reason,
            created_at: r.created_at.to_rfc3339(),
            updated_at: r.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
pub struct ReservationListResponse {
    pub reservations: Vec<ReservationResponse>,
    pub limit: usize,
    pub offset: usize,
}

// -- Handlers --

/// GET /admin/reservations: page through reservations, newest first.
#[tracing::instrument(skip(state))]
pub async fn list<S: ReservationStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Query(params): Query<ListParams>,
) -> Result<Json<ReservationListResponse>, ApiError> {
    let mut query = ReservationQuery::new();
    if let Some(status) = params.status.as_deref().filter(|s| !s.is_empty()) {
        let status: ReservationStatus = status
            .parse()
            .map_err(|e: domain::UnknownStatus| ApiError::BadRequest(e.to_string()))?;
        query = query.status(status);
    }
    if let Some(limit) = params.limit {
        query = query.limit(limit);
    }
    if let Some(offset) = params.offset {
        query = query.offset(offset);
    }

    let (limit, offset) = (query.effective_limit(), query.effective_offset());
    let reservations = state.reservations.list(query).await?;

    Ok(Json(ReservationListResponse {
        reservations: reservations.into_iter().map(Into::into).collect(),
        limit,
        offset,
    }))
}

/// GET /admin/reservations/{id}
#[tracing::instrument(skip(state))]
pub async fn get<S: ReservationStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<ReservationResponse>, ApiError> {
    let id = parse_reservation_id(&id)?;
    Ok(Json(state.reservations.get(id).await?.into()))
}

/// POST /admin/reservations/{id}/approve
#[tracing::instrument(skip(state))]
pub async fn approve<S: ReservationStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<ReservationResponse>, ApiError> {
    let id = parse_reservation_id(&id)?;
    Ok(Json(state.reservations.approve(id).await?.into()))
}

/// POST /admin/reservations/{id}/reject: body `{"reason": "..."}` is optional.
#[tracing::instrument(skip(state, body))]
pub async fn reject<S: ReservationStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    body: Option<Json<RejectRequest>>,
) -> Result<Json<ReservationResponse>, ApiError> {
    let id = parse_reservation_id(&id)?;
    let reason = body.and_then(|Json(req)| req.reason);
    Ok(Json(state.reservations.reject(id, reason).await?.into()))
}

/// POST /admin/reservations/{id}/cancel
#[tracing::instrument(skip(state))]
pub async fn cancel<S: ReservationStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<ReservationResponse>, ApiError> {
    let id = parse_reservation_id(&id)?;
    Ok(Json(state.reservations.cancel(id).await?.into()))
}

/// POST /admin/reservations/{id}/voucher: issue a missing voucher.
#[tracing::instrument(skip(state))]
pub async fn reissue_voucher<S: ReservationStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<VoucherResponse>, ApiError> {
    let id = parse_reservation_id(&id)?;
    Ok(Json(state.reservations.reissue_voucher(id).await?.into()))
}

/// GET /admin/stats: reservation counts per status.
#[tracing::instrument(skip(state))]
pub async fn stats<S: ReservationStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<ReservationStats>, ApiError> {
    Ok(Json(state.reservations.stats().await?))
}

fn parse_reservation_id(s: &str) -> Result<ReservationId, ApiError> {
    s.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid reservation id: {e}")))
}
