//! Voucher lookup and redemption endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use domain::Voucher;
use serde::Serialize;
use store::ReservationStore;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Serialize)]
pub struct VoucherResponse {
    pub id: String,
    pub reservation_id: String,
    pub code: String,
    pub amount_cents: i64,
    pub valid_until: String,
    pub used: bool,
    pub used_at: Option<String>,
    pub created_at: String,
}

impl From<Voucher> for VoucherResponse {
    fn from(v: Voucher) -> Self {
        Self {
            id: v.id.to_string(),
            reservation_id: v.reservation_id.to_string(),
            code: v.code.to_string(),
            amount_cents: v.amount.cents(),
            valid_until: v.valid_until.to_rfc3339(),
            used: v.used,
            used_at: v.used_at.map(|at| at.to_rfc3339()),
            created_at: v.created_at.to_rfc3339(),
        }
    }
}

/// GET /vouchers/{code}
#[tracing::instrument(skip(state))]
pub async fn get<S: ReservationStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(code): Path<String>,
) -> Result<Json<VoucherResponse>, ApiError> {
    Ok(Json(state.vouchers.get_by_code(&code).await?.into()))
}

/// POST /vouchers/{code}/redeem: single use; a second call is a conflict.
#[tracing::instrument(skip(state))]
pub async fn redeem<S: ReservationStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(code): Path<String>,
) -> Result<Json<VoucherResponse>, ApiError> {
    Ok(Json(state.vouchers.redeem(&code).await?.into()))
}
