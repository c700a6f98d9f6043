//! Public booking endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use domain::NewReservation;
use serde::Deserialize;
use store::ReservationStore;

use crate::error::ApiError;
use crate::routes::admin::ReservationResponse;
use crate::state::AppState;

#[derive(Deserialize, Debug)]
pub struct BookRequest {
    pub external_reference: String,
    pub customer_name: String,
    pub customer_email: String,
    pub party_size: u32,
}

/// POST /reservations: book a reservation and create its deposit charge.
///
/// Replaying an external reference returns the stored reservation with 200.
#[tracing::instrument(skip_all, fields(external_reference = %req.external_reference))]
pub async fn create<S: ReservationStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<BookRequest>,
) -> Result<(StatusCode, Json<ReservationResponse>), ApiError> {
    let booking = state
        .bookings
        .book(NewReservation {
            external_reference: req.external_reference,
            customer_name: req.customer_name,
            customer_email: req.customer_email,
            party_size: req.party_size,
            amount: state.booking_deposit,
        })
        .await?;

    let status = if booking.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(booking.reservation.into())))
}
