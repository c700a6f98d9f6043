//! Reservation booking and provider charge creation.

use std::sync::Arc;

use chrono::Utc;
use domain::{NewReservation, Reservation, ReservationStatus};
use store::{ReservationStore, ReservationTx, StoreError, UniqueKey};

use crate::error::ServiceError;
use crate::services::PaymentGateway;

/// Result of a booking request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Booking {
    pub reservation: Reservation,
    /// False when the external reference was already booked.
    pub created: bool,
}

/// Creates pending reservations and their provider charges.
///
/// Idempotent on the external reference: a repeated request returns the
/// stored reservation, and a reservation left without a charge by an earlier
/// provider failure gets one on the retry.
pub struct BookingService<S: ReservationStore> {
    store: Arc<S>,
    gateway: Arc<dyn PaymentGateway>,
}

impl<S: ReservationStore> Clone for BookingService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            gateway: Arc::clone(&self.gateway),
        }
    }
}

impl<S: ReservationStore> BookingService<S> {
    pub fn new(store: Arc<S>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { store, gateway }
    }

    #[tracing::instrument(skip_all, fields(external_reference = %data.external_reference))]
    pub async fn book(&self, data: NewReservation) -> Result<Booking, ServiceError> {
        let (reservation, created) = match self.existing(&data.external_reference).await? {
            Some(existing) => (existing, false),
            None => self.insert(data).await?,
        };

        if reservation.payment_id.is_some() || reservation.status != ReservationStatus::Pending {
            return Ok(Booking {
                reservation,
                created,
            });
        }

        let charge = self.gateway.create_charge(&reservation).await?;
        let reservation = self.attach(reservation, charge.payment_id).await?;
        let result = if created { "created" } else { "resumed" };
        metrics::counter!("bookings_total", "result" => result).increment(1);
        tracing::info!(reservation_id = %reservation.id, "reservation booked");

        Ok(Booking {
            reservation,
            created,
        })
    }

    async fn existing(&self, reference: &str) -> Result<Option<Reservation>, ServiceError> {
        Ok(self
            .store
            .find_by_external_reference(reference.trim())
            .await?)
    }

    async fn insert(&self, mut data: NewReservation) -> Result<(Reservation, bool), ServiceError> {
        data.external_reference = data.external_reference.trim().to_string();
        let reservation =
            Reservation::new(data, Utc::now()).map_err(ServiceError::InvalidBooking)?;

        match self.store.insert(&reservation).await {
            Ok(()) => Ok((reservation, true)),
            // A concurrent request with the same reference won the insert.
            Err(StoreError::Duplicate(UniqueKey::ReservationExternalReference)) => {
                let winner = self
                    .existing(&reservation.external_reference)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::Store(StoreError::CorruptRow(format!(
                            "reservation {} vanished after a duplicate insert",
                            reservation.external_reference
                        )))
                    })?;
                Ok((winner, false))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn attach(
        &self,
        reservation: Reservation,
        payment_id: domain::PaymentId,
    ) -> Result<Reservation, ServiceError> {
        let mut tx = self.store.begin().await?;
        let mut locked = tx.lock_and_load(reservation.id).await?;

        if let Err(e) = locked.attach_payment(payment_id, Utc::now()) {
            if let Err(rollback) = tx.rollback().await {
                tracing::warn!(error = %rollback, "rollback failed");
            }
            return Err(e.into());
        }

        tx.save(&locked).await?;
        tx.commit().await?;
        Ok(locked)
    }
}
