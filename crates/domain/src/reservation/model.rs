//! Reservation entity.

use chrono::{DateTime, Utc};
use common::ReservationId;
use serde::{Deserialize, Serialize};

use super::{Money, PaymentId, ReservationError, ReservationStatus};

/// Data captured at booking time.
#[derive(Debug, Clone)]
pub struct NewReservation {
    pub external_reference: String,
    pub customer_name: String,
    pub customer_email: String,
    pub party_size: u32,
    pub amount: Money,
}

/// A table reservation and its payment correlation.
///
/// The status is only ever changed through the transition methods below,
/// which enforce the lifecycle in [`ReservationStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,

    /// Provider payment identifier; `None` until the charge is created.
    pub payment_id: Option<PaymentId>,

    /// Caller-assigned reference, unique, used for idempotent charge creation.
    pub external_reference: String,

    pub customer_name: String,
    pub customer_email: String,
    pub party_size: u32,
    pub amount: Money,
    pub status: ReservationStatus,

    /// Reason recorded by an administrator when rejecting.
    pub rejection_reason: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    /// Creates a pending reservation, validating the booking data.
    pub fn new(data: NewReservation, now: DateTime<Utc>) -> Result<Self, ReservationError> {
        if data.external_reference.trim().is_empty() {
            return Err(ReservationError::ExternalReferenceRequired);
        }
        if data.party_size == 0 {
            return Err(ReservationError::InvalidPartySize {
                party_size: data.party_size,
            });
        }
        if data.amount.is_negative() {
            return Err(ReservationError::InvalidAmount {
                cents: data.amount.cents(),
            });
        }

        Ok(Self {
            id: ReservationId::new(),
            payment_id: None,
            external_reference: data.external_reference,
            customer_name: data.customer_name,
            customer_email: data.customer_email,
            party_size: data.party_size,
            amount: data.amount,
            status: ReservationStatus::Pending,
            rejection_reason: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Records the provider's payment identifier once the charge exists.
    ///
    /// Re-attaching the same identifier is a no-op; replacing a different one
    /// is refused so that webhook correlation never silently changes.
    pub fn attach_payment(
        &mut self,
        payment_id: PaymentId,
        now: DateTime<Utc>,
    ) -> Result<(), ReservationError> {
        match &self.payment_id {
            Some(existing) if *existing == payment_id => Ok(()),
            Some(existing) => Err(ReservationError::PaymentAlreadyAttached {
                existing: existing.clone(),
            }),
            None => {
                self.payment_id = Some(payment_id);
                self.updated_at = now;
                Ok(())
            }
        }
    }

    /// Applies a provider payment confirmation.
    ///
    /// Returns [`ReservationError::AlreadyConfirmed`] on a replay and
    /// [`ReservationError::InvalidStateTransition`] when an administrator has
    /// already moved the reservation out of `pending`.
    pub fn confirm_payment(&mut self, now: DateTime<Utc>) -> Result<(), ReservationError> {
        if self.status == ReservationStatus::Confirmed {
            return Err(ReservationError::AlreadyConfirmed);
        }
        self.transition(
            ReservationStatus::Confirmed,
            self.status.can_confirm_payment(),
            "confirm payment",
            now,
        )
    }

    /// Approves a pending reservation.
    pub fn approve(&mut self, now: DateTime<Utc>) -> Result<(), ReservationError> {
        self.transition(
            ReservationStatus::Approved,
            self.status.can_approve(),
            "approve",
            now,
        )
    }

    /// Rejects a pending reservation, keeping the optional reason.
    pub fn reject(
        &mut self,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), ReservationError> {
        self.transition(
            ReservationStatus::Rejected,
            self.status.can_reject(),
            "reject",
            now,
        )?;
        self.rejection_reason = reason.filter(|r| !r.trim().is_empty());
        Ok(())
    }

    /// Cancels the reservation.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), ReservationError> {
        self.transition(
            ReservationStatus::Cancelled,
            self.status.can_cancel(),
            "cancel",
            now,
        )
    }

    fn transition(
        &mut self,
        to: ReservationStatus,
        allowed: bool,
        action: &'static str,
        now: DateTime<Utc>,
    ) -> Result<(), ReservationError> {
        if !allowed {
            return Err(ReservationError::InvalidStateTransition {
                current: self.status,
                action,
            });
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn booking() -> NewReservation {
        NewReservation {
            external_reference: "ref-001".to_string(),
            customer_name: "Ana".to_string(),
            customer_email: "ana@example.com".to_string(),
            party_size: 4,
            amount: Money::from_cents(20000),
        }
    }

    fn pending() -> Reservation {
        Reservation::new(booking(), Utc::now()).unwrap()
    }

    #[test]
    fn new_reservation_is_pending_without_payment() {
        let reservation = pending();
        assert_eq!(reservation.status, ReservationStatus::Pending);
        assert!(reservation.payment_id.is_none());
    }

    #[test]
    fn new_reservation_validates_booking() {
        let mut data = booking();
        data.party_size = 0;
        assert!(matches!(
            Reservation::new(data, Utc::now()),
            Err(ReservationError::InvalidPartySize { party_size: 0 })
        ));

        let mut data = booking();
        data.external_reference = "  ".to_string();
        assert!(matches!(
            Reservation::new(data, Utc::now()),
            Err(ReservationError::ExternalReferenceRequired)
        ));

        let mut data = booking();
        data.amount = Money::from_cents(-1);
        assert!(matches!(
            Reservation::new(data, Utc::now()),
            Err(ReservationError::InvalidAmount { cents: -1 })
        ));
    }

    #[test]
    fn attach_payment_is_idempotent_but_not_replaceable() {
        let mut reservation = pending();
        reservation
            .attach_payment(PaymentId::from("P1"), Utc::now())
            .unwrap();
        reservation
            .attach_payment(PaymentId::from("P1"), Utc::now())
            .unwrap();
        assert!(matches!(
            reservation.attach_payment(PaymentId::from("P2"), Utc::now()),
            Err(ReservationError::PaymentAlreadyAttached { .. })
        ));
        assert_eq!(reservation.payment_id, Some(PaymentId::from("P1")));
    }

    #[test]
    fn confirm_payment_moves_pending_to_confirmed() {
        let mut reservation = pending();
        let later = reservation.created_at + chrono::Duration::seconds(5);
        reservation.confirm_payment(later).unwrap();
        assert_eq!(reservation.status, ReservationStatus::Confirmed);
        assert_eq!(reservation.updated_at, later);
    }

    #[test]
    fn confirm_payment_twice_reports_already_confirmed() {
        let mut reservation = pending();
        reservation.confirm_payment(Utc::now()).unwrap();
        assert!(matches!(
            reservation.confirm_payment(Utc::now()),
            Err(ReservationError::AlreadyConfirmed)
        ));
        assert_eq!(reservation.status, ReservationStatus::Confirmed);
    }

    #[test]
    fn confirm_payment_does_not_override_administrative_status() {
        let setups: [fn(&mut Reservation) -> Result<(), ReservationError>; 3] = [
            |r| r.approve(Utc::now()),
            |r| r.reject(None, Utc::now()),
            |r| r.cancel(Utc::now()),
        ];
        for setup in setups {
            let mut reservation = pending();
            setup(&mut reservation).unwrap();
            let before = reservation.status;
            assert!(matches!(
                reservation.confirm_payment(Utc::now()),
                Err(ReservationError::InvalidStateTransition { .. })
            ));
            assert_eq!(reservation.status, before);
        }
    }

    #[test]
    fn approve_and_reject_require_pending() {
        let mut reservation = pending();
        reservation.confirm_payment(Utc::now()).unwrap();
        assert!(reservation.approve(Utc::now()).is_err());
        assert!(reservation.reject(None, Utc::now()).is_err());
    }

    #[test]
    fn reject_keeps_reason() {
        let mut reservation = pending();
        reservation
            .reject(Some("duplicate booking".to_string()), Utc::now())
            .unwrap();
        assert_eq!(reservation.status, ReservationStatus::Rejected);
        assert_eq!(
            reservation.rejection_reason.as_deref(),
            Some("duplicate booking")
        );
    }

    #[test]
    fn cancel_is_allowed_once() {
        let mut reservation = pending();
        reservation.confirm_payment(Utc::now()).unwrap();
        reservation.cancel(Utc::now()).unwrap();
        assert_eq!(reservation.status, ReservationStatus::Cancelled);
        assert!(reservation.cancel(Utc::now()).is_err());
    }
}
