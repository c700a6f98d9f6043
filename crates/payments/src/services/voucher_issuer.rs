//! Voucher issuance for confirmed reservations.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::ReservationId;
use domain::{Reservation, ReservationStatus, Voucher, VoucherCode};
use store::{StoreError, UniqueKey, VoucherStore};
use thiserror::Error;

/// Attempts made before giving up on code collisions.
pub const MAX_CODE_ATTEMPTS: u32 = 3;

/// Errors that can occur while issuing a voucher.
#[derive(Debug, Error)]
pub enum IssueError {
    /// The reservation already has a voucher.
    #[error("Voucher already issued for reservation {0}")]
    AlreadyIssued(ReservationId),

    /// Every generated code collided with an existing one.
    #[error("Voucher code collided {attempts} times")]
    CodeCollisions { attempts: u32 },

    #[error("Reservation {id} is {status}, not confirmed")]
    NotConfirmed {
        id: ReservationId,
        status: ReservationStatus,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Issues the voucher for a confirmed reservation.
///
/// Must be exactly-once per reservation: a second call for the same
/// reservation fails with [`IssueError::AlreadyIssued`].
#[async_trait]
pub trait VoucherIssuer: Send + Sync {
    async fn issue(&self, reservation: &Reservation) -> Result<Voucher, IssueError>;
}

/// Issuer backed by a [`VoucherStore`], whose unique constraints provide
/// the exactly-once guarantee.
#[derive(Clone)]
pub struct StoreVoucherIssuer {
    store: Arc<dyn VoucherStore>,
}

impl StoreVoucherIssuer {
    pub fn new(store: Arc<dyn VoucherStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl VoucherIssuer for StoreVoucherIssuer {
    #[tracing::instrument(skip_all, fields(reservation_id = %reservation.id))]
    async fn issue(&self, reservation: &Reservation) -> Result<Voucher, IssueError> {
        if reservation.status != ReservationStatus::Confirmed {
            return Err(IssueError::NotConfirmed {
                id: reservation.id,
                status: reservation.status,
            });
        }

        for attempt in 1..=MAX_CODE_ATTEMPTS {
            let voucher = Voucher::issue(
                reservation.id,
                VoucherCode::generate(),
                reservation.amount,
                Utc::now(),
            );

            match self.store.insert(&voucher).await {
                Ok(()) => {
                    metrics::counter!("vouchers_issued_total").increment(1);
                    tracing::info!(code = %voucher.code, "voucher issued");
                    return Ok(voucher);
                }
                Err(StoreError::Duplicate(UniqueKey::VoucherCode)) => {
                    tracing::warn!(attempt, "voucher code collision, regenerating");
                }
                Err(StoreError::Duplicate(UniqueKey::VoucherReservation)) => {
                    return Err(IssueError::AlreadyIssued(reservation.id));
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(IssueError::CodeCollisions {
            attempts: MAX_CODE_ATTEMPTS,
        })
    }
}

#[cfg(test)]
mod tests {
    use domain::{Money, NewReservation};
    use store::InMemoryVoucherStore;

    use super::*;

    fn confirmed() -> Reservation {
        let mut reservation = Reservation::new(
            NewReservation {
                external_reference: "ref-1".to_string(),
                customer_name: "Ana".to_string(),
                customer_email: "ana@example.com".to_string(),
                party_size: 2,
                amount: Money::from_cents(12000),
            },
            Utc::now(),
        )
        .unwrap();
        reservation.confirm_payment(Utc::now()).unwrap();
        reservation
    }

    #[tokio::test]
    async fn issues_once_per_reservation() {
        let store = InMemoryVoucherStore::new();
        let issuer = StoreVoucherIssuer::new(Arc::new(store.clone()));
        let reservation = confirmed();

        let voucher = issuer.issue(&reservation).await.unwrap();
        assert_eq!(voucher.reservation_id, reservation.id);
        assert_eq!(voucher.amount, Money::from_cents(12000));
        assert!(voucher.can_be_used(Utc::now()));

        let again = issuer.issue(&reservation).await;
        assert!(matches!(again, Err(IssueError::AlreadyIssued(id)) if id == reservation.id));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn refuses_unconfirmed_reservations() {
        let issuer = StoreVoucherIssuer::new(Arc::new(InMemoryVoucherStore::new()));
        let mut reservation = confirmed();
        reservation.cancel(Utc::now()).unwrap();

        assert!(matches!(
            issuer.issue(&reservation).await,
            Err(IssueError::NotConfirmed {
                status: ReservationStatus::Cancelled,
                ..
            })
        ));
    }

    struct CollidingStore;

    #[async_trait]
    impl VoucherStore for CollidingStore {
        async fn insert(&self, _voucher: &Voucher) -> store::Result<()> {
            Err(StoreError::Duplicate(UniqueKey::VoucherCode))
        }
        async fn find_by_code(&self, _code: &VoucherCode) -> store::Result<Option<Voucher>> {
            Ok(None)
        }
        async fn find_by_reservation(&self, _id: ReservationId) -> store::Result<Option<Voucher>> {
            Ok(None)
        }
        async fn redeem(
            &self,
            code: &VoucherCode,
            _now: chrono::DateTime<Utc>,
        ) -> store::Result<Voucher> {
            Err(StoreError::VoucherNotFound(code.clone()))
        }
        async fn count(&self) -> store::Result<u64> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn gives_up_after_repeated_collisions() {
        let issuer = StoreVoucherIssuer::new(Arc::new(CollidingStore));
        let result = issuer.issue(&confirmed()).await;
        assert!(matches!(
            result,
            Err(IssueError::CodeCollisions { attempts: 3 })
        ));
    }
}
