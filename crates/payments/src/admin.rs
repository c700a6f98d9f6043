//! Administrative reservation lifecycle and voucher redemption.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::ReservationId;
use domain::{Reservation, ReservationError, ReservationStatus, Voucher, VoucherCode};
use serde::Serialize;
use store::{ReservationQuery, ReservationStore, ReservationTx, StoreError, VoucherStore};

use crate::error::ServiceError;
use crate::services::{IssueError, Notifier, VoucherIssuer};

/// Reservation counts per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReservationStats {
    pub total: u64,
    pub pending: u64,
    pub confirmed: u64,
    pub approved: u64,
    pub rejected: u64,
    pub cancelled: u64,
    pub vouchers_issued: u64,
}

/// Administrative operations on reservations.
///
/// Every status change is a locked read-modify-write through the same
/// store transaction the webhook pipeline uses, so the two serialize.
pub struct ReservationService<S: ReservationStore> {
    store: Arc<S>,
    vouchers: Arc<dyn VoucherStore>,
    issuer: Arc<dyn VoucherIssuer>,
    notifier: Arc<dyn Notifier>,
}

impl<S: ReservationStore> Clone for ReservationService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            vouchers: Arc::clone(&self.vouchers),
            issuer: Arc::clone(&self.issuer),
            notifier: Arc::clone(&self.notifier),
        }
    }
}

impl<S: ReservationStore> ReservationService<S> {
    pub fn new(
        store: Arc<S>,
        vouchers: Arc<dyn VoucherStore>,
        issuer: Arc<dyn VoucherIssuer>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            vouchers,
            issuer,
            notifier,
        }
    }

    pub async fn get(&self, id: ReservationId) -> Result<Reservation, ServiceError> {
        self.store
            .get(id)
            .await?
            .ok_or(ServiceError::ReservationNotFound(id))
    }

    pub async fn list(&self, query: ReservationQuery) -> Result<Vec<Reservation>, ServiceError> {
        Ok(self.store.list(query).await?)
    }

    pub async fn stats(&self) -> Result<ReservationStats, ServiceError> {
        let counts = self.store.count_by_status().await?;
        let count = |status| counts.get(&status).copied().unwrap_or(0);

        Ok(ReservationStats {
            total: counts.values().sum(),
            pending: count(ReservationStatus::Pending),
            confirmed: count(ReservationStatus::Confirmed),
            approved: count(ReservationStatus::Approved),
            rejected: count(ReservationStatus::Rejected),
            cancelled: count(ReservationStatus::Cancelled),
            vouchers_issued: self.vouchers.count().await?,
        })
    }

    #[tracing::instrument(skip(self))]
    pub async fn approve(&self, id: ReservationId) -> Result<Reservation, ServiceError> {
        self.transition(id, |reservation, now| reservation.approve(now))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn reject(
        &self,
        id: ReservationId,
        reason: Option<String>,
    ) -> Result<Reservation, ServiceError> {
        self.transition(id, move |reservation, now| reservation.reject(reason, now))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, id: ReservationId) -> Result<Reservation, ServiceError> {
        self.transition(id, |reservation, now| reservation.cancel(now))
            .await
    }

    /// Issues the voucher of a confirmed reservation that has none, e.g.
    /// after the side-effect worker failed. Returns the existing voucher if
    /// one was issued in the meantime.
    #[tracing::instrument(skip(self))]
    pub async fn reissue_voucher(&self, id: ReservationId) -> Result<Voucher, ServiceError> {
        let reservation = self.get(id).await?;

        match self.issuer.issue(&reservation).await {
            Ok(voucher) => {
                if let Err(e) = self.notifier.notify(&reservation, &voucher).await {
                    tracing::warn!(error = %e, "customer notification failed");
                }
                Ok(voucher)
            }
            Err(IssueError::AlreadyIssued(_)) => {
                let existing = self.vouchers.find_by_reservation(id).await?;
                existing.ok_or_else(|| {
                    ServiceError::Store(StoreError::CorruptRow(format!(
                        "voucher for reservation {id} vanished after a duplicate insert"
                    )))
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn transition<F>(&self, id: ReservationId, apply: F) -> Result<Reservation, ServiceError>
    where
        F: FnOnce(&mut Reservation, DateTime<Utc>) -> Result<(), ReservationError> + Send,
    {
        let mut tx = self.store.begin().await?;
        let mut reservation = tx.lock_and_load(id).await?;

        if let Err(e) = apply(&mut reservation, Utc::now()) {
            if let Err(rollback) = tx.rollback().await {
                tracing::warn!(error = %rollback, "rollback failed");
            }
            return Err(e.into());
        }

        tx.save(&reservation).await?;
        tx.commit().await?;
        tracing::info!(status = %reservation.status, "reservation status changed");
        Ok(reservation)
    }
}

/// Voucher lookup and single-use redemption.
#[derive(Clone)]
pub struct VoucherService {
    vouchers: Arc<dyn VoucherStore>,
}

impl VoucherService {
    pub fn new(vouchers: Arc<dyn VoucherStore>) -> Self {
        Self { vouchers }
    }

    pub async fn get_by_code(&self, code: &str) -> Result<Voucher, ServiceError> {
        let code: VoucherCode = code.parse()?;
        self.vouchers
            .find_by_code(&code)
            .await?
            .ok_or_else(|| ServiceError::voucher_not_found(&code))
    }

    /// Marks the voucher as used. Fails if it is used, expired or unknown.
    #[tracing::instrument(skip(self))]
    pub async fn redeem(&self, code: &str) -> Result<Voucher, ServiceError> {
        let code: VoucherCode = code.parse()?;
        let voucher = self.vouchers.redeem(&code, Utc::now()).await?;
        tracing::info!(reservation_id = %voucher.reservation_id, "voucher redeemed");
        Ok(voucher)
    }
}
