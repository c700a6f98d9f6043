//! Customer notification after voucher issuance.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::ReservationId;
use domain::{Reservation, Voucher, VoucherCode};
use thiserror::Error;

/// Error returned by a notifier.
#[derive(Debug, Clone, Error)]
#[error("Notification failed: {0}")]
pub struct NotifyError(pub String);

/// Delivers the voucher to the customer (e-mail in production).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, reservation: &Reservation, voucher: &Voucher) -> Result<(), NotifyError>;
}

/// Notifier that only records the delivery in the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify(&self, reservation: &Reservation, voucher: &Voucher) -> Result<(), NotifyError> {
        tracing::info!(
            reservation_id = %reservation.id,
            customer_email = %reservation.customer_email,
            code = %voucher.code,
            valid_until = %voucher.valid_until,
            "voucher notification sent"
        );
        Ok(())
    }
}

/// A recorded notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub reservation_id: ReservationId,
    pub email: String,
    pub code: VoucherCode,
}

#[derive(Debug, Default)]
struct InMemoryNotifierState {
    sent: RwLock<Vec<Notification>>,
    fail: AtomicBool,
}

/// In-memory notifier for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotifier {
    state: Arc<InMemoryNotifierState>,
}

impl InMemoryNotifier {
    /// Creates a new in-memory notifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the notifier to fail every delivery.
    pub fn set_fail(&self, fail: bool) {
        self.state.fail.store(fail, Ordering::SeqCst);
    }

    /// Returns every delivered notification.
    pub fn sent(&self) -> Vec<Notification> {
        self.state.sent.read().unwrap().clone()
    }

    /// Returns the number of deliveries for a reservation.
    pub fn count_for(&self, reservation_id: ReservationId) -> usize {
        self.state
            .sent
            .read()
            .unwrap()
            .iter()
            .filter(|n| n.reservation_id == reservation_id)
            .count()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn notify(&self, reservation: &Reservation, voucher: &Voucher) -> Result<(), NotifyError> {
        if self.state.fail.load(Ordering::SeqCst) {
            return Err(NotifyError("mailbox unavailable".to_string()));
        }
        self.state.sent.write().unwrap().push(Notification {
            reservation_id: reservation.id,
            email: reservation.customer_email.clone(),
            code: voucher.code.clone(),
        });
        Ok(())
    }
}
