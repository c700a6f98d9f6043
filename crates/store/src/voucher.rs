use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::ReservationId;
use domain::{Voucher, VoucherCode};

use crate::Result;

/// Persistence for vouchers.
///
/// At most one voucher exists per reservation and codes are globally
/// unique; both are enforced here, not by callers.
#[async_trait]
pub trait VoucherStore: Send + Sync {
    /// Inserts a voucher.
    ///
    /// Fails with `Duplicate(VoucherReservation)` if the reservation already
    /// has one, or `Duplicate(VoucherCode)` on a code collision.
    async fn insert(&self, voucher: &Voucher) -> Result<()>;

    async fn find_by_code(&self, code: &VoucherCode) -> Result<Option<Voucher>>;

    async fn find_by_reservation(&self, reservation_id: ReservationId) -> Result<Option<Voucher>>;

    /// Atomically marks the voucher as used.
    ///
    /// Exactly one of any number of concurrent calls for one code succeeds.
    async fn redeem(&self, code: &VoucherCode, now: DateTime<Utc>) -> Result<Voucher>;

    /// Total number of vouchers issued.
    async fn count(&self) -> Result<u64>;
}
