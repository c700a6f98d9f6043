//! Vouchers issued for confirmed reservations.

mod code;

pub use code::{InvalidVoucherCode, VoucherCode};

use chrono::{DateTime, Duration, Utc};
use common::{ReservationId, VoucherId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::reservation::Money;

/// How long a voucher stays valid after issuance.
pub const VOUCHER_VALIDITY_DAYS: i64 = 30;

/// Errors that can occur when using a voucher.
#[derive(Debug, Error)]
pub enum VoucherError {
    /// The voucher was already redeemed.
    #[error("Voucher {code} was already used at {used_at}")]
    AlreadyUsed {
        code: VoucherCode,
        used_at: DateTime<Utc>,
    },

    /// The voucher validity window has passed.
    #[error("Voucher {code} expired at {valid_until}")]
    Expired {
        code: VoucherCode,
        valid_until: DateTime<Utc>,
    },
}

/// A single-use voucher tied to exactly one reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voucher {
    pub id: VoucherId,
    pub reservation_id: ReservationId,
    pub code: VoucherCode,
    pub amount: Money,
    pub valid_until: DateTime<Utc>,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Voucher {
    /// Issues a fresh voucher valid for [`VOUCHER_VALIDITY_DAYS`] from `now`.
    pub fn issue(
        reservation_id: ReservationId,
        code: VoucherCode,
        amount: Money,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: VoucherId::new(),
            reservation_id,
            code,
            amount,
            valid_until: now + Duration::days(VOUCHER_VALIDITY_DAYS),
            used: false,
            used_at: None,
            created_at: now,
        }
    }

    /// Returns true once the validity window has passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.valid_until
    }

    /// Returns true if the voucher can still be redeemed.
    pub fn can_be_used(&self, now: DateTime<Utc>) -> bool {
        !self.used && !self.is_expired(now)
    }

    /// Marks the voucher as used. Irreversible.
    pub fn redeem(&mut self, now: DateTime<Utc>) -> Result<(), VoucherError> {
        if self.used {
            return Err(VoucherError::AlreadyUsed {
                code: self.code.clone(),
                used_at: self.used_at.unwrap_or(self.created_at),
            });
        }
        if self.is_expired(now) {
            return Err(VoucherError::Expired {
                code: self.code.clone(),
                valid_until: self.valid_until,
            });
        }
        self.used = true;
        self.used_at = Some(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voucher(now: DateTime<Utc>) -> Voucher {
        Voucher::issue(
            ReservationId::new(),
            VoucherCode::generate(),
            Money::from_cents(5000),
            now,
        )
    }

    #[test]
    fn issue_sets_thirty_day_window() {
        let now = Utc::now();
        let voucher = voucher(now);
        assert_eq!(voucher.valid_until - now, Duration::days(30));
        assert!(!voucher.used);
        assert!(voucher.used_at.is_none());
    }

    #[test]
    fn redeem_stamps_usage_once() {
        let now = Utc::now();
        let mut voucher = voucher(now);
        voucher.redeem(now).unwrap();
        assert!(voucher.used);
        assert_eq!(voucher.used_at, Some(now));

        let again = voucher.redeem(now + Duration::minutes(1));
        assert!(matches!(again, Err(VoucherError::AlreadyUsed { .. })));
        assert_eq!(voucher.used_at, Some(now));
    }

    #[test]
    fn expired_voucher_cannot_be_redeemed() {
        let issued = Utc::now();
        let mut voucher = voucher(issued);
        let late = issued + Duration::days(31);
        assert!(voucher.is_expired(late));
        assert!(!voucher.can_be_used(late));
        assert!(matches!(
            voucher.redeem(late),
            Err(VoucherError::Expired { .. })
        ));
        assert!(!voucher.used);
    }

    #[test]
    fn voucher_is_usable_on_last_valid_instant() {
        let issued = Utc::now();
        let voucher = voucher(issued);
        assert!(voucher.can_be_used(voucher.valid_until));
    }
}
