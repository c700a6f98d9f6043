use std::time::Duration;

use common::ReservationId;
use domain::{VoucherCode, VoucherError};
use thiserror::Error;

/// Unique keys the stores enforce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueKey {
    ReservationId,
    ReservationPaymentId,
    ReservationExternalReference,
    VoucherReservation,
    VoucherCode,
}

impl UniqueKey {
    /// Maps a PostgreSQL constraint name to the key it enforces.
    pub fn from_constraint(name: &str) -> Option<Self> {
        match name {
            "reservations_pkey" => Some(UniqueKey::ReservationId),
            "unique_reservation_payment_id" => Some(UniqueKey::ReservationPaymentId),
            "unique_reservation_external_reference" => {
                Some(UniqueKey::ReservationExternalReference)
            }
            "unique_voucher_reservation" => Some(UniqueKey::VoucherReservation),
            "unique_voucher_code" => Some(UniqueKey::VoucherCode),
            _ => None,
        }
    }
}

impl std::fmt::Display for UniqueKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            UniqueKey::ReservationId => "reservation id",
            UniqueKey::ReservationPaymentId => "reservation payment id",
            UniqueKey::ReservationExternalReference => "reservation external reference",
            UniqueKey::VoucherReservation => "voucher reservation",
            UniqueKey::VoucherCode => "voucher code",
        };
        f.write_str(name)
    }
}

/// Errors that can occur when interacting with the stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The reservation does not exist.
    #[error("Reservation not found: {0}")]
    ReservationNotFound(ReservationId),

    /// No voucher carries this code.
    #[error("Voucher not found: {0}")]
    VoucherNotFound(VoucherCode),

    /// The row lock could not be acquired in time.
    #[error("Timed out after {waited:?} waiting for lock on reservation {reservation_id}")]
    LockTimeout {
        reservation_id: ReservationId,
        waited: Duration,
    },

    /// A unique constraint rejected the write.
    #[error("Duplicate {0}")]
    Duplicate(UniqueKey),

    /// The voucher cannot be redeemed.
    #[error(transparent)]
    Voucher(#[from] VoucherError),

    /// A stored row could not be mapped back into the domain.
    #[error("Corrupt row: {0}")]
    CorruptRow(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    /// Returns true for failures a later retry can plausibly get past.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::LockTimeout { .. } => true,
            StoreError::Database(sqlx::Error::Database(db)) => match db.code() {
                Some(code) => is_transient_sqlstate(&code),
                None => true,
            },
            StoreError::Database(err) => !matches!(
                err,
                sqlx::Error::RowNotFound
                    | sqlx::Error::ColumnNotFound(_)
                    | sqlx::Error::ColumnDecode { .. }
                    | sqlx::Error::TypeNotFound { .. }
            ),
            _ => false,
        }
    }
}

/// SQLSTATE classes a retry cannot fix: data exceptions (`22`), integrity
/// constraint violations (`23`) and syntax or access rule violations (`42`).
pub(crate) fn is_transient_sqlstate(code: &str) -> bool {
    !matches!(code.get(..2), Some("22" | "23" | "42"))
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_names_map_to_keys() {
        assert_eq!(
            UniqueKey::from_constraint("unique_voucher_reservation"),
            Some(UniqueKey::VoucherReservation)
        );
        assert_eq!(
            UniqueKey::from_constraint("unique_reservation_payment_id"),
            Some(UniqueKey::ReservationPaymentId)
        );
        assert_eq!(UniqueKey::from_constraint("something_else"), None);
    }

    #[test]
    fn lock_timeout_and_connection_errors_are_transient() {
        let timeout = StoreError::LockTimeout {
            reservation_id: ReservationId::new(),
            waited: Duration::from_secs(5),
        };
        assert!(timeout.is_transient());
        assert!(StoreError::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!StoreError::ReservationNotFound(ReservationId::new()).is_transient());
        assert!(!StoreError::Duplicate(UniqueKey::VoucherCode).is_transient());
    }

    #[test]
    fn constraint_violations_are_permanent() {
        // check, foreign key, not null
        for code in ["23514", "23503", "23502", "22001", "42P01"] {
            assert!(!is_transient_sqlstate(code), "{code}");
        }
        // serialization failure, deadlock, lock not available, admin shutdown
        for code in ["40001", "40P01", "55P03", "57P01", "08006"] {
            assert!(is_transient_sqlstate(code), "{code}");
        }
    }
}
