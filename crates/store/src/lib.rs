pub mod error;
pub mod ledger;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod reservation;
pub mod voucher;

pub use error::{Result, StoreError, UniqueKey};
pub use ledger::{
    DEFAULT_RETENTION, EventOutcome, IdempotencyLedger, MarkResult, ProcessedEvent,
    UnknownOutcome,
};
pub use memory::{InMemoryLedger, InMemoryReservationStore, InMemoryVoucherStore};
pub use postgres::{PostgresLedger, PostgresReservationStore, PostgresVoucherStore};
pub use query::ReservationQuery;
pub use reservation::{ReservationStore, ReservationTx};
pub use voucher::VoucherStore;

/// Default time to wait for a reservation row lock.
pub const DEFAULT_LOCK_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);
