//! In-memory store implementations.
//!
//! These mirror the PostgreSQL implementations' semantics, including row
//! locking and unique constraints, so that the webhook pipeline can be
//! exercised without a database.

mod ledger;
mod reservations;
mod vouchers;

pub use ledger::InMemoryLedger;
pub use reservations::{InMemoryReservationStore, InMemoryReservationTx};
pub use vouchers::InMemoryVoucherStore;
