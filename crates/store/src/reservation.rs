use std::collections::HashMap;

use async_trait::async_trait;
use common::ReservationId;
use domain::{PaymentId, Reservation, ReservationStatus};

use crate::{ReservationQuery, Result};

/// Persistence for reservations.
///
/// Reads outside a transaction see committed state only. Every status
/// change goes through [`ReservationStore::begin`] so that concurrent
/// writers for one reservation serialize on its row lock.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Transaction handle returned by [`ReservationStore::begin`].
    type Tx: ReservationTx + 'static;

    /// Inserts a new reservation.
    ///
    /// Fails with `Duplicate` if the id, external reference or payment id
    /// is already taken.
    async fn insert(&self, reservation: &Reservation) -> Result<()>;

    /// Gets a reservation by id.
    async fn get(&self, id: ReservationId) -> Result<Option<Reservation>>;

    /// Resolves the reservation correlated with a provider payment.
    async fn find_by_payment_id(&self, payment_id: &PaymentId) -> Result<Option<Reservation>>;

    /// Resolves a reservation by its caller-assigned reference.
    async fn find_by_external_reference(&self, reference: &str) -> Result<Option<Reservation>>;

    /// Lists reservations matching a query, newest first.
    async fn list(&self, query: ReservationQuery) -> Result<Vec<Reservation>>;

    /// Counts reservations per status. Statuses with no rows are omitted.
    async fn count_by_status(&self) -> Result<HashMap<ReservationStatus, u64>>;

    /// Starts a transaction.
    async fn begin(&self) -> Result<Self::Tx>;
}

/// A unit of work over reservations.
///
/// Dropping a transaction without committing rolls it back and releases
/// every lock it holds.
#[async_trait]
pub trait ReservationTx: Send {
    /// Locks the reservation row for the rest of the transaction and returns
    /// its committed state.
    ///
    /// Blocks while another transaction holds the lock, up to the store's
    /// lock timeout, after which it fails with `LockTimeout`.
    async fn lock_and_load(&mut self, id: ReservationId) -> Result<Reservation>;

    /// Stages an updated reservation. Visible to others only after commit.
    async fn save(&mut self, reservation: &Reservation) -> Result<()>;

    /// Commits staged writes and releases locks.
    async fn commit(self) -> Result<()>;

    /// Discards staged writes and releases locks.
    async fn rollback(self) -> Result<()>;
}
