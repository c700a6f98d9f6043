use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::ReservationId;
use domain::{PaymentId, Reservation, ReservationStatus};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::{
    DEFAULT_LOCK_TIMEOUT, ReservationQuery, Result, StoreError, UniqueKey,
    reservation::{ReservationStore, ReservationTx},
};

struct Row {
    committed: Reservation,
    lock: Arc<Mutex<()>>,
}

/// In-memory reservation store.
///
/// Each reservation carries its own async mutex standing in for the row
/// lock; a transaction holds the guard from `lock_and_load` until commit,
/// rollback or drop.
#[derive(Clone)]
pub struct InMemoryReservationStore {
    rows: Arc<RwLock<HashMap<ReservationId, Row>>>,
    lock_timeout: Duration,
}

impl Default for InMemoryReservationStore {
    fn default() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }
}

impl InMemoryReservationStore {
    /// Creates a new empty store with the default lock timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new empty store that gives up waiting for a row lock after
    /// `lock_timeout`.
    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            rows: Arc::new(RwLock::new(HashMap::new())),
            lock_timeout,
        }
    }

    /// Returns the number of stored reservations.
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

/// Checks the unique keys of `candidate` against every other row.
fn check_unique(rows: &HashMap<ReservationId, Row>, candidate: &Reservation) -> Result<()> {
    for (id, row) in rows {
        if *id == candidate.id {
            continue;
        }
        let other = &row.committed;
        if other.external_reference == candidate.external_reference {
            return Err(StoreError::Duplicate(UniqueKey::ReservationExternalReference));
        }
        if candidate.payment_id.is_some() && other.payment_id == candidate.payment_id {
            return Err(StoreError::Duplicate(UniqueKey::ReservationPaymentId));
        }
    }
    Ok(())
}

#[async_trait]
impl ReservationStore for InMemoryReservationStore {
    type Tx = InMemoryReservationTx;

    async fn insert(&self, reservation: &Reservation) -> Result<()> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(&reservation.id) {
            return Err(StoreError::Duplicate(UniqueKey::ReservationId));
        }
        check_unique(&rows, reservation)?;
        rows.insert(
            reservation.id,
            Row {
                committed: reservation.clone(),
                lock: Arc::new(Mutex::new(())),
            },
        );
        Ok(())
    }

    async fn get(&self, id: ReservationId) -> Result<Option<Reservation>> {
        Ok(self
            .rows
            .read()
            .await
            .get(&id)
            .map(|row| row.committed.clone()))
    }

    async fn find_by_payment_id(&self, payment_id: &PaymentId) -> Result<Option<Reservation>> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .find(|row| row.committed.payment_id.as_ref() == Some(payment_id))
            .map(|row| row.committed.clone()))
    }

    async fn find_by_external_reference(&self, reference: &str) -> Result<Option<Reservation>> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .find(|row| row.committed.external_reference == reference)
            .map(|row| row.committed.clone()))
    }

    async fn list(&self, query: ReservationQuery) -> Result<Vec<Reservation>> {
        let rows = self.rows.read().await;
        let mut reservations: Vec<_> = rows
            .values()
            .map(|row| &row.committed)
            .filter(|r| query.status.is_none_or(|status| r.status == status))
            .cloned()
            .collect();
        reservations.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(reservations
            .into_iter()
            .skip(query.effective_offset())
            .take(query.effective_limit())
            .collect())
    }

    async fn count_by_status(&self) -> Result<HashMap<ReservationStatus, u64>> {
        let rows = self.rows.read().await;
        let mut counts = HashMap::new();
        for row in rows.values() {
            *counts.entry(row.committed.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn begin(&self) -> Result<Self::Tx> {
        Ok(InMemoryReservationTx {
            store: self.clone(),
            guards: HashMap::new(),
            staged: HashMap::new(),
        })
    }
}

/// Transaction over [`InMemoryReservationStore`].
pub struct InMemoryReservationTx {
    store: InMemoryReservationStore,
    guards: HashMap<ReservationId, OwnedMutexGuard<()>>,
    staged: HashMap<ReservationId, Reservation>,
}

impl InMemoryReservationTx {
    async fn acquire(&mut self, id: ReservationId) -> Result<()> {
        if self.guards.contains_key(&id) {
            return Ok(());
        }

        let lock = {
            let rows = self.store.rows.read().await;
            let row = rows.get(&id).ok_or(StoreError::ReservationNotFound(id))?;
            Arc::clone(&row.lock)
        };

        let waited = self.store.lock_timeout;
        let guard = tokio::time::timeout(waited, lock.lock_owned())
            .await
            .map_err(|_| StoreError::LockTimeout {
                reservation_id: id,
                waited,
            })?;
        self.guards.insert(id, guard);
        Ok(())
    }
}

#[async_trait]
impl ReservationTx for InMemoryReservationTx {
    async fn lock_and_load(&mut self, id: ReservationId) -> Result<Reservation> {
        self.acquire(id).await?;

        if let Some(staged) = self.staged.get(&id) {
            return Ok(staged.clone());
        }
        let rows = self.store.rows.read().await;
        rows.get(&id)
            .map(|row| row.committed.clone())
            .ok_or(StoreError::ReservationNotFound(id))
    }

    async fn save(&mut self, reservation: &Reservation) -> Result<()> {
        self.acquire(reservation.id).await?;
        check_unique(&*self.store.rows.read().await, reservation)?;
        self.staged.insert(reservation.id, reservation.clone());
        Ok(())
    }

    async fn commit(mut self) -> Result<()> {
        let mut rows = self.store.rows.write().await;
        for reservation in self.staged.values() {
            check_unique(&rows, reservation)?;
        }
        for (id, reservation) in self.staged.drain() {
            if let Some(row) = rows.get_mut(&id) {
                row.committed = reservation;
            }
        }
        drop(rows);
        self.guards.clear();
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Ok(())
    }
}
