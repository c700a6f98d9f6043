use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use common::ReservationId;
use domain::{Money, PaymentId, Reservation, ReservationStatus};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use super::{is_lock_not_available, map_write_error};
use crate::{
    DEFAULT_LOCK_TIMEOUT, ReservationQuery, Result, StoreError,
    reservation::{ReservationStore, ReservationTx},
};

const COLUMNS: &str = "id, payment_id, external_reference, customer_name, customer_email, \
     party_size, amount_cents, status, rejection_reason, created_at, updated_at";

/// PostgreSQL-backed reservation store.
///
/// `lock_and_load` issues `SELECT … FOR UPDATE`; the wait is bounded by the
/// transaction-local `lock_timeout` set in `begin`.
#[derive(Clone)]
pub struct PostgresReservationStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PostgresReservationStore {
    /// Creates a new PostgreSQL reservation store with the default lock timeout.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Overrides how long `lock_and_load` waits for a row lock.
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        super::run_migrations(&self.pool).await
    }

    async fn fetch_one_where(&self, predicate: &str, value: &str) -> Result<Option<Reservation>> {
        let sql = format!("SELECT {COLUMNS} FROM reservations WHERE {predicate} = $1");
        let row = sqlx::query(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_reservation).transpose()
    }
}

fn row_to_reservation(row: PgRow) -> Result<Reservation> {
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<ReservationStatus>()
        .map_err(|e| StoreError::CorruptRow(e.to_string()))?;
    let party_size: i32 = row.try_get("party_size")?;
    let party_size = u32::try_from(party_size)
        .map_err(|_| StoreError::CorruptRow(format!("negative party size {party_size}")))?;

    Ok(Reservation {
        id: ReservationId::from_uuid(row.try_get::<Uuid, _>("id")?),
        payment_id: row
            .try_get::<Option<String>, _>("payment_id")?
            .map(PaymentId::from),
        external_reference: row.try_get("external_reference")?,
        customer_name: row.try_get("customer_name")?,
        customer_email: row.try_get("customer_email")?,
        party_size,
        amount: Money::from_cents(row.try_get("amount_cents")?),
        status,
        rejection_reason: row.try_get("rejection_reason")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn party_size_param(reservation: &Reservation) -> i32 {
    i32::try_from(reservation.party_size).unwrap_or(i32::MAX)
}

#[async_trait]
impl ReservationStore for PostgresReservationStore {
    type Tx = PostgresReservationTx;

    async fn insert(&self, reservation: &Reservation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO reservations (id, payment_id, external_reference, customer_name, customer_email,
                                      party_size, amount_cents, status, rejection_reason, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(reservation.id.as_uuid())
        .bind(reservation.payment_id.as_ref().map(PaymentId::as_str))
        .bind(&reservation.external_reference)
        .bind(&reservation.customer_name)
        .bind(&reservation.customer_email)
        .bind(party_size_param(reservation))
        .bind(reservation.amount.cents())
        .bind(reservation.status.as_str())
        .bind(reservation.rejection_reason.as_deref())
        .bind(reservation.created_at)
        .bind(reservation.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;

        Ok(())
    }

    async fn get(&self, id: ReservationId) -> Result<Option<Reservation>> {
        let sql = format!("SELECT {COLUMNS} FROM reservations WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_reservation).transpose()
    }

    async fn find_by_payment_id(&self, payment_id: &PaymentId) -> Result<Option<Reservation>> {
        self.fetch_one_where("payment_id", payment_id.as_str())
            .await
    }

    async fn find_by_external_reference(&self, reference: &str) -> Result<Option<Reservation>> {
        self.fetch_one_where("external_reference", reference).await
    }

    async fn list(&self, query: ReservationQuery) -> Result<Vec<Reservation>> {
        let mut sql = format!("SELECT {COLUMNS} FROM reservations WHERE 1=1");
        let mut param_count = 0;

        if query.status.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND status = ${param_count}"));
        }

        sql.push_str(" ORDER BY created_at DESC, id ASC");
        sql.push_str(&format!(
            " LIMIT ${} OFFSET ${}",
            param_count + 1,
            param_count + 2
        ));

        let mut sqlx_query = sqlx::query(&sql);
        if let Some(status) = query.status {
            sqlx_query = sqlx_query.bind(status.as_str());
        }
        sqlx_query = sqlx_query
            .bind(query.effective_limit() as i64)
            .bind(query.effective_offset() as i64);

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(row_to_reservation).collect()
    }

    async fn count_by_status(&self) -> Result<HashMap<ReservationStatus, u64>> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS total FROM reservations GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut counts = HashMap::new();
        for row in rows {
            let status: String = row.try_get("status")?;
            let status = status
                .parse::<ReservationStatus>()
                .map_err(|e| StoreError::CorruptRow(e.to_string()))?;
            let total: i64 = row.try_get("total")?;
            counts.insert(status, total.max(0) as u64);
        }
        Ok(counts)
    }

    async fn begin(&self) -> Result<Self::Tx> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", self.lock_timeout.as_millis().max(1)))
            .execute(&mut *tx)
            .await?;

        Ok(PostgresReservationTx {
            tx,
            lock_timeout: self.lock_timeout,
        })
    }
}

/// Transaction over [`PostgresReservationStore`].
pub struct PostgresReservationTx {
    tx: Transaction<'static, Postgres>,
    lock_timeout: Duration,
}

#[async_trait]
impl ReservationTx for PostgresReservationTx {
    async fn lock_and_load(&mut self, id: ReservationId) -> Result<Reservation> {
        let waited = self.lock_timeout;
        let sql = format!("SELECT {COLUMNS} FROM reservations WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| {
                if is_lock_not_available(&e) {
                    tracing::debug!(reservation_id = %id, "row lock wait timed out");
                    return StoreError::LockTimeout {
                        reservation_id: id,
                        waited,
                    };
                }
                StoreError::Database(e)
            })?;

        match row {
            Some(row) => row_to_reservation(row),
            None => Err(StoreError::ReservationNotFound(id)),
        }
    }

    async fn save(&mut self, reservation: &Reservation) -> Result<()> {
        let waited = self.lock_timeout;
        let result = sqlx::query(
            r#"
            UPDATE reservations
            SET payment_id = $2, customer_name = $3, customer_email = $4, party_size = $5,
                amount_cents = $6, status = $7, rejection_reason = $8, updated_at = $9
            WHERE id = $1
            "#,
        )
        .bind(reservation.id.as_uuid())
        .bind(reservation.payment_id.as_ref().map(PaymentId::as_str))
        .bind(&reservation.customer_name)
        .bind(&reservation.customer_email)
        .bind(party_size_param(reservation))
        .bind(reservation.amount.cents())
        .bind(reservation.status.as_str())
        .bind(reservation.rejection_reason.as_deref())
        .bind(reservation.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if is_lock_not_available(&e) {
                return StoreError::LockTimeout {
                    reservation_id: reservation.id,
                    waited,
                };
            }
            map_write_error(e)
        })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::ReservationNotFound(reservation.id));
        }
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
