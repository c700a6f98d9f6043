use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{ReservationId, VoucherId};
use domain::{Money, Voucher, VoucherCode};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use super::map_write_error;
use crate::{Result, StoreError, voucher::VoucherStore};

const COLUMNS: &str = "id, reservation_id, code, amount_cents, valid_until, used, used_at, created_at";

/// PostgreSQL-backed voucher store.
#[derive(Clone)]
pub struct PostgresVoucherStore {
    pool: PgPool,
}

impl PostgresVoucherStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_voucher(row: PgRow) -> Result<Voucher> {
    let code: String = row.try_get("code")?;
    let code = code
        .parse::<VoucherCode>()
        .map_err(|e| StoreError::CorruptRow(e.to_string()))?;

    Ok(Voucher {
        id: VoucherId::from_uuid(row.try_get::<Uuid, _>("id")?),
        reservation_id: ReservationId::from_uuid(row.try_get::<Uuid, _>("reservation_id")?),
        code,
        amount: Money::from_cents(row.try_get("amount_cents")?),
        valid_until: row.try_get("valid_until")?,
        used: row.try_get("used")?,
        used_at: row.try_get("used_at")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl VoucherStore for PostgresVoucherStore {
    async fn insert(&self, voucher: &Voucher) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO vouchers (id, reservation_id, code, amount_cents, valid_until, used, used_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(voucher.id.as_uuid())
        .bind(voucher.reservation_id.as_uuid())
        .bind(voucher.code.as_str())
        .bind(voucher.amount.cents())
        .bind(voucher.valid_until)
        .bind(voucher.used)
        .bind(voucher.used_at)
        .bind(voucher.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;

        Ok(())
    }

    async fn find_by_code(&self, code: &VoucherCode) -> Result<Option<Voucher>> {
        let sql = format!("SELECT {COLUMNS} FROM vouchers WHERE code = $1");
        let row = sqlx::query(&sql)
            .bind(code.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_voucher).transpose()
    }

    async fn find_by_reservation(&self, reservation_id: ReservationId) -> Result<Option<Voucher>> {
        let sql = format!("SELECT {COLUMNS} FROM vouchers WHERE reservation_id = $1");
        let row = sqlx::query(&sql)
            .bind(reservation_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_voucher).transpose()
    }

    async fn redeem(&self, code: &VoucherCode, now: DateTime<Utc>) -> Result<Voucher> {
        let sql = format!(
            "UPDATE vouchers SET used = TRUE, used_at = $2 \
             WHERE code = $1 AND used = FALSE AND valid_until >= $2 \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(code.as_str())
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = row {
            return row_to_voucher(row);
        }

        // The conditional update matched nothing: explain why.
        let mut current = self
            .find_by_code(code)
            .await?
            .ok_or_else(|| StoreError::VoucherNotFound(code.clone()))?;
        match current.redeem(now) {
            Err(err) => Err(err.into()),
            Ok(()) => Err(StoreError::CorruptRow(format!(
                "voucher {code} is redeemable but the update matched no row"
            ))),
        }
    }

    async fn count(&self) -> Result<u64> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vouchers")
            .fetch_one(&self.pool)
            .await?;
        Ok(total.max(0) as u64)
    }
}
