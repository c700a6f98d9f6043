//! PostgreSQL store implementations.

mod ledger;
mod reservations;
mod vouchers;

pub use ledger::PostgresLedger;
pub use reservations::{PostgresReservationStore, PostgresReservationTx};
pub use vouchers::PostgresVoucherStore;

use sqlx::PgPool;

use crate::{StoreError, UniqueKey};

const UNIQUE_VIOLATION: &str = "23505";
const LOCK_NOT_AVAILABLE: &str = "55P03";

/// Runs the database migrations.
pub async fn run_migrations(pool: &PgPool) -> std::result::Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../migrations").run(pool).await
}

/// Maps unique violations to `Duplicate`; everything else stays a database error.
fn map_write_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = err
        && db_err.code().as_deref() == Some(UNIQUE_VIOLATION)
        && let Some(key) = db_err.constraint().and_then(UniqueKey::from_constraint)
    {
        return StoreError::Duplicate(key);
    }
    StoreError::Database(err)
}

fn is_lock_not_available(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(LOCK_NOT_AVAILABLE))
}
