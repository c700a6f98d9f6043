use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;

use crate::{EventOutcome, IdempotencyLedger, MarkResult, Result, StoreError};

/// PostgreSQL-backed idempotency ledger over `processed_events`.
#[derive(Clone)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdempotencyLedger for PostgresLedger {
    async fn try_mark_processed(
        &self,
        event_id: &str,
        outcome: EventOutcome,
    ) -> Result<MarkResult> {
        let inserted: Option<String> = sqlx::query_scalar(
            r#"
            INSERT INTO processed_events (event_id, outcome, processed_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (event_id) DO NOTHING
            RETURNING event_id
            "#,
        )
        .bind(event_id)
        .bind(outcome.as_str())
        .fetch_optional(&self.pool)
        .await?;

        if inserted.is_some() {
            return Ok(MarkResult::Accepted);
        }

        // A purge may remove the winner's row between the two statements.
        let recorded = self.recorded_outcome(event_id).await?.unwrap_or(outcome);
        Ok(MarkResult::AlreadyProcessed(recorded))
    }

    async fn recorded_outcome(&self, event_id: &str) -> Result<Option<EventOutcome>> {
        let outcome: Option<String> =
            sqlx::query_scalar("SELECT outcome FROM processed_events WHERE event_id = $1")
                .bind(event_id)
                .fetch_optional(&self.pool)
                .await?;

        outcome
            .map(|tag| {
                tag.parse::<EventOutcome>()
                    .map_err(|e| StoreError::CorruptRow(e.to_string()))
            })
            .transpose()
    }

    async fn purge_expired(&self, retention: Duration) -> Result<u64> {
        let Some(cutoff) = chrono::Duration::from_std(retention)
            .ok()
            .and_then(|retention| Utc::now().checked_sub_signed(retention))
        else {
            return Ok(0);
        };

        let result = sqlx::query("DELETE FROM processed_events WHERE processed_at <= $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
