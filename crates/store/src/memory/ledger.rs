use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::{DashMap, mapref::entry::Entry};

use crate::{EventOutcome, IdempotencyLedger, MarkResult, ProcessedEvent, Result};

/// In-memory idempotency ledger.
///
/// The insert-if-absent runs under the shard lock of the event id's entry,
/// so concurrent marks for one id are linearized.
#[derive(Clone, Default)]
pub struct InMemoryLedger {
    events: Arc<DashMap<String, ProcessedEvent>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of remembered events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[async_trait]
impl IdempotencyLedger for InMemoryLedger {
    async fn try_mark_processed(
        &self,
        event_id: &str,
        outcome: EventOutcome,
    ) -> Result<MarkResult> {
        match self.events.entry(event_id.to_string()) {
            Entry::Occupied(existing) => Ok(MarkResult::AlreadyProcessed(existing.get().outcome)),
            Entry::Vacant(slot) => {
                slot.insert(ProcessedEvent {
                    event_id: event_id.to_string(),
                    outcome,
                    processed_at: Utc::now(),
                });
                Ok(MarkResult::Accepted)
            }
        }
    }

    async fn recorded_outcome(&self, event_id: &str) -> Result<Option<EventOutcome>> {
        Ok(self.events.get(event_id).map(|entry| entry.outcome))
    }

    async fn purge_expired(&self, retention: Duration) -> Result<u64> {
        let Some(cutoff) = chrono::Duration::from_std(retention)
            .ok()
            .and_then(|retention| Utc::now().checked_sub_signed(retention))
        else {
            return Ok(0);
        };

        let before = self.events.len();
        self.events.retain(|_, event| event.processed_at > cutoff);
        Ok(before.saturating_sub(self.events.len()) as u64)
    }
}
