//! Idempotency ledger for provider webhook events.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Default time a processed event id is remembered.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Definitive outcome recorded for a webhook event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    /// The event moved the reservation to confirmed.
    Confirmed,

    /// The reservation was already confirmed when the event arrived.
    AlreadyConfirmed,

    /// An administrator had already decided the reservation.
    Superseded,

    /// No reservation is correlated with the payment.
    ReservationNotFound,
}

impl EventOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventOutcome::Confirmed => "confirmed",
            EventOutcome::AlreadyConfirmed => "already_confirmed",
            EventOutcome::Superseded => "superseded",
            EventOutcome::ReservationNotFound => "reservation_not_found",
        }
    }
}

impl std::fmt::Display for EventOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown outcome tag.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown event outcome: {0}")]
pub struct UnknownOutcome(pub String);

impl FromStr for EventOutcome {
    type Err = UnknownOutcome;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "confirmed" => Ok(EventOutcome::Confirmed),
            "already_confirmed" => Ok(EventOutcome::AlreadyConfirmed),
            "superseded" => Ok(EventOutcome::Superseded),
            "reservation_not_found" => Ok(EventOutcome::ReservationNotFound),
            other => Err(UnknownOutcome(other.to_string())),
        }
    }
}

/// Result of [`IdempotencyLedger::try_mark_processed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkResult {
    /// This caller recorded the outcome.
    Accepted,

    /// The event id was already recorded, with this outcome.
    AlreadyProcessed(EventOutcome),
}

/// A recorded event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedEvent {
    pub event_id: String,
    pub outcome: EventOutcome,
    pub processed_at: DateTime<Utc>,
}

/// Remembers which provider event ids have been handled.
///
/// Exactly one outcome is ever recorded per event id: among concurrent
/// callers marking the same id, one gets `Accepted` and the rest observe
/// the winner's outcome.
#[async_trait]
pub trait IdempotencyLedger: Send + Sync {
    /// Records `outcome` for `event_id` unless one is already recorded.
    async fn try_mark_processed(&self, event_id: &str, outcome: EventOutcome)
    -> Result<MarkResult>;

    /// Returns the recorded outcome for `event_id`, if any.
    async fn recorded_outcome(&self, event_id: &str) -> Result<Option<EventOutcome>>;

    /// Forgets records older than `retention`. Returns how many were removed.
    async fn purge_expired(&self, retention: Duration) -> Result<u64>;
}
