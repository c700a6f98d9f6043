//! Reservation lifecycle state machine.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The lifecycle status of a reservation.
///
/// State transitions:
/// ```text
/// Pending ──┬──► Confirmed   (payment webhook)
///           ├──► Approved    (administrator)
///           └──► Rejected    (administrator)
///
/// Pending | Confirmed | Approved | Rejected ──► Cancelled (administrator)
/// ```
///
/// A payment webhook may only move a reservation out of `Pending`; every
/// other status is final as far as the webhook pipeline is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    /// Booked, awaiting payment confirmation.
    #[default]
    Pending,

    /// Payment confirmed by the provider.
    Confirmed,

    /// Approved by an administrator.
    Approved,

    /// Rejected by an administrator.
    Rejected,

    /// Cancelled (terminal).
    Cancelled,
}

impl ReservationStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [ReservationStatus; 5] = [
        ReservationStatus::Pending,
        ReservationStatus::Confirmed,
        ReservationStatus::Approved,
        ReservationStatus::Rejected,
        ReservationStatus::Cancelled,
    ];

    /// Returns true if a payment confirmation can move this status forward.
    pub fn can_confirm_payment(&self) -> bool {
        matches!(self, ReservationStatus::Pending)
    }

    /// Returns true if an administrator can approve in this status.
    pub fn can_approve(&self) -> bool {
        matches!(self, ReservationStatus::Pending)
    }

    /// Returns true if an administrator can reject in this status.
    pub fn can_reject(&self) -> bool {
        matches!(self, ReservationStatus::Pending)
    }

    /// Returns true if the reservation can be cancelled in this status.
    pub fn can_cancel(&self) -> bool {
        !matches!(self, ReservationStatus::Cancelled)
    }

    /// Returns true if this status was set by an administrator.
    pub fn is_administrative(&self) -> bool {
        matches!(
            self,
            ReservationStatus::Approved | ReservationStatus::Rejected | ReservationStatus::Cancelled
        )
    }

    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReservationStatus::Cancelled)
    }

    /// Returns the status name as stored and serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Approved => "approved",
            ReservationStatus::Rejected => "rejected",
            ReservationStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when parsing an unknown status string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown reservation status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for ReservationStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReservationStatus::Pending),
            "confirmed" => Ok(ReservationStatus::Confirmed),
            "approved" => Ok(ReservationStatus::Approved),
            "rejected" => Ok(ReservationStatus::Rejected),
            "cancelled" => Ok(ReservationStatus::Cancelled),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_status_is_pending() {
        assert_eq!(ReservationStatus::default(), ReservationStatus::Pending);
    }

    #[test]
    fn test_only_pending_can_confirm_payment() {
        assert!(ReservationStatus::Pending.can_confirm_payment());
        assert!(!ReservationStatus::Confirmed.can_confirm_payment());
        assert!(!ReservationStatus::Approved.can_confirm_payment());
        assert!(!ReservationStatus::Rejected.can_confirm_payment());
        assert!(!ReservationStatus::Cancelled.can_confirm_payment());
    }

    #[test]
    fn test_only_pending_can_approve_or_reject() {
        for status in ReservationStatus::ALL {
            let expected = status == ReservationStatus::Pending;
            assert_eq!(status.can_approve(), expected, "{status}");
            assert_eq!(status.can_reject(), expected, "{status}");
        }
    }

    #[test]
    fn test_cancel_from_any_non_cancelled_status() {
        assert!(ReservationStatus::Pending.can_cancel());
        assert!(ReservationStatus::Confirmed.can_cancel());
        assert!(ReservationStatus::Approved.can_cancel());
        assert!(ReservationStatus::Rejected.can_cancel());
        assert!(!ReservationStatus::Cancelled.can_cancel());
    }

    #[test]
    fn test_administrative_statuses() {
        assert!(!ReservationStatus::Pending.is_administrative());
        assert!(!ReservationStatus::Confirmed.is_administrative());
        assert!(ReservationStatus::Approved.is_administrative());
        assert!(ReservationStatus::Rejected.is_administrative());
        assert!(ReservationStatus::Cancelled.is_administrative());
    }

    #[test]
    fn test_parse_round_trip() {
        for status in ReservationStatus::ALL {
            assert_eq!(status.as_str().parse::<ReservationStatus>().unwrap(), status);
        }
        assert!("paid".parse::<ReservationStatus>().is_err());
    }

    #[test]
    fn test_serializes_lowercase() {
        let json = serde_json::to_string(&ReservationStatus::Confirmed).unwrap();
        assert_eq!(json, "\"confirmed\"");
    }
}
