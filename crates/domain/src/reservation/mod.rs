//! Reservation entity, lifecycle and related value objects.

mod model;
mod state;
mod value_objects;

pub use model::{NewReservation, Reservation};
pub use state::{ReservationStatus, UnknownStatus};
pub use value_objects::{Money, PaymentId};

use thiserror::Error;

/// Errors that can occur during reservation operations.
#[derive(Debug, Error)]
pub enum ReservationError {
    /// The reservation is not in a state that allows the action.
    #[error("Invalid state transition: cannot {action} from {current} state")]
    InvalidStateTransition {
        current: ReservationStatus,
        action: &'static str,
    },

    /// A payment confirmation was applied to an already confirmed reservation.
    #[error("Reservation already confirmed")]
    AlreadyConfirmed,

    /// A different payment is already attached to the reservation.
    #[error("Reservation already has payment {existing}")]
    PaymentAlreadyAttached { existing: PaymentId },

    /// External reference is required.
    #[error("External reference is required")]
    ExternalReferenceRequired,

    /// Invalid party size.
    #[error("Invalid party size: {party_size} (must be greater than 0)")]
    InvalidPartySize { party_size: u32 },

    /// Invalid amount.
    #[error("Invalid amount: {cents} (must not be negative)")]
    InvalidAmount { cents: i64 },
}
