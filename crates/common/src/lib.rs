//! Shared types for the reservation payment backend.

mod types;

pub use types::{ReservationId, VoucherId};
