//! Domain layer for the reservation payment backend.
//!
//! This crate provides:
//! - `Reservation` with its lifecycle state machine (`ReservationStatus`)
//! - `Voucher` with single-use redemption and a 30-day validity window
//! - Value objects (`Money`, `PaymentId`, `VoucherCode`)
//!
//! It is free of I/O; persistence lives in the `store` crate.

pub mod reservation;
pub mod voucher;

pub use reservation::{
    Money, NewReservation, PaymentId, Reservation, ReservationError, ReservationStatus,
    UnknownStatus,
};
pub use voucher::{
    InvalidVoucherCode, VOUCHER_VALIDITY_DAYS, Voucher, VoucherCode, VoucherError,
};
