//! Payment pipeline error types.

use std::time::Duration;

use common::ReservationId;
use domain::{InvalidVoucherCode, ReservationError, ReservationStatus, VoucherCode, VoucherError};
use store::StoreError;
use thiserror::Error;

use crate::event::ParseError;
use crate::services::{GatewayError, IssueError};

/// Errors returned by the reconciliation engine.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// No signature header was presented.
    #[error("Missing webhook signature")]
    MissingSignature,

    /// The signature does not match the body.
    #[error("Invalid webhook signature")]
    InvalidSignature,

    /// The verified body is not a valid webhook event.
    #[error("Invalid webhook payload: {0}")]
    MalformedPayload(#[from] ParseError),

    /// The event could not be applied now; the provider should retry.
    #[error("Transient failure: {0}")]
    Transient(#[from] TransientError),

    /// A store failure that retrying will not fix.
    #[error("Store error: {0}")]
    Store(StoreError),
}

/// Failures worth a provider retry.
#[derive(Debug, Error)]
pub enum TransientError {
    #[error(transparent)]
    Store(StoreError),

    /// Begin, lock and save did not finish within the transaction timeout.
    #[error("Transaction did not complete within {0:?}")]
    TransactionTimeout(Duration),

    /// The confirmation task ended without reporting a result.
    #[error("Confirmation task aborted")]
    Aborted,
}

impl From<StoreError> for WebhookError {
    fn from(err: StoreError) -> Self {
        if err.is_transient() {
            WebhookError::Transient(TransientError::Store(err))
        } else {
            WebhookError::Store(err)
        }
    }
}

impl WebhookError {
    /// Returns true if the provider should retry the delivery.
    pub fn is_transient(&self) -> bool {
        matches!(self, WebhookError::Transient(_))
    }

    /// Short label used for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            WebhookError::MissingSignature => "missing_signature",
            WebhookError::InvalidSignature => "invalid_signature",
            WebhookError::MalformedPayload(_) => "malformed_payload",
            WebhookError::Transient(_) => "transient",
            WebhookError::Store(_) => "store_error",
        }
    }
}

/// Errors returned when handing work to the side-effect dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The queue stayed full for the whole enqueue timeout.
    #[error("Side-effect queue full after {0:?}")]
    QueueFull(Duration),

    /// The dispatcher no longer accepts work.
    #[error("Side-effect dispatcher is shut down")]
    ShutDown,
}

/// Errors returned by the administrative and voucher services.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Reservation not found: {0}")]
    ReservationNotFound(ReservationId),

    #[error("Voucher not found: {0}")]
    VoucherNotFound(String),

    #[error(transparent)]
    InvalidVoucherCode(#[from] InvalidVoucherCode),

    #[error(transparent)]
    Transition(#[from] ReservationError),

    #[error(transparent)]
    Voucher(#[from] VoucherError),

    /// Vouchers are only issued for confirmed reservations.
    #[error("Reservation {id} is {status}, not confirmed")]
    NotConfirmed {
        id: ReservationId,
        status: ReservationStatus,
    },

    #[error("Voucher issuance failed: {0}")]
    Issue(IssueError),

    /// The booking data does not describe a valid reservation.
    #[error("Invalid booking: {0}")]
    InvalidBooking(ReservationError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ReservationNotFound(id) => ServiceError::ReservationNotFound(id),
            StoreError::VoucherNotFound(code) => ServiceError::VoucherNotFound(code.to_string()),
            StoreError::Voucher(err) => ServiceError::Voucher(err),
            other => ServiceError::Store(other),
        }
    }
}

impl From<IssueError> for ServiceError {
    fn from(err: IssueError) -> Self {
        match err {
            IssueError::NotConfirmed { id, status } => ServiceError::NotConfirmed { id, status },
            IssueError::Store(err) => err.into(),
            other => ServiceError::Issue(other),
        }
    }
}

impl ServiceError {
    /// Returns true if the failure is worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            ServiceError::Store(err) => err.is_transient(),
            ServiceError::Gateway(GatewayError::Unavailable(_)) => true,
            _ => false,
        }
    }

    pub(crate) fn voucher_not_found(code: &VoucherCode) -> Self {
        ServiceError::VoucherNotFound(code.to_string())
    }
}
