//! Payment confirmation pipeline.
//!
//! This crate turns provider webhooks into reservation confirmations:
//! 1. Verify the HMAC signature over the raw body
//! 2. Deduplicate through the idempotency ledger
//! 3. Confirm the reservation under its row lock
//! 4. Issue the voucher and notify the customer off the request path
//!
//! It also carries booking, the administrative lifecycle and voucher
//! redemption, which share the same store transactions.

pub mod admin;
pub mod booking;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod event;
pub mod services;
pub mod signature;

pub use admin::{ReservationService, ReservationStats, VoucherService};
pub use booking::{Booking, BookingService};
pub use dispatcher::{DispatcherConfig, SideEffectDispatcher};
pub use engine::{Ack, AckStatus, DEFAULT_TRANSACTION_TIMEOUT, ReconciliationEngine};
pub use error::{DispatchError, ServiceError, TransientError, WebhookError};
pub use event::{CONFIRMATION_EVENTS, EventKind, PaymentPayload, WebhookEvent};
pub use services::{
    Charge, GatewayError, InMemoryNotifier, InMemoryPaymentGateway, IssueError, LoggingNotifier,
    Notification, Notifier, NotifyError, PaymentGateway, StoreVoucherIssuer, VoucherIssuer,
};
pub use signature::{EmptySecret, SIGNATURE_HEADER, SignatureVerifier};
