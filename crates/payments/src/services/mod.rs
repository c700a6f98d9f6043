//! External collaborators: the payment provider, voucher issuance and
//! customer notification.

pub mod gateway;
pub mod notifier;
pub mod voucher_issuer;

pub use gateway::{Charge, GatewayError, InMemoryPaymentGateway, PaymentGateway};
pub use notifier::{InMemoryNotifier, LoggingNotifier, Notification, Notifier, NotifyError};
pub use voucher_issuer::{IssueError, StoreVoucherIssuer, VoucherIssuer};
