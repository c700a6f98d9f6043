//! Provider webhook envelope.

use domain::PaymentId;
use serde::{Deserialize, Serialize};

/// Event types that confirm a payment.
pub const CONFIRMATION_EVENTS: [&str; 2] = ["PAYMENT_RECEIVED", "PAYMENT_CONFIRMED"];

/// A webhook notification as sent by the payment provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// Provider-assigned event id, the idempotency key.
    pub id: String,

    /// Event type, e.g. `PAYMENT_CONFIRMED`.
    pub event: String,

    /// Present on payment events only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment: Option<PaymentPayload>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// Payment fields carried by a webhook. Only `id` is used for correlation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub net_value: Option<f64>,
    #[serde(default)]
    pub billing_type: Option<String>,
    #[serde(default)]
    pub external_reference: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub confirm_date: Option<String>,
    #[serde(default)]
    pub customer: Option<String>,
}

/// How the engine treats an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// The payment was received or confirmed.
    PaymentConfirmation,
    /// Anything else; acknowledged without store work.
    Other,
}

/// Reason a body could not be turned into a [`WebhookEvent`].
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("Missing {0}")]
    MissingField(&'static str),
}

impl WebhookEvent {
    /// Parses a raw body. Callers must verify the signature first.
    pub fn parse(raw_body: &[u8]) -> Result<Self, ParseError> {
        let event: WebhookEvent = serde_json::from_slice(raw_body)?;
        if event.id.trim().is_empty() {
            return Err(ParseError::MissingField("event id"));
        }
        if event.kind() == EventKind::PaymentConfirmation && event.payment_id().is_none() {
            return Err(ParseError::MissingField("payment id"));
        }
        Ok(event)
    }

    pub fn kind(&self) -> EventKind {
        if CONFIRMATION_EVENTS.contains(&self.event.as_str()) {
            EventKind::PaymentConfirmation
        } else {
            EventKind::Other
        }
    }

    /// The non-blank payment id, if the event carries a payment.
    pub fn payment_id(&self) -> Option<PaymentId> {
        self.payment
            .as_ref()
            .map(|payment| payment.id.trim())
            .filter(|id| !id.is_empty())
            .map(PaymentId::from)
    }
}
