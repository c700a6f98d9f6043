//! Payment provider trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use domain::{Money, PaymentId, Reservation};
use thiserror::Error;

/// Errors reported by the payment provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The provider refused the charge.
    #[error("Payment provider rejected the charge: {0}")]
    Rejected(String),

    /// The provider could not be reached; the booking can be retried.
    #[error("Payment provider unavailable: {0}")]
    Unavailable(String),
}

/// A charge created at the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Charge {
    pub payment_id: PaymentId,
    pub amount: Money,
}

/// Creates provider charges for reservations.
///
/// The provider deduplicates on the reservation's external reference, so
/// calling again for the same reservation returns the original charge.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_charge(&self, reservation: &Reservation) -> Result<Charge, GatewayError>;
}

#[derive(Debug, Default)]
struct InMemoryGatewayState {
    charges: HashMap<String, Charge>,
    next_id: u32,
    fail_with: Option<GatewayError>,
}

/// In-memory provider. Charge ids are sequential, keyed by external reference.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<RwLock<InMemoryGatewayState>>,
}

impl InMemoryPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following charge fail with `error`, or succeed again with `None`.
    pub fn set_failure(&self, error: Option<GatewayError>) {
        self.state.write().unwrap().fail_with = error;
    }

    /// Returns the number of distinct charges created.
    pub fn charge_count(&self) -> usize {
        self.state.read().unwrap().charges.len()
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn create_charge(&self, reservation: &Reservation) -> Result<Charge, GatewayError> {
        let mut state = self.state.write().unwrap();

        if let Some(error) = &state.fail_with {
            return Err(error.clone());
        }
        if let Some(existing) = state.charges.get(&reservation.external_reference) {
            return Ok(existing.clone());
        }

        state.next_id += 1;
        let charge = Charge {
            payment_id: PaymentId::from(format!("pay_{:06}", state.next_id)),
            amount: reservation.amount,
        };
        state
            .charges
            .insert(reservation.external_reference.clone(), charge.clone());
        Ok(charge)
    }
}
