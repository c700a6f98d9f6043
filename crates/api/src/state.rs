//! Shared application state.

use std::sync::Arc;

use domain::Money;
use payments::{
    BookingService, Notifier, PaymentGateway, ReconciliationEngine, ReservationService,
    SideEffectDispatcher, SignatureVerifier, StoreVoucherIssuer, VoucherIssuer, VoucherService,
};
use ratelimit::RateLimiterRegistry;
use store::{IdempotencyLedger, ReservationStore, VoucherStore};

use crate::auth::{AdminCredentials, PrincipalResolver, StaticTokenResolver};
use crate::config::{Config, ConfigError};

/// Storage, provider and notification backends the state is built over.
pub struct Backends<S> {
    pub reservations: Arc<S>,
    pub vouchers: Arc<dyn VoucherStore>,
    pub ledger: Arc<dyn IdempotencyLedger>,
    pub notifier: Arc<dyn Notifier>,
    pub gateway: Arc<dyn PaymentGateway>,
    /// Backend name reported by the health check.
    pub storage: &'static str,
}

/// Shared application state accessible from all handlers.
pub struct AppState<S: ReservationStore> {
    pub engine: ReconciliationEngine<S>,
    pub bookings: BookingService<S>,
    /// Amount charged when booking.
    pub booking_deposit: Money,
    pub reservations: ReservationService<S>,
    pub vouchers: VoucherService,
    pub dispatcher: SideEffectDispatcher,
    pub ledger: Arc<dyn IdempotencyLedger>,
    pub limiter: RateLimiterRegistry,
    pub principals: Arc<dyn PrincipalResolver>,
    pub admin: Option<AdminCredentials>,
    pub trust_proxy_headers: bool,
    pub storage: &'static str,
}

impl<S: ReservationStore + 'static> AppState<S> {
    /// Wires the pipeline and starts the side-effect workers. Must be called
    /// inside a Tokio runtime.
    pub fn build(config: &Config, backends: Backends<S>) -> Result<Self, ConfigError> {
        let verifier = SignatureVerifier::new(config.webhook_secret.expose()).map_err(|e| {
            ConfigError::Invalid {
                var: "ASAAS_WEBHOOK_SECRET".to_string(),
                reason: e.to_string(),
            }
        })?;

        let issuer: Arc<dyn VoucherIssuer> =
            Arc::new(StoreVoucherIssuer::new(Arc::clone(&backends.vouchers)));
        let dispatcher = SideEffectDispatcher::start(
            config.dispatcher.clone(),
            Arc::clone(&issuer),
            Arc::clone(&backends.notifier),
        );

        let engine = ReconciliationEngine::new(
            verifier,
            Arc::clone(&backends.reservations),
            Arc::clone(&backends.ledger),
            dispatcher.clone(),
        )
        .with_transaction_timeout(config.transaction_timeout);

        let bookings = BookingService::new(Arc::clone(&backends.reservations), backends.gateway);

        let reservations = ReservationService::new(
            backends.reservations,
            Arc::clone(&backends.vouchers),
            issuer,
            backends.notifier,
        );

        let admin = AdminCredentials::from_config(&config.admin);
        let mut resolver = StaticTokenResolver::new();
        if let Some(token) = &config.admin.api_token {
            let subject = config.admin.email.as_deref().unwrap_or("admin");
            resolver = resolver.with_token(token.clone(), subject);
        }

        Ok(Self {
            engine,
            bookings,
            booking_deposit: config.booking_deposit,
            reservations,
            vouchers: VoucherService::new(backends.vouchers),
            dispatcher,
            ledger: backends.ledger,
            limiter: RateLimiterRegistry::new(config.rate_limits.clone()),
            principals: Arc::new(resolver),
            admin,
            trust_proxy_headers: config.trust_proxy_headers,
            storage: backends.storage,
        })
    }
}
