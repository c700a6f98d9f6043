//! HTTP API server for reservation payment webhooks.
//!
//! Exposes the provider webhook, administrative reservation and voucher
//! endpoints behind per-client rate limiting, with structured logging
//! (tracing) and Prometheus metrics.

pub mod auth;
pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use payments::{InMemoryPaymentGateway, LoggingNotifier};
use store::{InMemoryLedger, InMemoryReservationStore, InMemoryVoucherStore, ReservationStore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
pub use state::{AppState, Backends};

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: ReservationStore + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    let protected = Router::new()
        .route("/admin/reservations", get(routes::admin::list::<S>))
        .route("/admin/reservations/{id}", get(routes::admin::get::<S>))
        .route(
            "/admin/reservations/{id}/approve",
            post(routes::admin::approve::<S>),
        )
        .route(
            "/admin/reservations/{id}/reject",
            post(routes::admin::reject::<S>),
        )
        .route(
            "/admin/reservations/{id}/cancel",
            post(routes::admin::cancel::<S>),
        )
        .route(
            "/admin/reservations/{id}/voucher",
            post(routes::admin::reissue_voucher::<S>),
        )
        .route("/admin/stats", get(routes::admin::stats::<S>))
        .route("/vouchers/{code}", get(routes::vouchers::get::<S>))
        .route(
            "/vouchers/{code}/redeem",
            post(routes::vouchers::redeem::<S>),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::require_authenticated::<S>,
        ));

    Router::new()
        .route("/health", get(routes::health::check::<S>))
        .route("/webhooks/asaas", post(routes::webhooks::receive::<S>))
        .route("/webhooks/asaas/status", get(routes::webhooks::status))
        .route("/auth/login", post(routes::auth::login::<S>))
        .route("/reservations", post(routes::reservations::create::<S>))
        .merge(protected)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit::<S>,
        ))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Backends for running without a database.
pub fn in_memory_backends(config: &Config) -> Backends<InMemoryReservationStore> {
    Backends {
        reservations: Arc::new(InMemoryReservationStore::with_lock_timeout(
            config.lock_timeout,
        )),
        vouchers: Arc::new(InMemoryVoucherStore::new()),
        ledger: Arc::new(InMemoryLedger::new()),
        notifier: Arc::new(LoggingNotifier),
        gateway: Arc::new(InMemoryPaymentGateway::new()),
        storage: "memory",
    }
}

/// Periodically purges expired ledger records and idle rate-limit buckets.
pub fn spawn_maintenance<S: ReservationStore + 'static>(
    state: Arc<AppState<S>>,
    config: &Config,
) -> JoinHandle<()> {
    let retention = config.ledger_retention;
    let max_idle = config.rate_limit_idle;
    let mut ticker = tokio::time::interval(config.maintenance_interval.max(Duration::from_secs(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tokio::spawn(async move {
        loop {
            ticker.tick().await;
            run_maintenance(&state, retention, max_idle).await;
        }
    })
}

async fn run_maintenance<S: ReservationStore + 'static>(
    state: &AppState<S>,
    retention: Duration,
    max_idle: Duration,
) {
    match state.ledger.purge_expired(retention).await {
        Ok(0) => {}
        Ok(purged) => {
            metrics::counter!("ledger_purged_total").increment(purged);
            tracing::info!(purged, "purged expired processed-event records");
        }
        Err(e) => tracing::warn!(error = %e, "ledger purge failed"),
    }
    state.limiter.purge_idle(max_idle);
}
