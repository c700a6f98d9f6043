//! API server entry point.

use std::net::SocketAddr;
use std::sync::Arc;

use api::config::{Config, LogFormat};
use api::{AppState, Backends};
use metrics_exporter_prometheus::PrometheusHandle;
use payments::{InMemoryPaymentGateway, LoggingNotifier};
use sqlx::postgres::PgPoolOptions;
use store::{PostgresLedger, PostgresReservationStore, PostgresVoucherStore, ReservationStore};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Builds the state, serves until a signal arrives, then drains side effects.
async fn serve<S: ReservationStore + 'static>(
    config: Config,
    backends: Backends<S>,
    metrics_handle: PrometheusHandle,
) {
    let state = Arc::new(AppState::build(&config, backends).expect("invalid configuration"));
    let maintenance = api::spawn_maintenance(state.clone(), &config);
    let app = api::create_app(state.clone(), metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, storage = state.storage, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("server error");

    maintenance.abort();
    state.dispatcher.shutdown().await;
    tracing::info!("server shut down gracefully");
}

/// `api hash-password` reads a password from stdin and prints the value
/// for `ADMIN_PASSWORD_HASH`.
fn hash_password_from_stdin() {
    let mut password = String::new();
    std::io::stdin()
        .read_line(&mut password)
        .expect("failed to read password from stdin");
    let hash = api::auth::hash_password(password.trim_end_matches(['\r', '\n']))
        .expect("failed to hash password");
    println!("{hash}");
}

#[tokio::main]
async fn main() {
    if std::env::args().nth(1).as_deref() == Some("hash-password") {
        hash_password_from_stdin();
        return;
    }

    // 1. Load configuration and initialize tracing
    let config = Config::from_env().expect("failed to load configuration");
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");
    api::routes::metrics::describe();

    // 3. Pick storage backends and serve
    match config.database_url.clone() {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .connect(url.expose())
                .await
                .expect("failed to connect to database");
            store::postgres::run_migrations(&pool)
                .await
                .expect("failed to run migrations");

            tracing::warn!("no payment provider client configured, charges are simulated in memory");
            let backends = Backends {
                reservations: Arc::new(
                    PostgresReservationStore::new(pool.clone())
                        .with_lock_timeout(config.lock_timeout),
                ),
                vouchers: Arc::new(PostgresVoucherStore::new(pool.clone())),
                ledger: Arc::new(PostgresLedger::new(pool)),
                notifier: Arc::new(LoggingNotifier),
                gateway: Arc::new(InMemoryPaymentGateway::new()),
                storage: "postgres",
            };
            serve(config, backends, metrics_handle).await;
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory stores");
            let backends = api::in_memory_backends(&config);
            serve(config, backends, metrics_handle).await;
        }
    }
}
