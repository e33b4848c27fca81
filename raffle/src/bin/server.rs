//! Raffle order service HTTP server.
//!
//! This binary:
//! - Loads configuration from the environment (and `.env`)
//! - Connects the configured data store and applies migrations
//! - Wires the payment, storage, notification and auth adapters
//! - Serves the API and a separate Prometheus `/metrics` listener
//!
//! # Usage
//!
//! ```bash
//! DATABASE_URL=postgres://localhost/raffle PAYPHONE_TOKEN=... AUTH_URL=... \
//!     cargo run --bin raffle-server
//! ```

use anyhow::Context;
use raffle::auth::{AdminAuthorizer, HttpAdminAuthorizer, StaticTokenAuthorizer};
use raffle::config::{Config, StoreBackend};
use raffle::environment::SystemClock;
use raffle::notify::{ConsoleNotifier, Notifier, WebhookNotifier};
use raffle::payment_gateway::{DisabledPaymentGateway, PayPhoneGateway, PaymentGateway};
use raffle::server::{AppState, build_router};
use raffle::storage::{HttpProofStorage, ProofStorage, UnconfiguredStorage};
use raffle::store::{DataStore, MemoryStore, PgStore};
use raffle::{ReconcileEnvironment, Reconciler, ReconcilerSettings};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(err) = dotenvy::dotenv() {
        if !err.not_found() {
            return Err(err).context("failed to read .env");
        }
    }

    let config = Config::from_env().context("invalid configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.server.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        store = ?config.store,
        card_payments = config.payphone.enabled,
        "Starting raffle order service"
    );

    let prometheus = raffle::metrics::install_prometheus().context("failed to install metrics recorder")?;
    let metrics_addr = format!("{}:{}", config.server.metrics_host, config.server.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {metrics_addr}"))?;
    info!(address = %metrics_addr, "Metrics available at /metrics");
    tokio::spawn(async move {
        if let Err(err) = axum::serve(metrics_listener, raffle::metrics::metrics_router(prometheus)).await {
            error!(error = %err, "Metrics server stopped");
        }
    });

    let store = build_store(&config).await?;
    let env = ReconcileEnvironment {
        store: Arc::clone(&store),
        payments: build_payments(&config),
        storage: build_storage(&config),
        notifier: build_notifier(&config),
        clock: Arc::new(SystemClock),
    };
    let reconciler = Arc::new(Reconciler::new(env, ReconcilerSettings::from_config(&config)));
    let state = AppState::new(reconciler, build_authorizer(&config, store));

    let app = build_router(state, &config.server.cors_origins);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Duration::from_secs(config.server.shutdown_timeout)))
        .await
        .context("server error")?;

    info!("Server stopped");
    Ok(())
}

async fn build_store(config: &Config) -> anyhow::Result<Arc<dyn DataStore>> {
    match config.store {
        StoreBackend::Postgres => {
            info!("Connecting to PostgreSQL...");
            let store = PgStore::connect(&config.postgres)
                .await
                .context("failed to connect to PostgreSQL")?;
            if config.postgres.run_migrations {
                store.migrate().await.context("failed to run migrations")?;
                info!("Migrations applied");
            }
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            warn!("Using the in-memory store; data is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

fn build_payments(config: &Config) -> Arc<dyn PaymentGateway> {
    if config.payphone.enabled {
        Arc::new(PayPhoneGateway::new(&config.payphone))
    } else {
        warn!("Card payments disabled");
        Arc::new(DisabledPaymentGateway)
    }
}

fn build_storage(config: &Config) -> Arc<dyn ProofStorage> {
    match &config.storage.base_url {
        Some(base_url) => Arc::new(HttpProofStorage::new(base_url, &config.storage)),
        None => {
            warn!("STORAGE_URL not set; transfer proofs will not be linked");
            Arc::new(UnconfiguredStorage)
        }
    }
}

fn build_notifier(config: &Config) -> Arc<dyn Notifier> {
    match &config.notifications.webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(
            url.clone(),
            Duration::from_secs(config.notifications.timeout_secs),
        )),
        None => Arc::new(ConsoleNotifier),
    }
}

fn build_authorizer(config: &Config, store: Arc<dyn DataStore>) -> Arc<dyn AdminAuthorizer> {
    match &config.auth.auth_url {
        Some(auth_url) => Arc::new(HttpAdminAuthorizer::new(auth_url, &config.auth, store)),
        None => {
            warn!("AUTH_URL not set; admin routes accept the static ADMIN_TOKENS only");
            Arc::new(StaticTokenAuthorizer::new(config.auth.admin_tokens.clone()))
        }
    }
}

/// Waits for Ctrl+C or SIGTERM, then gives in-flight requests `grace` to
/// finish before the process exits.
async fn shutdown_signal(grace: Duration) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C signal, shutting down gracefully..."),
        () = terminate => info!("Received SIGTERM signal, shutting down gracefully..."),
    }

    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        warn!(grace_secs = grace.as_secs(), "Shutdown grace period elapsed, exiting");
        std::process::exit(0);
    });
}
