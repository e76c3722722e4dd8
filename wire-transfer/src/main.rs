//! Wire-transfer HTTP server.

use anyhow::Context;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wire_saga_core::environment::SystemClock;
use wire_saga_runtime::metrics::install_recorder;
use wire_transfer::{
    Config, WireTransferService,
    activities::{HttpBankClient, HttpLedgerClient},
    saga::WireTransferEnvironment,
    server::{AppState, build_router},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wire_transfer=info,wire_saga_runtime=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting wire-transfer server");

    let config = Config::from_env().context("invalid configuration")?;
    info!(
        bank_api_url = %config.services.bank_api_url,
        ledger_api_url = %config.services.ledger_api_url,
        confirmation_timeout_secs = ?config.saga.confirmation_timeout_secs,
        completed_retention = config.saga.completed_retention,
        "Configuration loaded"
    );

    let metrics = install_recorder().context("failed to install metrics recorder")?;

    let timeout = config.activity_timeout();
    let ledger = HttpLedgerClient::new(&config.services.ledger_api_url, timeout)
        .context("failed to build ledger client")?;
    let bank = HttpBankClient::new(&config.services.bank_api_url, timeout)
        .context("failed to build bank client")?;

    let service = WireTransferService::with_retention(
        WireTransferEnvironment {
            ledger: Arc::new(ledger),
            bank: Arc::new(bank),
            clock: Arc::new(SystemClock),
            policies: config.policies(),
        },
        config.saga.completed_retention,
    );
    let app = build_router(AppState::new(service, Some(metrics)));

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = signal::ctrl_c().await {
        tracing::error!(%error, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
