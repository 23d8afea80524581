//! voucher-gate entry point.

mod cli;

use axum::{routing::get, Json, Router};
use clap::Parser;
use cli::Cli;
use color_eyre::eyre::WrapErr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use voucher_gate::{create_router, ChannelLedger, ChannelState, EthersGateway};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let config = cli.into_config()?;

    let filter = EnvFilter::try_new(&config.log_level)
        .wrap_err_with(|| format!("invalid log level {:?}", config.log_level))?;
    let registry = tracing_subscriber::registry().with(filter);
    if cli.log_json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    info!("voucher-gate v{}", env!("CARGO_PKG_VERSION"));

    let gateway = EthersGateway::connect(&config.chain_settings(cli.private_key.clone()))?;
    let settings = config.payment_settings(gateway.signer_address());

    if let Some(parent) = config.ledger_path.parent() {
        std::fs::create_dir_all(parent)
            .wrap_err_with(|| format!("creating {}", parent.display()))?;
    }
    let ledger = Arc::new(ChannelLedger::open(&config.ledger_path, config.retention)?);
    info!(path = %config.ledger_path.display(), stats = ?ledger.stats(), "Ledger loaded");

    let state = ChannelState::new(Arc::new(gateway), ledger, settings)
        .with_admin_token(config.admin_token.clone());
    if state.admin_token().is_none() {
        warn!("No admin token configured, /payments admin routes are disabled");
    }

    if config.claims.enabled {
        state.scheduler.start(
            Duration::from_secs(config.claims.interval_secs),
            config.claims.expiry_buffer_secs,
        );
    }

    // Placeholder metered surface; deployments mount their own routes.
    let metered = Router::new().route("/ping", get(|| async { Json("pong") }));
    let app = create_router(state.clone(), metered);

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .wrap_err_with(|| format!("binding {}", config.listen))?;
    info!(address = %config.listen, provider = ?settings.provider, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await?;

    state.scheduler.stop().await;

    info!("Goodbye!");
    Ok(())
}
