//! Popug Server - Main entry point
//!
//! Runs one choreography participant (task tracker or accounting): the
//! consumer loop and the outbox relay, until a shutdown signal arrives or
//! the broker fails.

use clap::Parser;

use popug_core::{app::App, config::Config, observability};

#[derive(Parser, Debug)]
#[command(name = "popug-server", version, about = "Popug choreography service")]
struct Args {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, env = "POPUG_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = Config::load(args.config.as_deref())?;

    // Initialize observability
    observability::init(
        &config.service.name,
        config.observability.otlp_endpoint.as_deref(),
        config.observability.json_logging,
        &config.observability.log_level,
    )?;
    if let Some(addr) = config.observability.metrics_addr {
        observability::install_prometheus(addr)?;
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        role = config.service.role.as_str(),
        "Starting Popug server"
    );

    let app = App::build(config).await?;
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let relay = app.relay();
    let relay_task = tokio::spawn(relay.run(shutdown_rx.clone()));

    let consumer = app.consumer();
    let mut consumer_task = tokio::spawn(consumer.run(shutdown_rx));

    // A consumer that exits on its own has hit a broker read error.
    let consumer_result = tokio::select! {
        _ = shutdown_signal() => {
            let _ = shutdown_tx.send(true);
            consumer_task.await
        }
        result = &mut consumer_task => {
            tracing::error!("Consumer loop exited; shutting down");
            let _ = shutdown_tx.send(true);
            result
        }
    };

    if let Err(e) = relay_task.await {
        tracing::error!(error = %e, "Outbox relay task panicked");
    }

    // Cleanup
    observability::shutdown();
    tracing::info!("Server shutdown complete");

    consumer_result??;
    Ok(())
}

/// Wait for shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
