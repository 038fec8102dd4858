mod accrual;
mod balance;
mod bootstrap;
mod config;
mod error;
mod ledger;
mod middleware;
mod orders;
mod server;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

// Initialize logging and tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,tower_http=debug,loyalty_backend=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
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
                error!("Failed to listen for SIGTERM: {}", e);
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
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    info!("🚀 Starting loyalty points backend");

    let config = Config::from_env()?;
    let bootstrap::App { state, reconciler } = bootstrap::initialize_app(&config).await?;
    let app = server::create_app(state);

    // Cancelled by a signal, a reconciler failure, or the server exiting on its own
    let stop = CancellationToken::new();

    let http = {
        let stop = stop.clone();
        let run_address = config.run_address.clone();
        tokio::spawn(async move {
            let shutdown = {
                let stop = stop.clone();
                async move { stop.cancelled().await }
            };
            let result = server::run_server(app, &run_address, shutdown).await;
            stop.cancel();
            result
        })
    };

    tokio::select! {
        _ = shutdown_signal() => info!("🛑 Shutdown signal received"),
        _ = reconciler.wait() => error!("❌ Accrual reconciler stopped, shutting down"),
        _ = stop.cancelled() => {},
    }
    stop.cancel();

    let served = http
        .await
        .map_err(|e| anyhow::anyhow!("http server task failed: {}", e))?;
    let reconciled = reconciler.shutdown().await;

    if let Err(e) = &served {
        error!("❌ HTTP server failed: {}", e);
    }
    if let Err(e) = &reconciled {
        error!("❌ Accrual reconciler failed: {}", e);
    }
    served?;
    reconciled?;

    info!("👋 Shutdown complete");
    Ok(())
}
