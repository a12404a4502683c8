use hl_leaderboard::cli::Cli;
use hl_leaderboard::client::hyperliquid::Hyperliquid;
use hl_leaderboard::config::Settings;
use hl_leaderboard::scheduler::Refresher;
use hl_leaderboard::server::{serve, AppState};
use hl_leaderboard::storage::SnapshotStore;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let settings = Settings::new(Cli::parse())?;

    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(settings.get_trace_level())
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let store = SnapshotStore::new(settings.retention());
    let source = Hyperliquid::new(
        settings.stats_base_url.clone(),
        settings.network.clone(),
        settings.api_timeout(),
    )?;
    let refresher = Refresher::new(store.clone(), source, &settings);
    let state = AppState::new(store, refresher.subscribe());

    let shutdown = CancellationToken::new();

    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested.");
                signal.cancel();
            }
            Err(e) => error!("Could not listen for shutdown signal. {e}"),
        }
    });

    info!("Starting refresher.");
    let refresher = tokio::spawn(refresher.run(shutdown.clone()));

    let served = serve(&settings.bind_address, state, shutdown.clone()).await;
    // stop the refresher too if the server went down on its own
    shutdown.cancel();
    refresher.await?;
    served?;

    Ok(())
}
