//! Skirmish Hub
//!
//! Runs the server directory behind its WebSocket endpoint together with the
//! matchmaker. Configuration comes from `SKIRMISH_*` environment variables,
//! log filtering from `RUST_LOG`.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use skirmish::{Hub, HubConfig, HubServer, MatchmakerConfig, Matchmaker, ServerConfig, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let hub_config = HubConfig::from_env().context("hub configuration")?;
    let server_config = ServerConfig::from_env().context("server configuration")?;
    let matchmaker_config = MatchmakerConfig::from_env().context("matchmaker configuration")?;

    info!("Skirmish Hub v{}", VERSION);
    info!(
        "Stale timeout {:?}, sweep every {:?}",
        hub_config.stale_timeout, hub_config.cleanup_interval
    );

    let hub = Arc::new(Hub::new(hub_config));
    let sweeper = hub.start();

    let matchmaker = Arc::new(Matchmaker::new(matchmaker_config, hub.clone()));
    let mut results = matchmaker.subscribe();
    let loops = matchmaker.start();

    tokio::spawn(async move {
        loop {
            match results.recv().await {
                Ok(result) => info!(
                    "Match {} ({}) -> {} [{}]",
                    result.match_id,
                    result.mode,
                    result.server.name,
                    result.player_ids.join(", ")
                ),
                Err(RecvError::Lagged(n)) => warn!("Match log skipped {} results", n),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let server = HubServer::bind(server_config, hub.clone())
        .await
        .context("starting hub server")?;
    let server_stop = server.shutdown_handle();
    let server_task = tokio::spawn(async move { server.run().await });

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("Shutting down");

    server_stop.trigger();
    matchmaker.stop();
    hub.stop();

    server_task.await.context("hub server task")??;
    for handle in loops {
        let _ = handle.await;
    }
    let _ = sweeper.await;

    info!("Stopped");
    Ok(())
}
