#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use fanoutd::config::{Args, ServerConfig};
use fanoutd::metrics::install_recorder;
use fanoutd::server::ServerState;
use fanoutd::{control, run_with_shutdown};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config: ServerConfig = args.into();

    // Validate configuration before starting
    if let Err(e) = config.validate() {
        anyhow::bail!("configuration error: {}", e);
    }

    info!("accepting user agents: {}", config.allowed_agents.join(", "));
    match &config.deny_list {
        Some(path) => info!("deny-list file: {}", path.display()),
        None => info!("no deny-list configured"),
    }

    let state = Arc::new(ServerState::new(config.clone()));
    let prometheus = install_recorder()?;

    let listener = TcpListener::bind(config.listen).await?;
    info!("bound to {}", config.listen);
    let control_listener = TcpListener::bind(config.control_addr).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(());

    let control_task = tokio::spawn({
        let state = Arc::clone(&state);
        let shutdown_rx = shutdown_rx.clone();
        async move {
            if let Err(e) = control::serve(control_listener, state, Some(prometheus), shutdown_rx).await
            {
                warn!("control plane error: {}", e);
            }
        }
    });

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for shutdown signal: {}", e);
            // Dropping the sender would shut the server down
            std::future::pending::<()>().await;
        }
        info!("received shutdown signal");
        let _ = shutdown_tx.send(());
    });

    if let Err(e) = run_with_shutdown(listener, state, shutdown_rx).await {
        tracing::error!("server error: {}", e);
    }
    if let Err(e) = control_task.await {
        warn!("control plane task failed: {}", e);
    }

    Ok(())
}
