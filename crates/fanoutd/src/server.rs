use crate::admission::{AdmissionGate, DenyList};
use crate::config::ServerConfig;
use crate::connection::handle_connection;
use crate::distributor::CommandDistributor;
use crate::error::FanoutError;
use crate::metrics::HealthState;
use crate::ratelimit::RateLimiter;
use crate::registry::ClientRegistry;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// How long shutdown waits for link tasks to finish.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared state for the registry server.
pub struct ServerState {
    /// Runtime server configuration.
    pub config: ServerConfig,
    /// Pre-link admission policy.
    pub gate: AdmissionGate,
    /// Admitted links.
    pub registry: ClientRegistry,
    /// Payload validation and fan-out.
    pub distributor: CommandDistributor,
    /// Links currently past admission.
    pub active_links: AtomicUsize,
    /// Readiness reported by the control plane.
    pub health: HealthState,
    /// Process start, for uptime reporting.
    pub started_at: Instant,
}

impl ServerState {
    /// Build the server state described by `config`.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        let gate = AdmissionGate::new(
            DenyList::new(config.deny_list.clone()),
            RateLimiter::new(config.rate_limit, config.rate_window()),
            config.allowed_agents.clone(),
        );
        Self {
            gate,
            registry: ClientRegistry::new(),
            distributor: CommandDistributor::new(config.max_payload),
            active_links: AtomicUsize::new(0),
            health: HealthState::new(),
            started_at: Instant::now(),
            config,
        }
    }
}

/// # Errors
///
/// Returns an error if the accept loop encounters an I/O failure.
pub async fn run(listener: TcpListener, state: Arc<ServerState>) -> Result<(), FanoutError> {
    let (_shutdown_tx, shutdown_rx) = watch::channel(());
    run_with_shutdown(listener, state, shutdown_rx).await
}

/// Run the server accept loop with an externally-controlled shutdown signal.
///
/// Shutdown starts when a value is sent on the channel or its sender is
/// dropped. The accept loop then stops, every registered link is told to
/// close, and in-flight link tasks are awaited up to a drain timeout.
///
/// # Errors
///
/// Returns an error if the listener's local address cannot be read.
pub async fn run_with_shutdown(
    listener: TcpListener,
    state: Arc<ServerState>,
    mut shutdown_rx: watch::Receiver<()>,
) -> Result<(), FanoutError> {
    let local_addr = listener.local_addr().map_err(FanoutError::Io)?;
    info!("server listening on {}", local_addr);

    let upkeep = spawn_upkeep(Arc::clone(&state), shutdown_rx.clone());
    let mut links = JoinSet::new();

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        if state.active_links.load(Ordering::Relaxed) >= state.config.max_conns {
                            warn!("max connections reached, rejecting {}", addr);
                            drop(stream);
                            continue;
                        }
                        let state = Arc::clone(&state);
                        links.spawn(async move {
                            if let Err(e) = handle_connection(stream, addr, state).await {
                                debug!("connection from {} closed: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("failed to accept connection: {}", e);
                    }
                }
            }
            Some(_) = links.join_next(), if !links.is_empty() => {}
            _ = shutdown_rx.changed() => {
                info!("shutdown signal received, draining {} links", links.len());
                break;
            }
        }
    }

    state.health.set_ready(false);
    let closed = state.registry.close_all();
    debug!("released {} registry entries", closed);

    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        while links.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(
            "drain timeout reached with {} links still active",
            links.len()
        );
        links.abort_all();
    }

    if let Err(e) = upkeep.await {
        warn!("upkeep task ended abnormally: {}", e);
    }

    info!("server shut down gracefully");
    Ok(())
}

/// Spawn the periodic maintenance task: rate limiter cleanup and a
/// registry summary log line. Ends when shutdown is signalled.
pub fn spawn_upkeep(state: Arc<ServerState>, mut shutdown_rx: watch::Receiver<()>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut cleanup = interval(Duration::from_secs(state.config.rate_cleanup_interval));
        let mut stats = interval(Duration::from_secs(state.config.stats_interval));
        cleanup.set_missed_tick_behavior(MissedTickBehavior::Delay);
        stats.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Both intervals fire immediately on the first tick
        cleanup.tick().await;
        stats.tick().await;

        loop {
            tokio::select! {
                _ = cleanup.tick() => {
                    state.gate.rate_limiter().cleanup();
                    debug!(tracked = state.gate.rate_limiter().tracked(), "rate limiter cleaned up");
                }
                _ = stats.tick() => {
                    let clients = state.registry.len();
                    if clients > 0 {
                        info!(clients, "clients connected");
                    }
                }
                _ = shutdown_rx.changed() => break,
            }
        }
    })
}
