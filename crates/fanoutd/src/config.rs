use clap::Parser;
use fanout_common::types::DEFAULT_ALLOWED_AGENTS;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// CLI arguments for the registry server.
#[derive(Parser, Debug, Clone)]
#[command(name = "fanoutd")]
#[command(about = "Connection registry and command distribution server")]
#[command(version)]
pub struct Args {
    /// Socket address for client WebSocket links.
    #[arg(long, default_value = "0.0.0.0:3000", env = "FANOUT_LISTEN")]
    pub listen: SocketAddr,
    /// Socket address for the HTTP control plane.
    #[arg(long, default_value = "127.0.0.1:8080", env = "FANOUT_CONTROL_ADDR")]
    pub control_addr: SocketAddr,
    /// User-Agent substrings accepted at admission (comma separated).
    #[arg(
        long,
        value_delimiter = ',',
        default_values_t = DEFAULT_ALLOWED_AGENTS.iter().map(|s| (*s).to_string()).collect::<Vec<_>>(),
        env = "FANOUT_ALLOWED_AGENTS"
    )]
    pub allowed_agents: Vec<String>,
    /// File of denied addresses, one per line. Re-read on every admission.
    #[arg(long, env = "FANOUT_DENY_LIST")]
    pub deny_list: Option<PathBuf>,
    /// Admission attempts allowed per address within the rate window.
    #[arg(long, default_value = "10", env = "FANOUT_RATE_LIMIT")]
    pub rate_limit: usize,
    /// Rate window length in seconds.
    #[arg(long, default_value = "60", env = "FANOUT_RATE_WINDOW")]
    pub rate_window: u64,
    /// Interval between rate limiter cleanups in seconds.
    #[arg(long, default_value = "300", env = "FANOUT_RATE_CLEANUP_INTERVAL")]
    pub rate_cleanup_interval: u64,
    /// Interval between registry summary log lines in seconds.
    #[arg(long, default_value = "30", env = "FANOUT_STATS_INTERVAL")]
    pub stats_interval: u64,
    /// Maximum total concurrent links.
    #[arg(long, default_value = "10000", env = "FANOUT_MAX_CONNS")]
    pub max_conns: usize,
    /// Maximum distributed payload size in bytes.
    #[arg(long, default_value = "100000", env = "FANOUT_MAX_PAYLOAD")]
    pub max_payload: usize,
    /// Outbound frames buffered per link before sends fail.
    #[arg(long, default_value = "64", env = "FANOUT_SEND_BUFFER")]
    pub send_buffer: usize,
    /// WebSocket handshake timeout in seconds.
    #[arg(long, default_value = "5", env = "FANOUT_ADMIT_TIMEOUT")]
    pub admit_timeout: u64,
    /// Interval between WebSocket pings in seconds.
    #[arg(long, default_value = "30", env = "FANOUT_PING_INTERVAL")]
    pub ping_interval: u64,
    /// Link idle timeout in seconds.
    #[arg(long, default_value = "120", env = "FANOUT_IDLE_TIMEOUT")]
    pub idle_timeout: u64,
}

/// Runtime configuration derived from [`Args`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for client WebSocket links.
    pub listen: SocketAddr,
    /// Socket address for the HTTP control plane.
    pub control_addr: SocketAddr,
    /// User-Agent substrings accepted at admission.
    pub allowed_agents: Vec<String>,
    /// File of denied addresses.
    pub deny_list: Option<PathBuf>,
    /// Admission attempts allowed per address within the rate window.
    pub rate_limit: usize,
    /// Rate window length in seconds.
    pub rate_window: u64,
    /// Interval between rate limiter cleanups in seconds.
    pub rate_cleanup_interval: u64,
    /// Interval between registry summary log lines in seconds.
    pub stats_interval: u64,
    /// Maximum total concurrent links.
    pub max_conns: usize,
    /// Maximum distributed payload size in bytes.
    pub max_payload: usize,
    /// Outbound frames buffered per link.
    pub send_buffer: usize,
    /// WebSocket handshake timeout in seconds.
    pub admit_timeout: u64,
    /// Interval between WebSocket pings in seconds.
    pub ping_interval: u64,
    /// Link idle timeout in seconds.
    pub idle_timeout: u64,
}

impl ServerConfig {
    /// Validates the configuration values are within acceptable bounds.
    /// Returns Ok(()) if valid, Err with description otherwise.
    pub fn validate(&self) -> Result<(), String> {
        if self.allowed_agents.iter().all(|a| a.trim().is_empty()) {
            return Err("allowed_agents must contain at least one label".to_string());
        }

        if self.rate_limit == 0 {
            return Err("rate_limit must be greater than 0".to_string());
        }
        if self.rate_limit > 100_000 {
            return Err("rate_limit exceeds reasonable limit (100,000)".to_string());
        }
        if self.rate_window == 0 {
            return Err("rate_window must be greater than 0".to_string());
        }
        if self.rate_window > 86_400 {
            return Err("rate_window exceeds reasonable limit (86400 seconds)".to_string());
        }
        if self.rate_cleanup_interval == 0 {
            return Err("rate_cleanup_interval must be greater than 0".to_string());
        }
        if self.stats_interval == 0 {
            return Err("stats_interval must be greater than 0".to_string());
        }

        if self.max_conns == 0 {
            return Err("max_conns must be greater than 0".to_string());
        }
        if self.max_conns > 1_000_000 {
            return Err("max_conns exceeds reasonable limit (1,000,000)".to_string());
        }

        // Bounded by the control plane's request body limit
        const MAX_ALLOWED_PAYLOAD: usize = 16 * 1024 * 1024;
        if self.max_payload == 0 {
            return Err("max_payload must be greater than 0".to_string());
        }
        if self.max_payload > MAX_ALLOWED_PAYLOAD {
            return Err(format!(
                "max_payload exceeds maximum allowed ({} bytes)",
                MAX_ALLOWED_PAYLOAD
            ));
        }

        if self.send_buffer == 0 {
            return Err("send_buffer must be greater than 0".to_string());
        }

        if self.admit_timeout == 0 {
            return Err("admit_timeout must be greater than 0".to_string());
        }
        if self.admit_timeout > 300 {
            return Err("admit_timeout exceeds reasonable limit (300 seconds)".to_string());
        }

        if self.ping_interval == 0 {
            return Err("ping_interval must be greater than 0".to_string());
        }
        if self.ping_interval > 3600 {
            return Err("ping_interval exceeds reasonable limit (3600 seconds)".to_string());
        }

        if self.idle_timeout == 0 {
            return Err("idle_timeout must be greater than 0".to_string());
        }
        if self.idle_timeout > 86_400 {
            return Err(
                "idle_timeout exceeds reasonable limit (86400 seconds / 1 day)".to_string(),
            );
        }
        if self.idle_timeout < self.ping_interval {
            return Err("idle_timeout cannot be shorter than ping_interval".to_string());
        }
        Ok(())
    }

    /// Rate window as a [`Duration`].
    #[must_use]
    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_window)
    }
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        Self {
            listen: args.listen,
            control_addr: args.control_addr,
            allowed_agents: args
                .allowed_agents
                .into_iter()
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .collect(),
            deny_list: args.deny_list,
            rate_limit: args.rate_limit,
            rate_window: args.rate_window,
            rate_cleanup_interval: args.rate_cleanup_interval,
            stats_interval: args.stats_interval,
            max_conns: args.max_conns,
            max_payload: args.max_payload,
            send_buffer: args.send_buffer,
            admit_timeout: args.admit_timeout,
            ping_interval: args.ping_interval,
            idle_timeout: args.idle_timeout,
        }
    }
}
