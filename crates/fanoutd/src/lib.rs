//! fanout registry server: admits WebSocket clients, tracks one link per
//! address and distributes operator payloads to every admitted client.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Originating client address resolution.
pub mod address;
/// Pre-link admission policy and deny-list.
pub mod admission;
/// CLI argument parsing and server configuration.
pub mod config;
/// Per-link protocol state machine and transport loop.
pub mod connection;
/// HTTP control plane.
pub mod control;
/// Payload validation and fan-out.
pub mod distributor;
/// Error types for registry server operations.
pub mod error;
/// Prometheus metrics and readiness state.
pub mod metrics;
mod ratelimit;
/// Authoritative set of admitted links.
pub mod registry;
/// Accept loop, upkeep task and shared server state.
pub mod server;

pub use ratelimit::RateLimiter;
pub use server::{run, run_with_shutdown, ServerState};
