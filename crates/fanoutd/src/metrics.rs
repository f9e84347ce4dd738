use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared readiness flag, cleared while the server drains.
#[derive(Clone, Debug)]
pub struct HealthState {
    ready: Arc<AtomicBool>,
}

impl HealthState {
    /// Create a health state that starts ready.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Mark the service as ready or not.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    /// Check if the service is ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

/// Install the global Prometheus recorder.
///
/// # Errors
///
/// Returns an error if a recorder is already installed.
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    Ok(PrometheusBuilder::new().install_recorder()?)
}

/// Link count gauges.
pub mod gauges {
    /// Increment the active links gauge.
    pub fn inc_links_active() {
        metrics::gauge!("fanout_links_active").increment(1.0);
    }

    /// Decrement the active links gauge.
    pub fn dec_links_active() {
        metrics::gauge!("fanout_links_active").decrement(1.0);
    }
}

/// Event counters.
pub mod counters {
    /// Record an admission attempt with the given status label.
    pub fn admissions_total(status: &'static str) {
        metrics::counter!("fanout_admissions_total", "status" => status).increment(1);
    }

    /// Count a well-formed inbound frame by kind class.
    pub fn frames_total(kind: &'static str) {
        metrics::counter!("fanout_frames_total", "kind" => kind).increment(1);
    }

    /// Count an inbound frame that failed to parse.
    pub fn frames_malformed_total() {
        metrics::counter!("fanout_frames_malformed_total").increment(1);
    }

    /// Count one per-link broadcast send by outcome.
    pub fn broadcast_sends_total(outcome: &'static str) {
        metrics::counter!("fanout_broadcast_sends_total", "outcome" => outcome).increment(1);
    }

    /// Count a reported execution result by outcome.
    pub fn execution_results_total(outcome: &'static str) {
        metrics::counter!("fanout_execution_results_total", "outcome" => outcome).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_state_toggles() {
        let health = HealthState::new();
        assert!(health.is_ready());
        let clone = health.clone();
        clone.set_ready(false);
        assert!(!health.is_ready());
    }

    #[test]
    fn counters_without_recorder_are_noops() {
        counters::admissions_total("admitted");
        counters::frames_malformed_total();
        gauges::inc_links_active();
        gauges::dec_links_active();
    }
}
