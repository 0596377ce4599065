//! Health reporting derived from the resilience state

use super::state::ResilienceState;
use model::{HealthReport, HealthStatus};
use tokio::time::Instant;

/// Snapshot the externally visible health. Read-only and infallible.
pub fn report(state: &ResilienceState, now: Instant) -> HealthReport {
    HealthReport {
        status: HealthStatus::derive(state.running, state.circuit_open, state.consecutive_failures),
        last_test_time: state.last_test_time,
        consecutive_failures: state.consecutive_failures,
        circuit_open: state.circuit_open,
        uptime_secs: now.saturating_duration_since(state.started_at).as_secs(),
    }
}
