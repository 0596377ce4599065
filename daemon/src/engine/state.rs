//! Resilience state shared between the probe loop and its observers

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Failure-absorption state of the scheduling loop.
///
/// Invariants: an open circuit always carries a reset instant, and closing
/// the circuit clears the consecutive failure count.
#[derive(Debug, Clone)]
pub struct ResilienceState {
    pub running: bool,
    pub started_at: Instant,
    /// Monotonic time of the last successful probe
    pub last_test_at: Option<Instant>,
    /// Wall-clock time of the last successful probe
    pub last_test_time: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub circuit_open: bool,
    pub circuit_reset_at: Option<Instant>,
}

impl ResilienceState {
    pub fn new(now: Instant) -> Self {
        Self {
            running: true,
            started_at: now,
            last_test_at: None,
            last_test_time: None,
            consecutive_failures: 0,
            circuit_open: false,
            circuit_reset_at: None,
        }
    }

    pub fn record_success(&mut self, now: Instant, wall_clock: DateTime<Utc>) {
        self.last_test_at = Some(now);
        self.last_test_time = Some(wall_clock);
        self.consecutive_failures = 0;
    }

    /// Count a failed probe cycle. Returns true if this failure opened the circuit.
    pub fn record_failure(&mut self, now: Instant, threshold: u32, open_for: Duration) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        if !self.circuit_open && self.consecutive_failures >= threshold {
            self.circuit_open = true;
            self.circuit_reset_at = Some(now + open_for);
            warn!(
                failures = self.consecutive_failures,
                threshold,
                open_for_ms = open_for.as_millis() as u64,
                "circuit breaker opened"
            );
            return true;
        }

        false
    }

    /// Close the circuit once its reset instant has passed. Returns true if it closed.
    pub fn try_close_circuit(&mut self, now: Instant) -> bool {
        if !self.circuit_open {
            return false;
        }

        match self.circuit_reset_at {
            Some(reset_at) if now < reset_at => false,
            _ => {
                self.circuit_open = false;
                self.circuit_reset_at = None;
                self.consecutive_failures = 0;
                info!("circuit breaker closed, resuming probes");
                true
            }
        }
    }

    /// Time left until the circuit may close, zero if it is closed or due
    pub fn circuit_remaining(&self, now: Instant) -> Duration {
        match (self.circuit_open, self.circuit_reset_at) {
            (true, Some(reset_at)) => reset_at.saturating_duration_since(now),
            _ => Duration::ZERO,
        }
    }

    /// Time left until the next probe is due, zero if it is due now
    pub fn interval_remaining(&self, now: Instant, interval: Duration) -> Duration {
        match self.last_test_at {
            Some(last) => interval.saturating_sub(now.saturating_duration_since(last)),
            None => Duration::ZERO,
        }
    }
}
