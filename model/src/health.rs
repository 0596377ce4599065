//! Externally visible health report

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Status precedence: stopped or circuit open beats recent failures
    pub fn derive(running: bool, circuit_open: bool, consecutive_failures: u32) -> Self {
        if !running || circuit_open {
            HealthStatus::Unhealthy
        } else if consecutive_failures > 0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    /// Wall-clock time of the last successful probe
    pub last_test_time: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub circuit_open: bool,
    pub uptime_secs: u64,
}
