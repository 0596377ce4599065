//! Probe result data structures and derived classifications

use crate::constants::{
    quality_thresholds, CELLULAR_KEYWORDS, ETHERNET_KEYWORDS, UNKNOWN, WIFI_KEYWORDS,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of link the probe ran over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    Wifi,
    Ethernet,
    Cellular,
    Unknown,
}

impl NetworkType {
    pub fn as_str(self) -> &'static str {
        match self {
            NetworkType::Wifi => "wifi",
            NetworkType::Ethernet => "ethernet",
            NetworkType::Cellular => "cellular",
            NetworkType::Unknown => "unknown",
        }
    }

    pub fn from_name(value: &str) -> Option<Self> {
        match value {
            "wifi" => Some(NetworkType::Wifi),
            "ethernet" => Some(NetworkType::Ethernet),
            "cellular" => Some(NetworkType::Cellular),
            "unknown" => Some(NetworkType::Unknown),
            _ => None,
        }
    }

    /// Classify a single interface name by keyword
    pub fn from_interface(name: &str) -> Self {
        let name = name.to_ascii_lowercase();
        let matches = |keywords: &[&str]| keywords.iter().any(|k| name.contains(k));

        if matches(&WIFI_KEYWORDS) {
            NetworkType::Wifi
        } else if matches(&ETHERNET_KEYWORDS) {
            NetworkType::Ethernet
        } else if matches(&CELLULAR_KEYWORDS) {
            NetworkType::Cellular
        } else {
            NetworkType::Unknown
        }
    }

    /// Classify a set of interfaces.
    ///
    /// The result does not depend on enumeration order: wifi wins over
    /// ethernet, which wins over cellular.
    pub fn from_interfaces<S: AsRef<str>>(names: &[S]) -> Self {
        let found: Vec<NetworkType> = names
            .iter()
            .map(|n| NetworkType::from_interface(n.as_ref()))
            .collect();

        [NetworkType::Wifi, NetworkType::Ethernet, NetworkType::Cellular]
            .into_iter()
            .find(|t| found.contains(t))
            .unwrap_or(NetworkType::Unknown)
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection quality tier, best first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionQuality {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl ConnectionQuality {
    /// Derive quality from latency metrics. Tiers are checked in order and
    /// every limit is exclusive, so a value sitting on a limit falls through.
    pub fn classify(ping_ms: f64, jitter_ms: f64, packet_loss_pct: f64) -> Self {
        let within = |(ping, jitter, loss): (f64, f64, f64)| {
            ping_ms < ping && jitter_ms < jitter && packet_loss_pct < loss
        };

        if within(quality_thresholds::EXCELLENT) {
            ConnectionQuality::Excellent
        } else if within(quality_thresholds::GOOD) {
            ConnectionQuality::Good
        } else if within(quality_thresholds::FAIR) {
            ConnectionQuality::Fair
        } else {
            ConnectionQuality::Poor
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionQuality::Excellent => "excellent",
            ConnectionQuality::Good => "good",
            ConnectionQuality::Fair => "fair",
            ConnectionQuality::Poor => "poor",
        }
    }

    pub fn from_name(value: &str) -> Option<Self> {
        match value {
            "excellent" => Some(ConnectionQuality::Excellent),
            "good" => Some(ConnectionQuality::Good),
            "fair" => Some(ConnectionQuality::Fair),
            "poor" => Some(ConnectionQuality::Poor),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One completed speed test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    /// When the probe completed (UTC, second precision)
    pub timestamp: DateTime<Utc>,

    pub ping_ms: f64,
    pub download_mbps: f64,
    pub upload_mbps: f64,

    /// SSID of the wireless network, if on wifi and detectable
    pub network_ssid: Option<String>,
    pub network_type: NetworkType,

    /// External IP address as seen by the speed test server
    pub ip_address: String,
    pub server_id: String,
    pub server_location: String,
    pub isp: String,

    pub jitter_ms: f64,
    pub packet_loss_pct: f64,

    pub connection_quality: ConnectionQuality,

    /// Host that ran the probe
    pub device_name: String,
}

impl ProbeResult {
    /// Empty result with every field at its zero/unknown value
    pub fn new(timestamp: DateTime<Utc>, device_name: String) -> Self {
        Self {
            timestamp,
            ping_ms: 0.0,
            download_mbps: 0.0,
            upload_mbps: 0.0,
            network_ssid: None,
            network_type: NetworkType::Unknown,
            ip_address: UNKNOWN.to_string(),
            server_id: UNKNOWN.to_string(),
            server_location: UNKNOWN.to_string(),
            isp: UNKNOWN.to_string(),
            jitter_ms: 0.0,
            packet_loss_pct: 0.0,
            connection_quality: ConnectionQuality::classify(0.0, 0.0, 0.0),
            device_name,
        }
    }

    /// Recompute `connection_quality` from the latency metrics
    pub fn classify(&mut self) {
        self.connection_quality =
            ConnectionQuality::classify(self.ping_ms, self.jitter_ms, self.packet_loss_pct);
    }
}

/// Clamp to a finite, non-negative value
pub fn non_negative(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}
