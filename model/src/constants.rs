//! Classification thresholds and fixed scheduling constants

use std::time::Duration;

/// Upper bound for any single idle sleep in the scheduling loop
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Stored results older than this are pruned after every probe cycle
pub const RETENTION_DAYS: u32 = 30;

/// Placeholder for string fields the probe did not report
pub const UNKNOWN: &str = "unknown";

/// Bytes/sec to megabits/sec: multiply by bits per byte, divide by bits per megabit
pub const BITS_PER_BYTE: f64 = 8.0;
pub const BITS_PER_MEGABIT: f64 = 1_000_000.0;

/// Quality tier limits: (ping ms, jitter ms, packet loss %), all exclusive
pub mod quality_thresholds {
    pub const EXCELLENT: (f64, f64, f64) = (20.0, 5.0, 0.1);
    pub const GOOD: (f64, f64, f64) = (50.0, 15.0, 1.0);
    pub const FAIR: (f64, f64, f64) = (100.0, 30.0, 2.5);
}

/// Interface name fragments per network type
pub const WIFI_KEYWORDS: [&str; 3] = ["wlan", "wifi", "wlp"];
pub const ETHERNET_KEYWORDS: [&str; 2] = ["eth", "enp"];
pub const CELLULAR_KEYWORDS: [&str; 2] = ["wwan", "cellular"];
