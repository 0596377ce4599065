//! Configuration management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub general: GeneralConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeneralConfig {
    #[serde(default = "default_device_name")]
    pub device_name: String,
    pub database_path: String,
    #[serde(default)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProbeConfig {
    /// Speed test executable, resolved through PATH
    #[serde(default = "default_probe_binary")]
    pub binary: String,
    /// Arguments appended after `--format=json`
    #[serde(default)]
    pub extra_args: Vec<String>,
    #[serde(default = "default_probe_timeout_secs")]
    pub timeout_secs: u64,
    /// Reject output lacking ping, download or upload instead of zero-filling
    #[serde(default)]
    pub strict: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_test_interval_ms")]
    pub test_interval_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_delay_ms")]
    pub backoff_delay_ms: u64,
    #[serde(default = "default_max_backoff_delay_ms")]
    pub max_backoff_delay_ms: u64,
    #[serde(default = "default_circuit_breaker_threshold")]
    pub circuit_breaker_threshold: u32,
    #[serde(default = "default_circuit_breaker_timeout_ms")]
    pub circuit_breaker_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Supervisor unit controlled by the service endpoints
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// "text" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            binary: default_probe_binary(),
            extra_args: Vec::new(),
            timeout_secs: default_probe_timeout_secs(),
            strict: false,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            test_interval_ms: default_test_interval_ms(),
            max_retries: default_max_retries(),
            backoff_delay_ms: default_backoff_delay_ms(),
            max_backoff_delay_ms: default_max_backoff_delay_ms(),
            circuit_breaker_threshold: default_circuit_breaker_threshold(),
            circuit_breaker_timeout_ms: default_circuit_breaker_timeout_ms(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: default_bind_address(),
            port: default_api_port(),
            service_name: default_service_name(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
        }
    }
}

fn default_device_name() -> String {
    "auto".to_string()
}

fn default_probe_binary() -> String {
    "speedtest".to_string()
}

fn default_probe_timeout_secs() -> u64 {
    120
}

fn default_test_interval_ms() -> u64 {
    3_600_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_delay_ms() -> u64 {
    5_000
}

fn default_max_backoff_delay_ms() -> u64 {
    300_000
}

fn default_circuit_breaker_threshold() -> u32 {
    5
}

fn default_circuit_breaker_timeout_ms() -> u64 {
    1_800_000
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
    8321
}

fn default_service_name() -> String {
    "netprobe".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(contents)
            .with_context(|| "Failed to parse config file")?;

        config.validate()?;

        // Resolve device name if needed
        if config.general.device_name == "auto" {
            config.general.device_name = detect_device_name();
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let schedule = &self.schedule;

        let positive = [
            ("schedule.test_interval_ms", schedule.test_interval_ms),
            ("schedule.max_retries", schedule.max_retries as u64),
            ("schedule.backoff_delay_ms", schedule.backoff_delay_ms),
            ("schedule.max_backoff_delay_ms", schedule.max_backoff_delay_ms),
            ("schedule.circuit_breaker_threshold", schedule.circuit_breaker_threshold as u64),
            ("schedule.circuit_breaker_timeout_ms", schedule.circuit_breaker_timeout_ms),
            ("probe.timeout_secs", self.probe.timeout_secs),
        ];
        for (name, value) in positive {
            if value == 0 {
                anyhow::bail!("{} must be positive", name);
            }
        }

        if schedule.max_backoff_delay_ms < schedule.backoff_delay_ms {
            anyhow::bail!("schedule.max_backoff_delay_ms must not be smaller than schedule.backoff_delay_ms");
        }

        if self.probe.binary.trim().is_empty() {
            anyhow::bail!("probe.binary must not be empty");
        }

        if self.general.database_path.trim().is_empty() {
            anyhow::bail!("general.database_path must not be empty");
        }

        if self.api.enabled && self.api.port == 0 {
            anyhow::bail!("api.port must be positive");
        }

        match self.logging.format.as_str() {
            "text" | "json" => {}
            other => anyhow::bail!("logging.format must be \"text\" or \"json\", got {:?}", other),
        }

        Ok(())
    }
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.test_interval_ms)
    }

    pub fn circuit_breaker_timeout(&self) -> Duration {
        Duration::from_millis(self.circuit_breaker_timeout_ms)
    }

    /// Delay before retry `attempt` (1-indexed): base doubled per attempt, capped
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63);
        let delay = self
            .backoff_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_delay_ms);
        Duration::from_millis(delay)
    }
}

fn detect_device_name() -> String {
    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok().filter(|s| !s.is_empty()))
        .unwrap_or_else(|| model::constants::UNKNOWN.to_string())
}
