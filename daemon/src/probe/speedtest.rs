//! Speed test subprocess runner

use super::{parse_output, ProbeRunner};
use crate::config::ProbeConfig;
use crate::network;
use chrono::{SubsecRound, Utc};
use model::{NetworkType, ProbeError, ProbeResult};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info};

/// Longest stderr excerpt carried in an error
const MAX_DIAGNOSTIC_LEN: usize = 512;

pub struct SpeedtestRunner {
    config: Arc<ProbeConfig>,
    device_name: String,
}

impl SpeedtestRunner {
    pub fn new(config: Arc<ProbeConfig>, device_name: String) -> Self {
        info!(
            "Speed test runner initialized (binary: {}, timeout: {}s, strict: {})",
            config.binary, config.timeout_secs, config.strict
        );

        Self { config, device_name }
    }

    /// Run the binary and return its stdout
    async fn run_binary(&self) -> Result<String, ProbeError> {
        let timeout = self.config.timeout();

        let mut command = Command::new(&self.config.binary);
        command
            .arg("--format=json")
            .args(&self.config.extra_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|e| ProbeError::ExecutionFailed {
            status: "spawn failed".to_string(),
            detail: format!("{}: {}", self.config.binary, e),
        })?;

        // Dropping the wait future on timeout drops the child, which kills it
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ProbeError::ExecutionFailed {
                    status: "wait failed".to_string(),
                    detail: e.to_string(),
                });
            }
            Err(_) => return Err(ProbeError::Timeout(timeout)),
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            let detail = if stderr.trim().is_empty() { &stdout } else { &stderr };
            return Err(ProbeError::ExecutionFailed {
                status: output.status.to_string(),
                detail: truncate(detail.trim(), MAX_DIAGNOSTIC_LEN),
            });
        }

        Ok(stdout)
    }
}

impl ProbeRunner for SpeedtestRunner {
    async fn execute(&self) -> Result<ProbeResult, ProbeError> {
        debug!("Running {} --format=json", self.config.binary);

        let stdout = self.run_binary().await?;
        let output = parse_output(&stdout, self.config.strict)?;

        let network_type = network::detect_network_type(output.interface_name()).await;
        let mut result = output.into_result(
            Utc::now().trunc_subsecs(0),
            self.device_name.clone(),
            network_type,
        );

        if network_type == NetworkType::Wifi {
            result.network_ssid = network::wifi_ssid().await;
        }

        debug!(
            "Probe finished: ping {:.1}ms, down {:.1}Mbps, up {:.1}Mbps ({})",
            result.ping_ms, result.download_mbps, result.upload_mbps, result.connection_quality
        );

        Ok(result)
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
