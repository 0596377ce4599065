//! Speed test JSON output parsing

use chrono::{DateTime, Utc};
use model::constants::{BITS_PER_BYTE, BITS_PER_MEGABIT, UNKNOWN};
use model::result::non_negative;
use model::{NetworkType, ProbeError, ProbeResult};
use serde::Deserialize;

/// Raw `--format=json` output. Every field is optional; absent values
/// degrade to zero/unknown when building a [`ProbeResult`].
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeedtestOutput {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub ping: Option<PingSection>,
    pub download: Option<TransferSection>,
    pub upload: Option<TransferSection>,
    pub packet_loss: Option<f64>,
    pub isp: Option<String>,
    pub interface: Option<InterfaceSection>,
    pub server: Option<ServerSection>,
    /// Error text some probe versions emit on failure
    pub message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PingSection {
    pub latency: Option<f64>,
    pub jitter: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TransferSection {
    /// Bytes per second
    pub bandwidth: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceSection {
    pub name: Option<String>,
    pub external_ip: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ServerSection {
    /// Numeric in current probe versions, string in some older ones
    pub id: Option<serde_json::Value>,
    pub name: Option<String>,
    pub country: Option<String>,
}

impl SpeedtestOutput {
    fn latency(&self) -> Option<f64> {
        self.ping.as_ref().and_then(|p| p.latency)
    }

    fn download_bandwidth(&self) -> Option<f64> {
        self.download.as_ref().and_then(|d| d.bandwidth)
    }

    fn upload_bandwidth(&self) -> Option<f64> {
        self.upload.as_ref().and_then(|u| u.bandwidth)
    }

    /// Interface name the probe reported, if any
    pub fn interface_name(&self) -> Option<&str> {
        self.interface.as_ref().and_then(|i| i.name.as_deref())
    }

    /// Build a normalized result. `network_type` comes from the caller since
    /// it depends on local interface inspection.
    pub fn into_result(
        self,
        timestamp: DateTime<Utc>,
        device_name: String,
        network_type: NetworkType,
    ) -> ProbeResult {
        let mut result = ProbeResult::new(timestamp, device_name);

        result.ping_ms = non_negative(self.latency().unwrap_or(0.0));
        result.jitter_ms = non_negative(self.ping.as_ref().and_then(|p| p.jitter).unwrap_or(0.0));
        result.download_mbps = bandwidth_to_mbps(self.download_bandwidth());
        result.upload_mbps = bandwidth_to_mbps(self.upload_bandwidth());
        result.packet_loss_pct = non_negative(self.packet_loss.unwrap_or(0.0));
        result.network_type = network_type;

        if let Some(isp) = non_empty(self.isp) {
            result.isp = isp;
        }

        if let Some(ip) = self.interface.and_then(|i| non_empty(i.external_ip)) {
            result.ip_address = ip;
        }

        if let Some(server) = self.server {
            if let Some(id) = server.id.as_ref().and_then(server_id_string) {
                result.server_id = id;
            }
            result.server_location = server_location(server.name, server.country);
        }

        result.classify();
        result
    }
}

/// Parse probe stdout.
///
/// Empty or malformed output is a `ParseError`. A well-formed object that
/// carries no measurement (or, when `strict`, lacks any of ping, download
/// and upload) is `IncompleteData`.
pub fn parse_output(stdout: &str, strict: bool) -> Result<SpeedtestOutput, ProbeError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Err(ProbeError::ParseError("empty output".to_string()));
    }

    let output: SpeedtestOutput = serde_json::from_str(trimmed)
        .map_err(|e| ProbeError::ParseError(e.to_string()))?;

    if let Some(kind) = output.kind.as_deref() {
        if kind != "result" {
            let message = output.message.as_deref().unwrap_or("no message");
            return Err(ProbeError::IncompleteData(format!(
                "probe emitted a {:?} record instead of a result: {}",
                kind, message
            )));
        }
    }

    let present = [
        ("ping.latency", output.latency().is_some()),
        ("download.bandwidth", output.download_bandwidth().is_some()),
        ("upload.bandwidth", output.upload_bandwidth().is_some()),
    ];

    if present.iter().all(|(_, found)| !found) {
        return Err(ProbeError::IncompleteData("no measurements in output".to_string()));
    }

    if strict {
        let missing: Vec<&str> = present
            .iter()
            .filter(|(_, found)| !found)
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            return Err(ProbeError::IncompleteData(format!("missing {}", missing.join(", "))));
        }
    }

    Ok(output)
}

fn bandwidth_to_mbps(bytes_per_sec: Option<f64>) -> f64 {
    non_negative(bytes_per_sec.unwrap_or(0.0) * BITS_PER_BYTE / BITS_PER_MEGABIT)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn server_id_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

fn server_location(name: Option<String>, country: Option<String>) -> String {
    match (non_empty(name), non_empty(country)) {
        (Some(name), Some(country)) => format!("{}, {}", name, country),
        (Some(only), None) | (None, Some(only)) => only,
        (None, None) => UNKNOWN.to_string(),
    }
}
