//! Local network detection - active interface, interface inventory and SSID

use anyhow::{Context, Result};
use model::NetworkType;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tracing::debug;

const SYS_CLASS_NET: &str = "/sys/class/net";
/// Upper bound for each helper command run during a probe
const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Detect the interface carrying the default route using `ip route`
pub async fn default_route_interface() -> Result<String> {
    route_interface_via("ip", COMMAND_TIMEOUT).await
}

async fn route_interface_via(program: &str, limit: Duration) -> Result<String> {
    let lookup = tokio::process::Command::new(program)
        .args(["route", "show", "default"])
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(limit, lookup)
        .await
        .map_err(|_| anyhow::anyhow!("'{} route' timed out after {:?}", program, limit))?
        .with_context(|| format!("Failed to execute '{} route' command", program))?;

    if !output.status.success() {
        anyhow::bail!("Failed to get default route");
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    debug!("Default route output: {}", stdout);

    parse_route_device(&stdout)
        .ok_or_else(|| anyhow::anyhow!("Could not parse default route device from 'ip route' output"))
}

/// Parse output like: "default via 192.168.1.1 dev eth0 proto dhcp metric 100"
fn parse_route_device(output: &str) -> Option<String> {
    output
        .lines()
        .filter(|line| line.starts_with("default"))
        .find_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            let dev_idx = parts.iter().position(|&p| p == "dev")?;
            parts.get(dev_idx + 1).map(|s| s.to_string())
        })
}

/// Names of local interfaces that are not loopback and not administratively down
pub fn local_interfaces() -> Vec<String> {
    list_interfaces(Path::new(SYS_CLASS_NET))
}

fn list_interfaces(root: &Path) -> Vec<String> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Cannot enumerate interfaces in {:?}: {}", root, e);
            return Vec::new();
        }
    };

    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name != "lo")
        .filter(|name| {
            std::fs::read_to_string(root.join(name).join("operstate"))
                .map(|state| state.trim() != "down")
                .unwrap_or(true)
        })
        .collect();
    names.sort();
    names
}

/// Determine the network type for a probe.
///
/// The interface the probe reported wins; then the default route; then any
/// local interface.
pub async fn detect_network_type(reported_interface: Option<&str>) -> NetworkType {
    if let Some(name) = reported_interface {
        let detected = NetworkType::from_interface(name);
        if detected != NetworkType::Unknown {
            return detected;
        }
    }

    match default_route_interface().await {
        Ok(name) => {
            let detected = NetworkType::from_interface(&name);
            if detected != NetworkType::Unknown {
                return detected;
            }
        }
        Err(e) => debug!("Default route lookup failed: {}", e),
    }

    NetworkType::from_interfaces(&local_interfaces())
}

/// SSID of the current wireless network via `iwgetid -r`, if any
pub async fn wifi_ssid() -> Option<String> {
    let lookup = tokio::process::Command::new("iwgetid")
        .arg("-r")
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(COMMAND_TIMEOUT, lookup).await {
        Ok(Ok(output)) if output.status.success() => {
            let ssid = String::from_utf8_lossy(&output.stdout).trim().to_string();
            (!ssid.is_empty()).then_some(ssid)
        }
        Ok(Ok(_)) => None,
        Ok(Err(e)) => {
            debug!("SSID lookup unavailable: {}", e);
            None
        }
        Err(_) => {
            debug!("SSID lookup timed out");
            None
        }
    }
}
