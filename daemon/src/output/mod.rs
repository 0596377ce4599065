//! Console output and export

use anyhow::Result;
use model::ProbeResult;
use std::path::Path;

/// One console line per result
pub fn print_result(result: &ProbeResult) {
    println!("{}", format_result(result));
}

pub fn format_result(r: &ProbeResult) -> String {
    format!(
        "[{}] {} ping {:.1}ms jitter {:.1}ms loss {:.2}% down {:.1}Mbps up {:.1}Mbps via {} ({}) [{}]",
        r.timestamp.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S"),
        r.device_name,
        r.ping_ms,
        r.jitter_ms,
        r.packet_loss_pct,
        r.download_mbps,
        r.upload_mbps,
        r.network_ssid.as_deref().unwrap_or(r.network_type.as_str()),
        r.isp,
        r.connection_quality,
    )
}

/// Export results as CSV
pub fn export_csv(results: &[ProbeResult], output_path: &Path) -> Result<()> {
    let writer = csv::Writer::from_path(output_path)?;
    write_csv(results, writer)
}

fn write_csv<W: std::io::Write>(results: &[ProbeResult], mut writer: csv::Writer<W>) -> Result<()> {
    // Write header
    writer.write_record([
        "timestamp",
        "device_name",
        "ping_ms",
        "jitter_ms",
        "packet_loss_pct",
        "download_mbps",
        "upload_mbps",
        "network_type",
        "network_ssid",
        "ip_address",
        "isp",
        "server_id",
        "server_location",
        "connection_quality",
    ])?;

    // Write results
    for r in results {
        writer.write_record(&[
            r.timestamp.to_rfc3339(),
            r.device_name.clone(),
            format!("{:.2}", r.ping_ms),
            format!("{:.2}", r.jitter_ms),
            format!("{:.2}", r.packet_loss_pct),
            format!("{:.2}", r.download_mbps),
            format!("{:.2}", r.upload_mbps),
            r.network_type.to_string(),
            r.network_ssid.clone().unwrap_or_default(),
            r.ip_address.clone(),
            r.isp.clone(),
            r.server_id.clone(),
            r.server_location.clone(),
            r.connection_quality.to_string(),
        ])?;
    }

    writer.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use model::NetworkType;

    fn sample() -> ProbeResult {
        let mut result = ProbeResult::new(
            DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            "probe-1".to_string(),
        );
        result.ping_ms = 23.456;
        result.download_mbps = 512.0;
        result.network_type = NetworkType::Ethernet;
        result.server_location = "Berlin, Germany".to_string();
        result.classify();
        result
    }

    #[test]
    fn test_csv_layout() {
        let mut buffer = Vec::new();
        write_csv(&[sample()], csv::Writer::from_writer(&mut buffer)).unwrap();

        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("timestamp,device_name,ping_ms"));
        assert_eq!(
            lines[1],
            "2023-11-14T22:13:20+00:00,probe-1,23.46,0.00,0.00,512.00,0.00,ethernet,,unknown,unknown,unknown,\"Berlin, Germany\",good"
        );
    }

    #[test]
    fn test_format_result_prefers_ssid() {
        let mut result = sample();
        assert!(format_result(&result).contains("via ethernet"));
        result.network_ssid = Some("office".to_string());
        assert!(format_result(&result).contains("via office"));
    }
}
