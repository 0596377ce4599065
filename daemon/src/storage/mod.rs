//! SQLite result storage

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use model::{ConnectionQuality, NetworkType, ProbeResult};
use rusqlite::{params, Connection, OpenFlags, Row};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

const SECONDS_PER_DAY: i64 = 86_400;

const RESULT_COLUMNS: &str = "timestamp, ping_ms, download_mbps, upload_mbps, network_ssid,
    network_type, ip_address, server_id, server_location, isp, jitter_ms,
    packet_loss_pct, connection_quality, device_name";

/// Narrow persistence contract the scheduling engine depends on.
///
/// Implementations are driven by a single writer.
pub trait MetricsStore {
    fn insert(&self, result: &ProbeResult) -> Result<()>;

    fn latest(&self) -> Result<Option<ProbeResult>>;

    /// Delete results older than `older_than_days`, returning how many went
    fn prune(&self, older_than_days: u32) -> Result<usize>;

    /// Release the underlying handle
    fn close(self) -> Result<()>
    where
        Self: Sized;
}

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)
            .context("Failed to open database")?;

        // WAL lets the API read while the engine writes
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .context("Failed to enable WAL mode")?;

        conn.busy_timeout(Duration::from_secs(5))
            .context("Failed to set busy timeout")?;

        Ok(Self { conn })
    }

    /// Read-only handle for query surfaces; the schema must already exist
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open database read-only")?;

        conn.busy_timeout(Duration::from_secs(5))
            .context("Failed to set busy timeout")?;

        Ok(Self { conn })
    }

    pub fn initialize(&self) -> Result<()> {
        info!("Initializing database schema");

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                ping_ms REAL NOT NULL DEFAULT 0,
                download_mbps REAL NOT NULL DEFAULT 0,
                upload_mbps REAL NOT NULL DEFAULT 0,
                network_ssid TEXT,
                network_type TEXT NOT NULL DEFAULT 'unknown',
                ip_address TEXT NOT NULL DEFAULT 'unknown',
                server_id TEXT NOT NULL DEFAULT 'unknown',
                server_location TEXT NOT NULL DEFAULT 'unknown',
                isp TEXT NOT NULL DEFAULT 'unknown',
                jitter_ms REAL NOT NULL DEFAULT 0,
                packet_loss_pct REAL NOT NULL DEFAULT 0,
                connection_quality TEXT NOT NULL,
                device_name TEXT NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_results_timestamp ON results(timestamp)",
            [],
        )?;

        info!("Database schema initialized");

        Ok(())
    }

    pub fn query_range(&self, start: i64, end: i64) -> Result<Vec<ProbeResult>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM results
            WHERE timestamp >= ?1 AND timestamp <= ?2
            ORDER BY timestamp ASC, id ASC",
            RESULT_COLUMNS
        ))?;

        let results = stmt
            .query_map(params![start, end], map_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(results)
    }

    /// Most recent results, newest first
    pub fn recent(&self, limit: usize) -> Result<Vec<ProbeResult>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM results ORDER BY timestamp DESC, id DESC LIMIT ?1",
            RESULT_COLUMNS
        ))?;

        let results = stmt
            .query_map(params![limit as i64], map_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(results)
    }
}

impl MetricsStore for Database {
    fn insert(&self, r: &ProbeResult) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO results ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                RESULT_COLUMNS
            ),
            params![
                r.timestamp.timestamp(),
                r.ping_ms,
                r.download_mbps,
                r.upload_mbps,
                &r.network_ssid,
                r.network_type.as_str(),
                &r.ip_address,
                &r.server_id,
                &r.server_location,
                &r.isp,
                r.jitter_ms,
                r.packet_loss_pct,
                r.connection_quality.as_str(),
                &r.device_name,
            ],
        )?;

        Ok(())
    }

    fn latest(&self) -> Result<Option<ProbeResult>> {
        Ok(self.recent(1)?.into_iter().next())
    }

    fn prune(&self, older_than_days: u32) -> Result<usize> {
        let cutoff = Utc::now().timestamp() - older_than_days as i64 * SECONDS_PER_DAY;
        let deleted = self.conn.execute(
            "DELETE FROM results WHERE timestamp < ?1",
            params![cutoff],
        )?;
        if deleted > 0 {
            info!("Pruned {} results older than {} days", deleted, older_than_days);
        } else {
            debug!("No results older than {} days", older_than_days);
        }
        Ok(deleted)
    }

    fn close(self) -> Result<()> {
        self.conn
            .close()
            .map_err(|(_, e)| e)
            .context("Failed to close database")?;
        info!("Database closed");
        Ok(())
    }
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<ProbeResult> {
    let network_type: String = row.get(5)?;
    let quality: String = row.get(12)?;

    let mut result = ProbeResult {
        timestamp: DateTime::from_timestamp(row.get(0)?, 0).unwrap_or_default(),
        ping_ms: row.get(1)?,
        download_mbps: row.get(2)?,
        upload_mbps: row.get(3)?,
        network_ssid: row.get(4)?,
        network_type: NetworkType::from_name(&network_type).unwrap_or(NetworkType::Unknown),
        ip_address: row.get(6)?,
        server_id: row.get(7)?,
        server_location: row.get(8)?,
        isp: row.get(9)?,
        jitter_ms: row.get(10)?,
        packet_loss_pct: row.get(11)?,
        connection_quality: ConnectionQuality::Poor,
        device_name: row.get(13)?,
    };

    match ConnectionQuality::from_name(&quality) {
        Some(stored) => result.connection_quality = stored,
        None => result.classify(),
    }

    Ok(result)
}
