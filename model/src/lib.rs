//! netprobe data model
//!
//! Types shared by the probe daemon and its HTTP surface: probe results,
//! connection quality and network type classification, health reports,
//! and the probe error taxonomy.

pub mod constants;
pub mod error;
pub mod health;
pub mod result;

pub use error::ProbeError;
pub use health::{HealthReport, HealthStatus};
pub use result::{ConnectionQuality, NetworkType, ProbeResult};
